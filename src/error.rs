use crate::ApnType;
use thiserror::Error;

pub type Result<T = ()> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("channel closed")]
    ChannelClosed,
    #[error("unknown apn type: {0}")]
    UnknownApnType(ApnType),
    #[error("apn {0} has no connected default bearer")]
    ParentNotConnected(ApnType),
    #[error("invalid retry config: {0}")]
    RetryConfig(String),
    #[error("radio error: {0}")]
    Radio(String),
    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn channel() -> Self {
        Self::ChannelClosed
    }

    pub fn custom<T: ToString>(msg: T) -> Self {
        Self::Custom(msg.to_string())
    }

    pub fn radio<T: ToString>(msg: T) -> Self {
        Self::Radio(msg.to_string())
    }

    pub fn retry_config<T: ToString>(msg: T) -> Self {
        Self::RetryConfig(msg.to_string())
    }

    pub fn unknown_apn_type(apn_type: &ApnType) -> Self {
        Self::UnknownApnType(apn_type.clone())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::ChannelClosed
    }
}
