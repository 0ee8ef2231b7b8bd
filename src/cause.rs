use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Failure reported for a setup attempt or a dropped connection. Codes follow
/// the 3GPP TS 24.008 session management causes where one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailCause {
    OperatorBarred,
    InsufficientResources,
    MissingUnknownApn,
    UnknownPdpAddressType,
    UserAuthentication,
    ActivationRejectGgsn,
    ActivationRejectUnspecified,
    ServiceOptionNotSupported,
    ServiceOptionNotSubscribed,
    ServiceOptionOutOfOrder,
    NsapiInUse,
    RegularDeactivation,
    OnlyIpv4Allowed,
    OnlyIpv6Allowed,
    OnlySingleBearerAllowed,
    ProtocolErrors,
    /// No response from the network within the modem's timer
    Timeout,
    SignalLost,
    RadioNotAvailable,
    /// The radio collaborator could not accept the request
    RequestSubmission,
    /// No profile can serve the apn type
    NoApnProfile,
    Unknown(i32),
}

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Transient,
    Permanent,
}

impl FailCause {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::OperatorBarred
            | Self::MissingUnknownApn
            | Self::UnknownPdpAddressType
            | Self::UserAuthentication
            | Self::ActivationRejectGgsn
            | Self::ServiceOptionNotSupported
            | Self::ServiceOptionNotSubscribed
            | Self::NsapiInUse
            | Self::OnlyIpv4Allowed
            | Self::OnlyIpv6Allowed
            | Self::ProtocolErrors
            | Self::NoApnProfile => FailureClass::Permanent,
            Self::InsufficientResources
            | Self::ActivationRejectUnspecified
            | Self::ServiceOptionOutOfOrder
            | Self::RegularDeactivation
            | Self::OnlySingleBearerAllowed
            | Self::Timeout
            | Self::SignalLost
            | Self::RadioNotAvailable
            | Self::RequestSubmission
            | Self::Unknown(_) => FailureClass::Transient,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.class() == FailureClass::Permanent
    }
}

impl From<i32> for FailCause {
    fn from(code: i32) -> Self {
        match code {
            0x08 => Self::OperatorBarred,
            0x1A => Self::InsufficientResources,
            0x1B => Self::MissingUnknownApn,
            0x1C => Self::UnknownPdpAddressType,
            0x1D => Self::UserAuthentication,
            0x1E => Self::ActivationRejectGgsn,
            0x1F => Self::ActivationRejectUnspecified,
            0x20 => Self::ServiceOptionNotSupported,
            0x21 => Self::ServiceOptionNotSubscribed,
            0x22 => Self::ServiceOptionOutOfOrder,
            0x23 => Self::NsapiInUse,
            0x24 => Self::RegularDeactivation,
            0x32 => Self::OnlyIpv4Allowed,
            0x33 => Self::OnlyIpv6Allowed,
            0x34 => Self::OnlySingleBearerAllowed,
            0x6F => Self::ProtocolErrors,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for FailCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "unknown({code:#x})"),
            other => match serde_json::to_value(other) {
                Ok(serde_json::Value::String(s)) => f.write_str(&s),
                _ => write!(f, "{other:?}"),
            },
        }
    }
}

impl FromStr for FailCause {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        if let Ok(code) = s.parse::<i32>() {
            return Ok(Self::from(code));
        }
        serde_json::from_value(serde_json::Value::String(s.to_ascii_lowercase()))
            .map_err(|_| crate::Error::custom(format!("invalid fail cause: {s}")))
    }
}
