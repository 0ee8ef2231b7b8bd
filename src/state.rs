use serde::Serialize;
use std::fmt;

/// Lifecycle state of one apn context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Ready to start setup, the initial state
    Idle,
    /// A setup request is outstanding on the first candidate profile
    Connecting,
    /// A setup request is outstanding on an alternate profile after an
    /// earlier candidate failed
    Scanning,
    /// The data path is up
    Connected,
    /// Teardown has been requested but not yet confirmed
    Disconnecting,
    /// Setup failed on all candidate profiles
    Failed,
    /// Setup failed and a retry alarm is armed
    Retrying,
}

impl State {
    /// The coarse state reported to upper layers.
    pub fn data_state(&self) -> DataState {
        match self {
            Self::Failed | Self::Idle => DataState::Disconnected,
            Self::Retrying | Self::Connecting | Self::Scanning => DataState::Connecting,
            // the data path stays usable until the teardown is confirmed
            Self::Connected | Self::Disconnecting => DataState::Connected,
        }
    }

    /// Whether a setup request may be outstanding in this state.
    pub fn is_setting_up(&self) -> bool {
        matches!(self, Self::Connecting | Self::Scanning)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Connecting => "CONNECTING",
            Self::Scanning => "SCANNING",
            Self::Connected => "CONNECTED",
            Self::Disconnecting => "DISCONNECTING",
            Self::Failed => "FAILED",
            Self::Retrying => "RETRYING",
        };
        f.write_str(s)
    }
}

/// Coarse data state exposed to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataState {
    Disconnected,
    Connecting,
    Connected,
}

/// Traffic direction on a connected context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    #[default]
    None,
    DataIn,
    DataOut,
    DataInAndOut,
    Dormant,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn coarse_mapping() {
        let expected = [
            (State::Idle, DataState::Disconnected),
            (State::Failed, DataState::Disconnected),
            (State::Connecting, DataState::Connecting),
            (State::Scanning, DataState::Connecting),
            (State::Retrying, DataState::Connecting),
            (State::Connected, DataState::Connected),
            (State::Disconnecting, DataState::Connected),
        ];
        for (state, data_state) in expected {
            assert_eq!(data_state, state.data_state(), "{state}");
        }
    }
}
