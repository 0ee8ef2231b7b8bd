use crate::{
    event::{AlarmId, ConnectionHandle, LinkProperties, Reason, RequestId},
    Activity, ApnProfile, ApnType, DataState, FailCause, State,
};
use serde::Serialize;
use std::time::Instant;

/// The live data path of a connected context.
#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    pub handle: ConnectionHandle,
    pub profile: ApnProfile,
    pub link: LinkProperties,
    #[serde(skip)]
    pub established: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Retries made since the last successful connection
    pub count: u32,
    /// The armed retry alarm, only while RETRYING
    pub alarm: Option<AlarmId>,
    /// When the armed alarm is due
    pub due: Option<Instant>,
    /// Set once retries are given up until an external re-arm
    pub suppressed: bool,
}

/// Setup request waiting for its completion.
#[derive(Debug, Clone)]
pub(crate) struct PendingSetup {
    pub request: RequestId,
    pub profile: ApnProfile,
}

/// Per apn type lifecycle. Mutated only through the transitions in
/// [`crate::fsm`].
#[derive(Debug)]
pub struct ApnContext {
    pub(crate) apn_type: ApnType,
    pub(crate) state: State,
    pub(crate) activity: Activity,
    pub(crate) enabled: bool,
    pub(crate) dependency_met: bool,
    pub(crate) candidates: Vec<ApnProfile>,
    pub(crate) cursor: usize,
    /// Profile names the network rejected permanently since the last re-arm
    pub(crate) rejected: Vec<String>,
    /// Whether every failure of the current scan was permanent
    pub(crate) scan_permanent: bool,
    pub(crate) pending: Option<PendingSetup>,
    pub(crate) connection: Option<Connection>,
    pub(crate) retry: RetryState,
    pub(crate) last_cause: Option<FailCause>,
    pub(crate) teardown_reason: Option<Reason>,
    /// Explicitly cleaned up, no reconnect once the teardown completes
    pub(crate) held: bool,
}

impl ApnContext {
    pub fn new(apn_type: ApnType, enabled: bool) -> Self {
        Self {
            apn_type,
            state: State::Idle,
            activity: Activity::None,
            enabled,
            dependency_met: true,
            candidates: vec![],
            cursor: 0,
            rejected: vec![],
            scan_permanent: true,
            pending: None,
            connection: None,
            retry: RetryState::default(),
            last_cause: None,
            teardown_reason: None,
            held: false,
        }
    }

    pub fn apn_type(&self) -> &ApnType {
        &self.apn_type
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn data_state(&self) -> DataState {
        self.state.data_state()
    }

    pub fn activity(&self) -> Activity {
        self.activity
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn dependency_met(&self) -> bool {
        self.dependency_met
    }

    pub fn retry(&self) -> &RetryState {
        &self.retry
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn connection_handle(&self) -> Option<ConnectionHandle> {
        match self.state {
            State::Connected => self.connection.as_ref().map(|c| c.handle),
            _ => None,
        }
    }

    pub fn last_cause(&self) -> Option<FailCause> {
        self.last_cause
    }

    pub fn pending_request(&self) -> Option<RequestId> {
        self.pending.as_ref().map(|pending| pending.request)
    }

    /// The profile in use, either connected or being set up.
    pub fn current_profile(&self) -> Option<&ApnProfile> {
        self.connection
            .as_ref()
            .map(|connection| &connection.profile)
            .or_else(|| self.pending.as_ref().map(|pending| &pending.profile))
    }

    pub fn is_rejected(&self, profile: &ApnProfile) -> bool {
        self.rejected.iter().any(|name| *name == profile.name)
    }
}
