use crate::{
    bearer::{BearerHandle, QosParams, QosSignature},
    Activity, ApnProfile, ApnType, FailCause,
};
use serde::Serialize;
use std::{fmt, net::IpAddr};

/// Tag of one setup request, used to match its completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

/// Handle of a live data path as known to the radio collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AlarmId(pub u64);

macro_rules! impl_display_id {
    ($type: ty, $prefix: literal) => {
        impl fmt::Display for $type {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}
impl_display_id!(RequestId, "req-");
impl_display_id!(ConnectionHandle, "conn-");
impl_display_id!(AlarmId, "alarm-");

/// Tracker wide id source. Ids are never reused for the lifetime of a
/// tracker.
#[derive(Debug, Default)]
pub struct Ids(u64);

impl Ids {
    fn next(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }

    pub fn request(&mut self) -> RequestId {
        RequestId(self.next())
    }

    pub fn connection(&mut self) -> ConnectionHandle {
        ConnectionHandle(self.next())
    }

    pub fn alarm(&mut self) -> AlarmId {
        AlarmId(self.next())
    }

    pub fn bearer(&mut self) -> BearerHandle {
        BearerHandle(self.next())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AlarmKind {
    Retry(ApnType),
    BearerAbort(BearerHandle),
}

/// A timer armed by the tracker. The alarm comes back as
/// [`Event::Alarm`] when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alarm {
    pub id: AlarmId,
    pub kind: AlarmKind,
}

/// Network configuration of an established connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkProperties {
    pub interface: String,
    pub addresses: Vec<IpAddr>,
    pub dns: Vec<IpAddr>,
    pub gateway: Option<IpAddr>,
    pub mtu: Option<u16>,
}

pub type SetupResult = std::result::Result<LinkProperties, FailCause>;

/// Why a transition was started. Carried into notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    ApnEnabled,
    ApnDisabled,
    ApnChanged,
    ApnFailed,
    UserDataEnabled,
    UserDataDisabled,
    PolicyDataEnabled,
    PolicyDataDisabled,
    InternalDataEnabled,
    InternalDataDisabled,
    DependencyMet,
    DependencyUnmet,
    RoamingOn,
    RoamingOff,
    DataRoamingChanged,
    VoiceCallStarted,
    VoiceCallEnded,
    RadioAvailable,
    RadioTurnedOff,
    RecordsLoaded,
    DataAttached,
    PsRestrictDisabled,
    RetryAlarm,
    LostConnection,
    Connected,
    CleanUp,
    FailFast,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::String(s)) => f.write_str(&s),
            _ => write!(f, "{self:?}"),
        }
    }
}

/// Everything that can drive the tracker: collaborator signals, upper layer
/// commands and fired alarms.
#[derive(Debug, Clone)]
pub enum Event {
    RadioAvailable,
    RadioOffOrNotAvailable,
    RecordsLoaded,
    DataAttached,
    DataDetached,
    PsRestrictEnabled,
    PsRestrictDisabled,
    VoiceCallStarted {
        peer: bool,
    },
    VoiceCallEnded {
        peer: bool,
    },
    RoamingOn,
    RoamingOff,
    DataRoamingChanged(bool),
    ApnListChanged(Vec<ApnProfile>),

    TrySetup {
        apn_type: ApnType,
        reason: Reason,
    },
    SetupComplete {
        apn_type: ApnType,
        request: RequestId,
        result: SetupResult,
    },
    TeardownComplete {
        apn_type: ApnType,
        handle: ConnectionHandle,
    },
    ConnectionLost {
        apn_type: ApnType,
        handle: ConnectionHandle,
        cause: FailCause,
    },
    LinkActivity {
        apn_type: ApnType,
        activity: Activity,
    },

    SetUserDataEnabled(bool),
    SetPolicyDataEnabled(bool),
    SetInternalDataEnabled(bool),
    SetDependencyMet {
        apn_type: ApnType,
        met: bool,
    },
    SetFailFast(bool),
    EnableApn(ApnType),
    DisableApn(ApnType),
    CleanUpConnection {
        apn_type: ApnType,
        reason: Reason,
    },
    CleanUpAll(Reason),
    DisconnectRetrying(ApnType),

    Alarm(Alarm),

    BearerSetupComplete {
        bearer: BearerHandle,
        result: std::result::Result<(), FailCause>,
    },
    BearerModifyComplete {
        bearer: BearerHandle,
        result: std::result::Result<QosParams, FailCause>,
    },
    BearerDeactivateComplete(BearerHandle),
    BearerAbortComplete(BearerHandle),
    BearerActivatedByNetwork {
        parent: ApnType,
        qos: QosParams,
    },
    BearerModifiedByNetwork {
        parent: ApnType,
        qos: QosParams,
    },
    BearerDeactivatedByNetwork {
        parent: ApnType,
        signature: QosSignature,
    },
    ModifyBearer {
        bearer: BearerHandle,
        qos: QosParams,
    },
    ReleaseBearer(BearerHandle),
    AbortBearer(BearerHandle),
    ClearBearers(Option<ApnType>),
}

impl Event {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RadioAvailable => "radio_available",
            Self::RadioOffOrNotAvailable => "radio_off_or_not_available",
            Self::RecordsLoaded => "records_loaded",
            Self::DataAttached => "data_attached",
            Self::DataDetached => "data_detached",
            Self::PsRestrictEnabled => "ps_restrict_enabled",
            Self::PsRestrictDisabled => "ps_restrict_disabled",
            Self::VoiceCallStarted { .. } => "voice_call_started",
            Self::VoiceCallEnded { .. } => "voice_call_ended",
            Self::RoamingOn => "roaming_on",
            Self::RoamingOff => "roaming_off",
            Self::DataRoamingChanged(_) => "data_roaming_changed",
            Self::ApnListChanged(_) => "apn_list_changed",
            Self::TrySetup { .. } => "try_setup",
            Self::SetupComplete { .. } => "setup_complete",
            Self::TeardownComplete { .. } => "teardown_complete",
            Self::ConnectionLost { .. } => "connection_lost",
            Self::LinkActivity { .. } => "link_activity",
            Self::SetUserDataEnabled(_) => "set_user_data_enabled",
            Self::SetPolicyDataEnabled(_) => "set_policy_data_enabled",
            Self::SetInternalDataEnabled(_) => "set_internal_data_enabled",
            Self::SetDependencyMet { .. } => "set_dependency_met",
            Self::SetFailFast(_) => "set_fail_fast",
            Self::EnableApn(_) => "enable_apn",
            Self::DisableApn(_) => "disable_apn",
            Self::CleanUpConnection { .. } => "clean_up_connection",
            Self::CleanUpAll(_) => "clean_up_all",
            Self::DisconnectRetrying(_) => "disconnect_retrying",
            Self::Alarm(_) => "alarm",
            Self::BearerSetupComplete { .. } => "bearer_setup_complete",
            Self::BearerModifyComplete { .. } => "bearer_modify_complete",
            Self::BearerDeactivateComplete(_) => "bearer_deactivate_complete",
            Self::BearerAbortComplete(_) => "bearer_abort_complete",
            Self::BearerActivatedByNetwork { .. } => "bearer_activated_by_network",
            Self::BearerModifiedByNetwork { .. } => "bearer_modified_by_network",
            Self::BearerDeactivatedByNetwork { .. } => "bearer_deactivated_by_network",
            Self::ModifyBearer { .. } => "modify_bearer",
            Self::ReleaseBearer(_) => "release_bearer",
            Self::AbortBearer(_) => "abort_bearer",
            Self::ClearBearers(_) => "clear_bearers",
        }
    }
}
