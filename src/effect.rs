use crate::{
    bearer::{BearerHandle, BearerStatus, QosParams},
    event::{Alarm, AlarmId, ConnectionHandle, Reason, RequestId},
    retry::RetryDelay,
    Activity, ApnProfile, ApnType, DataState, FailCause, State,
};
use serde::Serialize;

/// Commands for the radio collaborator. Each one is answered, if at all, by a
/// completion event posted back onto the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum RadioRequest {
    SetupData {
        request: RequestId,
        apn_type: ApnType,
        profile: ApnProfile,
    },
    DeactivateData {
        apn_type: ApnType,
        handle: ConnectionHandle,
        /// Teardown without waiting for the network, no completion follows
        forced: bool,
    },
    ActivateBearer {
        bearer: BearerHandle,
        connection: ConnectionHandle,
        qos: QosParams,
    },
    ModifyBearer {
        bearer: BearerHandle,
        qos: QosParams,
    },
    DeactivateBearer {
        bearer: BearerHandle,
    },
    AbortBearer {
        bearer: BearerHandle,
    },
}

/// Notifications for upper layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notification", rename_all = "snake_case")]
pub enum Notification {
    DataStateChanged {
        apn_type: ApnType,
        state: State,
        data_state: DataState,
        reason: Reason,
    },
    DataActivity {
        apn_type: ApnType,
        activity: Activity,
    },
    ApnFailed {
        apn_type: ApnType,
        cause: FailCause,
        /// Whether the tracker gave up until an external re-enable
        suppressed: bool,
    },
    Bearer {
        bearer: BearerHandle,
        parent: ApnType,
        status: BearerStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Radio(RadioRequest),
    Notify(Notification),
    Schedule { alarm: Alarm, delay: RetryDelay },
    Cancel(AlarmId),
}

/// Ordered side effects produced while handling one event.
#[derive(Debug, Default)]
pub struct Effects(Vec<Effect>);

impl Effects {
    pub fn radio(&mut self, request: RadioRequest) {
        self.0.push(Effect::Radio(request))
    }

    pub fn notify(&mut self, notification: Notification) {
        self.0.push(Effect::Notify(notification))
    }

    pub fn schedule(&mut self, alarm: Alarm, delay: RetryDelay) {
        self.0.push(Effect::Schedule { alarm, delay })
    }

    pub fn cancel(&mut self, alarm: AlarmId) {
        self.0.push(Effect::Cancel(alarm))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Effect> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn radio_requests(&self) -> impl Iterator<Item = &RadioRequest> {
        self.0.iter().filter_map(|effect| match effect {
            Effect::Radio(request) => Some(request),
            _ => None,
        })
    }

    pub fn notifications(&self) -> impl Iterator<Item = &Notification> {
        self.0.iter().filter_map(|effect| match effect {
            Effect::Notify(notification) => Some(notification),
            _ => None,
        })
    }

    pub fn scheduled(&self) -> impl Iterator<Item = (&Alarm, &RetryDelay)> {
        self.0.iter().filter_map(|effect| match effect {
            Effect::Schedule { alarm, delay } => Some((alarm, delay)),
            _ => None,
        })
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, Effect> {
        self.0.drain(..)
    }
}

impl IntoIterator for Effects {
    type Item = Effect;
    type IntoIter = std::vec::IntoIter<Effect>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn radio_request_json_keeps_request_id() {
        let setup = RadioRequest::SetupData {
            request: RequestId(7),
            apn_type: ApnType::DEFAULT,
            profile: ApnProfile::new("internet", &[ApnType::DEFAULT]),
        };
        let json = serde_json::to_value(&setup).expect("json");
        assert_eq!("setup_data", json["command"]);
        assert_eq!(7, json["request"]);
        assert_eq!("internet", json["profile"]["name"]);
    }
}
