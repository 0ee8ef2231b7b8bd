//! Dedicated bearers layered on a connected default bearer.
//!
//! A bearer is keyed by its parent apn type and the signature of its QoS
//! flow. Requests for a key that already has a live bearer are coalesced onto
//! that bearer. Network initiated signals are matched by the same key, and a
//! signal for an unknown key is ignored.

use crate::{
    effect::{Effects, Notification, RadioRequest},
    event::{Alarm, AlarmId, AlarmKind, ConnectionHandle, Ids},
    retry::RetryDelay,
    ApnType, Error, FailCause, Result,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, time::Duration};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BearerHandle(pub u64);

impl fmt::Display for BearerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bearer-{}", self.0)
    }
}

/// Identity of a QoS flow within its parent connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QosSignature {
    /// QoS class identifier
    pub qci: u8,
    /// Traffic flow template id
    pub flow_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QosParams {
    pub signature: QosSignature,
    #[serde(default)]
    pub gbr_ul_kbps: u32,
    #[serde(default)]
    pub gbr_dl_kbps: u32,
    #[serde(default)]
    pub mbr_ul_kbps: u32,
    #[serde(default)]
    pub mbr_dl_kbps: u32,
}

impl QosParams {
    pub fn new(qci: u8, flow_id: u32) -> Self {
        Self {
            signature: QosSignature { qci, flow_id },
            gbr_ul_kbps: 0,
            gbr_dl_kbps: 0,
            mbr_ul_kbps: 0,
            mbr_dl_kbps: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BearerState {
    Requesting,
    Active,
    Modifying,
    Deactivating,
    Aborting,
}

impl BearerState {
    /// A bearer that is not on its way out. Requests for the same key are
    /// coalesced onto a live bearer.
    fn is_live(&self) -> bool {
        matches!(self, Self::Requesting | Self::Active | Self::Modifying)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "cause", rename_all = "snake_case")]
pub enum BearerStatus {
    Requested,
    Activated,
    Modified,
    ModifyFailed(FailCause),
    Deactivated,
    Aborted,
    Failed(FailCause),
}

#[derive(Debug, Clone, Serialize)]
pub struct DedicatedBearer {
    pub handle: BearerHandle,
    pub parent: ApnType,
    pub qos: QosParams,
    pub state: BearerState,
    pub network_initiated: bool,
    #[serde(skip)]
    abort_alarm: Option<AlarmId>,
}

#[derive(Debug)]
pub struct DedicatedBearerManager {
    bearers: BTreeMap<BearerHandle, DedicatedBearer>,
    abort_timeout: Duration,
}

impl DedicatedBearerManager {
    pub fn new(abort_timeout: Duration) -> Self {
        Self {
            bearers: BTreeMap::new(),
            abort_timeout,
        }
    }

    pub fn get(&self, handle: BearerHandle) -> Option<&DedicatedBearer> {
        self.bearers.get(&handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DedicatedBearer> {
        self.bearers.values()
    }

    pub fn len(&self) -> usize {
        self.bearers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bearers.is_empty()
    }

    /// Whether the parent has any bearer that is live or being requested.
    pub fn has_bearers(&self, parent: &ApnType) -> bool {
        self.bearers
            .values()
            .any(|bearer| bearer.parent == *parent && bearer.state.is_live())
    }

    fn find_live(&self, parent: &ApnType, signature: &QosSignature) -> Option<BearerHandle> {
        self.bearers
            .values()
            .find(|b| b.parent == *parent && b.qos.signature == *signature && b.state.is_live())
            .map(|b| b.handle)
    }

    fn find_any(&self, parent: &ApnType, signature: &QosSignature) -> Option<BearerHandle> {
        self.find_live(parent, signature).or_else(|| {
            self.bearers
                .values()
                .find(|b| b.parent == *parent && b.qos.signature == *signature)
                .map(|b| b.handle)
        })
    }

    fn notify(fx: &mut Effects, bearer: &DedicatedBearer, status: BearerStatus) {
        fx.notify(Notification::Bearer {
            bearer: bearer.handle,
            parent: bearer.parent.clone(),
            status,
        })
    }

    fn remove(&mut self, handle: BearerHandle, status: BearerStatus, fx: &mut Effects) {
        if let Some(bearer) = self.bearers.remove(&handle) {
            if let Some(alarm) = bearer.abort_alarm {
                fx.cancel(alarm);
            }
            info!(bearer = %handle, parent = %bearer.parent, ?status, "bearer removed");
            Self::notify(fx, &bearer, status);
        }
    }

    /// Requests a bearer on the given parent. `connection` is the parent's
    /// live connection, if it has one.
    pub fn request(
        &mut self,
        parent: &ApnType,
        connection: Option<ConnectionHandle>,
        qos: QosParams,
        ids: &mut Ids,
        fx: &mut Effects,
    ) -> Result<BearerHandle> {
        if let Some(handle) = self.find_live(parent, &qos.signature) {
            debug!(bearer = %handle, %parent, "coalescing bearer request");
            return Ok(handle);
        }
        let connection = connection.ok_or_else(|| Error::ParentNotConnected(parent.clone()))?;
        let handle = ids.bearer();
        let bearer = DedicatedBearer {
            handle,
            parent: parent.clone(),
            qos,
            state: BearerState::Requesting,
            network_initiated: false,
            abort_alarm: None,
        };
        info!(bearer = %handle, %parent, qci = qos.signature.qci, "requesting bearer");
        fx.radio(RadioRequest::ActivateBearer {
            bearer: handle,
            connection,
            qos,
        });
        Self::notify(fx, &bearer, BearerStatus::Requested);
        self.bearers.insert(handle, bearer);
        Ok(handle)
    }

    pub fn setup_complete(
        &mut self,
        handle: BearerHandle,
        result: std::result::Result<(), FailCause>,
        fx: &mut Effects,
    ) {
        let Some(bearer) = self.bearers.get_mut(&handle) else {
            debug!(bearer = %handle, "ignoring setup completion for unknown bearer");
            return;
        };
        match (bearer.state, result) {
            (BearerState::Requesting, Ok(())) => {
                bearer.state = BearerState::Active;
                Self::notify(fx, bearer, BearerStatus::Activated);
            }
            (BearerState::Requesting, Err(cause)) => {
                self.remove(handle, BearerStatus::Failed(cause), fx)
            }
            (BearerState::Aborting, Ok(())) => {
                // the activation won the race against the abort
                if let Some(alarm) = bearer.abort_alarm.take() {
                    fx.cancel(alarm);
                }
                bearer.state = BearerState::Deactivating;
                fx.radio(RadioRequest::DeactivateBearer { bearer: handle });
            }
            (BearerState::Aborting, Err(_)) => self.remove(handle, BearerStatus::Aborted, fx),
            (state, _) => debug!(bearer = %handle, ?state, "ignoring setup completion"),
        }
    }

    pub fn modify(&mut self, handle: BearerHandle, qos: QosParams, fx: &mut Effects) {
        match self.bearers.get_mut(&handle) {
            Some(bearer) if bearer.state == BearerState::Active => {
                let qos = QosParams {
                    signature: bearer.qos.signature,
                    ..qos
                };
                bearer.state = BearerState::Modifying;
                fx.radio(RadioRequest::ModifyBearer {
                    bearer: handle,
                    qos,
                });
            }
            Some(bearer) => debug!(bearer = %handle, state = ?bearer.state, "ignoring modify"),
            None => debug!(bearer = %handle, "ignoring modify for unknown bearer"),
        }
    }

    pub fn modify_complete(
        &mut self,
        handle: BearerHandle,
        result: std::result::Result<QosParams, FailCause>,
        fx: &mut Effects,
    ) {
        let Some(bearer) = self
            .bearers
            .get_mut(&handle)
            .filter(|bearer| bearer.state == BearerState::Modifying)
        else {
            debug!(bearer = %handle, "ignoring modify completion");
            return;
        };
        bearer.state = BearerState::Active;
        match result {
            Ok(qos) => {
                bearer.qos = QosParams {
                    signature: bearer.qos.signature,
                    ..qos
                };
                Self::notify(fx, bearer, BearerStatus::Modified);
            }
            Err(cause) => Self::notify(fx, bearer, BearerStatus::ModifyFailed(cause)),
        }
    }

    pub fn release(&mut self, handle: BearerHandle, ids: &mut Ids, fx: &mut Effects) {
        let Some(bearer) = self.bearers.get_mut(&handle) else {
            debug!(bearer = %handle, "ignoring release for unknown bearer");
            return;
        };
        match bearer.state {
            BearerState::Active | BearerState::Modifying => {
                bearer.state = BearerState::Deactivating;
                fx.radio(RadioRequest::DeactivateBearer { bearer: handle });
            }
            BearerState::Requesting => self.abort(handle, ids, fx),
            BearerState::Deactivating | BearerState::Aborting => (),
        }
    }

    pub fn deactivate_complete(&mut self, handle: BearerHandle, fx: &mut Effects) {
        match self.bearers.get(&handle).map(|bearer| bearer.state) {
            Some(BearerState::Deactivating) => self.remove(handle, BearerStatus::Deactivated, fx),
            state => debug!(bearer = %handle, ?state, "ignoring deactivate completion"),
        }
    }

    /// Cooperative abort. An in flight activation waits in `Aborting` for the
    /// network to confirm or for the abort timeout.
    pub fn abort(&mut self, handle: BearerHandle, ids: &mut Ids, fx: &mut Effects) {
        let Some(bearer) = self.bearers.get_mut(&handle) else {
            debug!(bearer = %handle, "ignoring abort for unknown bearer");
            return;
        };
        match bearer.state {
            BearerState::Requesting => {
                let alarm = Alarm {
                    id: ids.alarm(),
                    kind: AlarmKind::BearerAbort(handle),
                };
                bearer.state = BearerState::Aborting;
                bearer.abort_alarm = Some(alarm.id);
                fx.radio(RadioRequest::AbortBearer { bearer: handle });
                fx.schedule(alarm, RetryDelay::fixed(self.abort_timeout));
            }
            BearerState::Active | BearerState::Modifying => self.release(handle, ids, fx),
            BearerState::Deactivating | BearerState::Aborting => (),
        }
    }

    pub fn abort_complete(&mut self, handle: BearerHandle, fx: &mut Effects) {
        match self.bearers.get(&handle).map(|bearer| bearer.state) {
            Some(BearerState::Aborting) => self.remove(handle, BearerStatus::Aborted, fx),
            state => debug!(bearer = %handle, ?state, "ignoring abort completion"),
        }
    }

    pub fn abort_timeout(&mut self, alarm: AlarmId, handle: BearerHandle, fx: &mut Effects) {
        let matches = self.bearers.get(&handle).map_or(false, |bearer| {
            bearer.state == BearerState::Aborting && bearer.abort_alarm == Some(alarm)
        });
        if !matches {
            debug!(bearer = %handle, %alarm, "ignoring stale abort alarm");
            return;
        }
        warn!(bearer = %handle, "abort not confirmed, dropping bearer");
        if let Some(bearer) = self.bearers.get_mut(&handle) {
            // the alarm already fired, nothing to cancel
            bearer.abort_alarm = None;
        }
        self.remove(handle, BearerStatus::Aborted, fx);
    }

    pub fn network_activated(
        &mut self,
        parent: &ApnType,
        connection: Option<ConnectionHandle>,
        qos: QosParams,
        ids: &mut Ids,
        fx: &mut Effects,
    ) {
        if let Some(handle) = self.find_live(parent, &qos.signature) {
            if let Some(bearer) = self.bearers.get_mut(&handle) {
                let changed = bearer.qos != qos;
                bearer.qos = qos;
                match bearer.state {
                    BearerState::Requesting => {
                        bearer.state = BearerState::Active;
                        Self::notify(fx, bearer, BearerStatus::Activated);
                    }
                    _ if changed => Self::notify(fx, bearer, BearerStatus::Modified),
                    _ => (),
                }
            }
            return;
        }
        if connection.is_none() {
            warn!(%parent, "ignoring network bearer on disconnected parent");
            return;
        }
        let bearer = DedicatedBearer {
            handle: ids.bearer(),
            parent: parent.clone(),
            qos,
            state: BearerState::Active,
            network_initiated: true,
            abort_alarm: None,
        };
        info!(bearer = %bearer.handle, %parent, "network activated bearer");
        Self::notify(fx, &bearer, BearerStatus::Activated);
        self.bearers.insert(bearer.handle, bearer);
    }

    pub fn network_modified(&mut self, parent: &ApnType, qos: QosParams, fx: &mut Effects) {
        let Some(bearer) = self
            .find_live(parent, &qos.signature)
            .and_then(|handle| self.bearers.get_mut(&handle))
            .filter(|bearer| bearer.state != BearerState::Requesting)
        else {
            debug!(%parent, qci = qos.signature.qci, "ignoring unmatched network modify");
            return;
        };
        bearer.qos = qos;
        Self::notify(fx, bearer, BearerStatus::Modified);
    }

    pub fn network_deactivated(
        &mut self,
        parent: &ApnType,
        signature: &QosSignature,
        fx: &mut Effects,
    ) {
        match self.find_any(parent, signature) {
            Some(handle) => self.remove(handle, BearerStatus::Deactivated, fx),
            None => debug!(%parent, qci = signature.qci, "ignoring unmatched network deactivate"),
        }
    }

    /// Drops every bearer of a parent whose default bearer went away.
    pub fn parent_lost(&mut self, parent: &ApnType, fx: &mut Effects) {
        let handles: Vec<BearerHandle> = self
            .bearers
            .values()
            .filter(|bearer| bearer.parent == *parent)
            .map(|bearer| bearer.handle)
            .collect();
        for handle in handles {
            self.remove(handle, BearerStatus::Deactivated, fx);
        }
    }

    /// Clears bearers of the given parent, or of all parents, asking the radio
    /// to deactivate the live ones.
    pub fn clear(&mut self, parent: Option<&ApnType>, fx: &mut Effects) {
        let handles: Vec<(BearerHandle, BearerState)> = self
            .bearers
            .values()
            .filter(|bearer| parent.map_or(true, |parent| bearer.parent == *parent))
            .map(|bearer| (bearer.handle, bearer.state))
            .collect();
        for (handle, state) in handles {
            match state {
                BearerState::Active | BearerState::Modifying => {
                    fx.radio(RadioRequest::DeactivateBearer { bearer: handle })
                }
                BearerState::Requesting => fx.radio(RadioRequest::AbortBearer { bearer: handle }),
                BearerState::Deactivating | BearerState::Aborting => (),
            }
            self.remove(handle, BearerStatus::Deactivated, fx);
        }
    }
}
