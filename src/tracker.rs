//! The tracker owns every apn context and the dedicated bearers. It is a pure
//! core: one event in, an ordered set of effects out. Tracker wide flags live
//! here and are handed to the context transitions by reference.

use crate::{
    apn::register_profile_types,
    bearer::{BearerHandle, DedicatedBearer, DedicatedBearerManager, QosParams},
    context::{ApnContext, Connection},
    effect::Effects,
    event::{AlarmKind, Event, Ids, Reason},
    fsm::{self, Env},
    settings::{BearerPrecedence, Settings, VoiceSettings},
    Activity, ApnProfile, ApnType, ApnTypeRegistry, DataState, Error, FailCause, Result,
    RetryPolicy, State,
};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct TrackerFlags {
    pub radio_available: bool,
    pub records_loaded: bool,
    pub attached: bool,
    pub ps_restricted: bool,
    pub roaming: bool,
    pub data_roaming_enabled: bool,
    pub user_data_enabled: bool,
    pub policy_data_enabled: bool,
    pub internal_data_enabled: bool,
    pub fail_fast: bool,
    pub voice_call: bool,
    pub peer_voice_call: bool,
}

/// Answer to an explicit apn enable request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApnEnable {
    /// Already connected or setting up
    AlreadyActive,
    /// Setup started, or will start once setup is allowed
    Started,
    /// The apn type is not registered
    NotAvailable,
    /// Setup failed right away and retries are suppressed
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextStatus {
    pub apn_type: ApnType,
    pub id: Option<u32>,
    pub state: State,
    pub data_state: DataState,
    pub activity: Activity,
    pub enabled: bool,
    pub dependency_met: bool,
    pub retry_count: u32,
    pub retry_suppressed: bool,
    pub retry_due_ms: Option<u64>,
    pub last_cause: Option<FailCause>,
    pub profile: Option<String>,
    pub connection: Option<Connection>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackerStatus {
    pub flags: TrackerFlags,
    pub contexts: Vec<ContextStatus>,
    pub bearers: Vec<DedicatedBearer>,
}

#[derive(Debug)]
pub struct Tracker {
    registry: ApnTypeRegistry,
    profiles: Vec<ApnProfile>,
    /// One context per registered type, in registry order
    contexts: Vec<ApnContext>,
    bearers: DedicatedBearerManager,
    flags: TrackerFlags,
    policy: RetryPolicy,
    ids: Ids,
    voice: VoiceSettings,
    auto_enable: Vec<ApnType>,
    roaming_exempt: Vec<ApnType>,
    user_data_exempt: Vec<ApnType>,
}

impl Tracker {
    pub fn new(settings: &Settings) -> Result<Self> {
        let mut registry = ApnTypeRegistry::default();
        for apn_type in &settings.apn.extra_types {
            registry.register(apn_type);
        }
        register_profile_types(&mut registry, &settings.apn.profiles);
        let auto_enable = settings.tracker.auto_enable_types.clone();
        let contexts = registry
            .iter()
            .map(|apn_type| ApnContext::new(apn_type.clone(), auto_enable.contains(apn_type)))
            .collect();
        Ok(Self {
            policy: settings.retry_policy()?,
            registry,
            profiles: settings.apn.profiles.clone(),
            contexts,
            bearers: DedicatedBearerManager::new(settings.bearer.abort_timeout()),
            flags: TrackerFlags {
                radio_available: false,
                records_loaded: !settings.tracker.require_records,
                attached: false,
                ps_restricted: false,
                roaming: false,
                data_roaming_enabled: settings.roaming.data_roaming_enabled,
                user_data_enabled: true,
                policy_data_enabled: true,
                internal_data_enabled: true,
                fail_fast: false,
                voice_call: false,
                peer_voice_call: false,
            },
            ids: Ids::default(),
            voice: settings.voice.clone(),
            auto_enable,
            roaming_exempt: settings.roaming.exempt_types.clone(),
            user_data_exempt: settings.apn.user_data_exempt_types.clone(),
        })
    }

    pub fn registry(&self) -> &ApnTypeRegistry {
        &self.registry
    }

    pub fn profiles(&self) -> &[ApnProfile] {
        &self.profiles
    }

    pub fn flags(&self) -> &TrackerFlags {
        &self.flags
    }

    pub fn bearers(&self) -> &DedicatedBearerManager {
        &self.bearers
    }

    pub fn contexts(&self) -> impl Iterator<Item = &ApnContext> {
        self.contexts.iter()
    }

    pub fn context(&self, apn_type: &ApnType) -> Option<&ApnContext> {
        self.contexts.iter().find(|ctx| ctx.apn_type == *apn_type)
    }

    fn index(&self, apn_type: &ApnType) -> Option<usize> {
        self.contexts.iter().position(|ctx| ctx.apn_type == *apn_type)
    }

    fn lookup(&self, apn_type: &ApnType, event: &'static str) -> Option<usize> {
        let index = self.index(apn_type);
        if index.is_none() {
            warn!(%apn_type, event, "ignoring event for unknown apn type");
        }
        index
    }

    fn roaming_restricted(&self, apn_type: &ApnType) -> bool {
        self.flags.roaming
            && !self.flags.data_roaming_enabled
            && !self.roaming_exempt.contains(apn_type)
    }

    fn profile_allowed(&self, apn_type: &ApnType, profile: &ApnProfile) -> bool {
        !self.roaming_restricted(apn_type) || profile.roaming_allowed
    }

    /// Profiles a setup for the given type may use, in priority order.
    pub fn candidates(&self, apn_type: &ApnType) -> Vec<ApnProfile> {
        let ctx = self.context(apn_type);
        self.profiles
            .iter()
            .filter(|profile| profile.can_handle(apn_type))
            .filter(|profile| self.profile_allowed(apn_type, profile))
            .filter(|profile| ctx.map_or(true, |ctx| !ctx.is_rejected(profile)))
            .cloned()
            .collect()
    }

    fn voice_suspends(&self, apn_type: &ApnType) -> bool {
        if self.voice.concurrent_voice_data || apn_type.is_emergency() {
            return false;
        }
        let in_call = self.flags.voice_call
            || (self.flags.peer_voice_call && self.voice.suspend_on_peer_call);
        if !in_call {
            return false;
        }
        match self.voice.bearer_precedence {
            BearerPrecedence::Bearer => !self.bearers.has_bearers(apn_type),
            BearerPrecedence::Voice => true,
        }
    }

    /// Whether the context should be connected given the current data
    /// switches, roaming and voice state.
    fn is_wanted(&self, ctx: &ApnContext) -> bool {
        let apn_type = &ctx.apn_type;
        let emergency = apn_type.is_emergency();
        let user_data = self.flags.user_data_enabled || self.user_data_exempt.contains(apn_type);
        let policy_data =
            emergency || (self.flags.policy_data_enabled && self.flags.internal_data_enabled);
        let roaming = !self.roaming_restricted(apn_type)
            || self
                .profiles
                .iter()
                .any(|profile| profile.can_handle(apn_type) && profile.roaming_allowed);
        ctx.enabled
            && ctx.dependency_met
            && user_data
            && policy_data
            && roaming
            && !self.voice_suspends(apn_type)
    }

    /// Whether the radio side permits a new setup for the given type.
    fn is_allowed(&self, apn_type: &ApnType) -> bool {
        self.flags.radio_available
            && self.flags.records_loaded
            && (apn_type.is_emergency() || (self.flags.attached && !self.flags.ps_restricted))
    }

    /// Runs one context transition. Dedicated bearers of a context that
    /// leaves CONNECTED go with it.
    fn drive<R>(
        &mut self,
        index: usize,
        fx: &mut Effects,
        f: impl FnOnce(&mut ApnContext, &mut Env) -> R,
    ) -> R {
        let ctx = &mut self.contexts[index];
        let was_connected = ctx.state == State::Connected;
        let mut env = Env {
            ids: &mut self.ids,
            fx: &mut *fx,
            policy: &self.policy,
            fail_fast: self.flags.fail_fast,
        };
        let result = f(ctx, &mut env);
        if was_connected && ctx.state != State::Connected {
            self.bearers.parent_lost(&ctx.apn_type, fx);
        }
        result
    }

    fn try_setup_one(&mut self, index: usize, reason: Reason, fx: &mut Effects) -> bool {
        let ctx = &self.contexts[index];
        if ctx.state != State::Idle || !self.is_wanted(ctx) || !self.is_allowed(&ctx.apn_type) {
            return false;
        }
        let candidates = self.candidates(&ctx.apn_type);
        self.contexts[index].held = false;
        self.drive(index, fx, |ctx, env| {
            fsm::try_setup(ctx, candidates, reason, env)
        })
    }

    /// Brings one context in line with the current gates: tears down what is
    /// no longer wanted and sets up what is.
    fn evaluate(&mut self, index: usize, reason: Reason, fx: &mut Effects) {
        let ctx = &self.contexts[index];
        let state = ctx.state;
        let wanted = self.is_wanted(ctx);
        match state {
            State::Connected | State::Connecting | State::Scanning => {
                let profile_allowed = ctx
                    .current_profile()
                    .map_or(true, |profile| self.profile_allowed(&ctx.apn_type, profile));
                if !wanted || !profile_allowed {
                    self.drive(index, fx, |ctx, env| fsm::disable(ctx, reason, env));
                }
            }
            State::Retrying if !wanted => {
                self.drive(index, fx, |ctx, env| fsm::cancel_retry(ctx, reason, env))
            }
            State::Idle => {
                self.try_setup_one(index, reason, fx);
            }
            State::Retrying | State::Failed | State::Disconnecting => (),
        }
    }

    fn reevaluate(&mut self, reason: Reason, fx: &mut Effects) {
        for index in 0..self.contexts.len() {
            self.evaluate(index, reason, fx);
        }
    }

    /// Reconnects a context whose teardown just completed, unless it was
    /// cleaned up explicitly.
    fn after_teardown(&mut self, index: usize, fx: &mut Effects) {
        let ctx = &self.contexts[index];
        if ctx.held {
            debug!(apn_type = %ctx.apn_type, "not reconnecting cleaned up context");
            return;
        }
        let reason = ctx.teardown_reason.unwrap_or(Reason::CleanUp);
        self.try_setup_one(index, reason, fx);
    }

    fn bearers_changed(&mut self, fx: &mut Effects) {
        if self.flags.voice_call || self.flags.peer_voice_call {
            self.reevaluate(Reason::VoiceCallStarted, fx);
        }
    }

    pub fn handle(&mut self, event: Event, fx: &mut Effects) {
        debug!(event = event.name(), "handling event");
        match event {
            Event::RadioAvailable => self.radio_available(fx),
            Event::RadioOffOrNotAvailable => {
                self.flags.radio_available = false;
                for index in 0..self.contexts.len() {
                    self.drive(index, fx, fsm::radio_off);
                }
            }
            Event::RecordsLoaded => {
                self.flags.records_loaded = true;
                self.reevaluate(Reason::RecordsLoaded, fx);
            }
            Event::DataAttached => {
                self.flags.attached = true;
                self.reevaluate(Reason::DataAttached, fx);
            }
            Event::DataDetached => {
                // live connections are dropped by the network, not by us
                info!("data detached");
                self.flags.attached = false;
            }
            Event::PsRestrictEnabled => self.flags.ps_restricted = true,
            Event::PsRestrictDisabled => {
                self.flags.ps_restricted = false;
                self.reevaluate(Reason::PsRestrictDisabled, fx);
            }
            Event::VoiceCallStarted { peer } => {
                if peer {
                    self.flags.peer_voice_call = true;
                } else {
                    self.flags.voice_call = true;
                }
                self.reevaluate(Reason::VoiceCallStarted, fx);
            }
            Event::VoiceCallEnded { peer } => {
                if peer {
                    self.flags.peer_voice_call = false;
                } else {
                    self.flags.voice_call = false;
                }
                self.reevaluate(Reason::VoiceCallEnded, fx);
            }
            Event::RoamingOn => {
                self.flags.roaming = true;
                self.reevaluate(Reason::RoamingOn, fx);
            }
            Event::RoamingOff => {
                self.flags.roaming = false;
                self.reevaluate(Reason::RoamingOff, fx);
            }
            Event::DataRoamingChanged(enabled) => {
                self.flags.data_roaming_enabled = enabled;
                self.reevaluate(Reason::DataRoamingChanged, fx);
            }
            Event::ApnListChanged(profiles) => self.apn_list_changed(profiles, fx),

            Event::TrySetup { apn_type, reason } => {
                if let Some(index) = self.lookup(&apn_type, "try_setup") {
                    self.try_setup_one(index, reason, fx);
                }
            }
            Event::SetupComplete {
                apn_type,
                request,
                result,
            } => {
                if let Some(index) = self.lookup(&apn_type, "setup_complete") {
                    let torn_down = self.drive(index, fx, |ctx, env| {
                        fsm::setup_complete(ctx, request, result, env)
                    });
                    if torn_down {
                        self.after_teardown(index, fx);
                    }
                }
            }
            Event::TeardownComplete { apn_type, handle } => {
                if let Some(index) = self.lookup(&apn_type, "teardown_complete") {
                    if self.drive(index, fx, |ctx, env| fsm::teardown_complete(ctx, handle, env)) {
                        self.after_teardown(index, fx);
                    }
                }
            }
            Event::ConnectionLost {
                apn_type,
                handle,
                cause,
            } => {
                if let Some(index) = self.lookup(&apn_type, "connection_lost") {
                    let torn_down = self.drive(index, fx, |ctx, env| {
                        fsm::connection_lost(ctx, handle, cause, env)
                    });
                    if torn_down {
                        self.after_teardown(index, fx);
                    }
                }
            }
            Event::LinkActivity { apn_type, activity } => {
                if let Some(index) = self.lookup(&apn_type, "link_activity") {
                    fsm::link_activity(&mut self.contexts[index], activity, fx);
                }
            }

            Event::SetUserDataEnabled(enabled) => {
                self.flags.user_data_enabled = enabled;
                let reason = if enabled {
                    Reason::UserDataEnabled
                } else {
                    Reason::UserDataDisabled
                };
                self.reevaluate(reason, fx);
            }
            Event::SetPolicyDataEnabled(enabled) => {
                self.flags.policy_data_enabled = enabled;
                let reason = if enabled {
                    Reason::PolicyDataEnabled
                } else {
                    Reason::PolicyDataDisabled
                };
                self.reevaluate(reason, fx);
            }
            Event::SetInternalDataEnabled(enabled) => {
                self.flags.internal_data_enabled = enabled;
                let reason = if enabled {
                    Reason::InternalDataEnabled
                } else {
                    Reason::InternalDataDisabled
                };
                self.reevaluate(reason, fx);
            }
            Event::SetDependencyMet { apn_type, met } => {
                if let Some(index) = self.lookup(&apn_type, "set_dependency_met") {
                    self.contexts[index].dependency_met = met;
                    let reason = if met {
                        Reason::DependencyMet
                    } else {
                        Reason::DependencyUnmet
                    };
                    self.evaluate(index, reason, fx);
                }
            }
            Event::SetFailFast(enabled) => {
                self.flags.fail_fast = enabled;
                if enabled {
                    for index in 0..self.contexts.len() {
                        self.drive(index, fx, fsm::fail_fast);
                    }
                }
            }
            Event::EnableApn(apn_type) => {
                self.apn_enable(&apn_type, fx);
            }
            Event::DisableApn(apn_type) => {
                if let Some(index) = self.lookup(&apn_type, "disable_apn") {
                    self.contexts[index].enabled = false;
                    self.evaluate(index, Reason::ApnDisabled, fx);
                }
            }
            Event::CleanUpConnection { apn_type, reason } => {
                if let Some(index) = self.lookup(&apn_type, "clean_up_connection") {
                    self.clean_up(index, reason, fx);
                }
            }
            Event::CleanUpAll(reason) => {
                for index in 0..self.contexts.len() {
                    self.clean_up(index, reason, fx);
                }
            }
            Event::DisconnectRetrying(apn_type) => {
                if let Some(index) = self.lookup(&apn_type, "disconnect_retrying") {
                    self.drive(index, fx, |ctx, env| {
                        fsm::cancel_retry(ctx, Reason::CleanUp, env)
                    });
                }
            }

            Event::Alarm(alarm) => {
                let id = alarm.id;
                match alarm.kind {
                    AlarmKind::Retry(apn_type) => {
                        if let Some(index) = self.lookup(&apn_type, "alarm") {
                            let ctx = &self.contexts[index];
                            let allowed = self.is_wanted(ctx) && self.is_allowed(&apn_type);
                            let candidates = if allowed {
                                self.candidates(&apn_type)
                            } else {
                                vec![]
                            };
                            self.drive(index, fx, |ctx, env| {
                                fsm::retry_alarm(ctx, id, allowed, candidates, env)
                            });
                        }
                    }
                    AlarmKind::BearerAbort(bearer) => {
                        self.bearers.abort_timeout(id, bearer, fx);
                        self.bearers_changed(fx);
                    }
                }
            }

            Event::BearerSetupComplete { bearer, result } => {
                let failed = result.is_err();
                self.bearers.setup_complete(bearer, result, fx);
                if failed {
                    self.bearers_changed(fx);
                }
            }
            Event::BearerModifyComplete { bearer, result } => {
                self.bearers.modify_complete(bearer, result, fx)
            }
            Event::BearerDeactivateComplete(bearer) => {
                self.bearers.deactivate_complete(bearer, fx);
                self.bearers_changed(fx);
            }
            Event::BearerAbortComplete(bearer) => {
                self.bearers.abort_complete(bearer, fx);
                self.bearers_changed(fx);
            }
            Event::BearerActivatedByNetwork { parent, qos } => {
                let connection = self.context(&parent).and_then(|ctx| ctx.connection_handle());
                self.bearers
                    .network_activated(&parent, connection, qos, &mut self.ids, fx);
            }
            Event::BearerModifiedByNetwork { parent, qos } => {
                self.bearers.network_modified(&parent, qos, fx)
            }
            Event::BearerDeactivatedByNetwork { parent, signature } => {
                self.bearers.network_deactivated(&parent, &signature, fx);
                self.bearers_changed(fx);
            }
            Event::ModifyBearer { bearer, qos } => self.bearers.modify(bearer, qos, fx),
            Event::ReleaseBearer(bearer) => {
                self.bearers.release(bearer, &mut self.ids, fx);
                self.bearers_changed(fx);
            }
            Event::AbortBearer(bearer) => self.bearers.abort(bearer, &mut self.ids, fx),
            Event::ClearBearers(parent) => {
                self.bearers.clear(parent.as_ref(), fx);
                self.bearers_changed(fx);
            }
        }
    }

    fn radio_available(&mut self, fx: &mut Effects) {
        self.flags.radio_available = true;
        for index in 0..self.contexts.len() {
            let ctx = &self.contexts[index];
            // exhausted retries are re-armed, permanent rejections are not
            if ctx.state == State::Failed && !ctx.scan_permanent {
                self.drive(index, fx, |ctx, env| {
                    fsm::rearm(ctx, false, Reason::RadioAvailable, env)
                });
            }
        }
        self.reevaluate(Reason::RadioAvailable, fx);
    }

    fn apn_list_changed(&mut self, profiles: Vec<ApnProfile>, fx: &mut Effects) {
        register_profile_types(&mut self.registry, &profiles);
        let added: Vec<ApnType> = self
            .registry
            .iter()
            .filter(|apn_type| self.index(apn_type).is_none())
            .cloned()
            .collect();
        for apn_type in added {
            info!(%apn_type, "adding apn context");
            let enabled = self.auto_enable.contains(&apn_type);
            self.contexts.push(ApnContext::new(apn_type, enabled));
        }
        info!(profiles = profiles.len(), "apn list changed");
        self.profiles = profiles;

        for index in 0..self.contexts.len() {
            self.drive(index, fx, |ctx, env| {
                fsm::rearm(ctx, true, Reason::ApnChanged, env)
            });
            let stale = self.contexts[index]
                .current_profile()
                .map_or(false, |profile| !self.profiles.contains(profile));
            if stale {
                self.drive(index, fx, |ctx, env| {
                    fsm::disable(ctx, Reason::ApnChanged, env)
                });
            }
        }
        self.reevaluate(Reason::ApnChanged, fx);
    }

    fn clean_up(&mut self, index: usize, reason: Reason, fx: &mut Effects) {
        self.contexts[index].held = true;
        self.drive(index, fx, |ctx, env| fsm::disable(ctx, reason, env));
    }

    /// Explicitly enables an apn type. Clears permanent rejections and retry
    /// suppression for it.
    pub fn apn_enable(&mut self, apn_type: &ApnType, fx: &mut Effects) -> ApnEnable {
        let Some(index) = self.lookup(apn_type, "enable_apn") else {
            return ApnEnable::NotAvailable;
        };
        let ctx = &mut self.contexts[index];
        ctx.enabled = true;
        ctx.held = false;
        self.drive(index, fx, |ctx, env| {
            fsm::rearm(ctx, true, Reason::ApnEnabled, env)
        });
        let state = self.contexts[index].state;
        if state == State::Connected || state.is_setting_up() {
            return ApnEnable::AlreadyActive;
        }
        self.try_setup_one(index, Reason::ApnEnabled, fx);
        match self.contexts[index].state {
            State::Failed => ApnEnable::Failed,
            _ => ApnEnable::Started,
        }
    }

    /// Requests a dedicated bearer on the connected context of `parent`.
    pub fn request_bearer(
        &mut self,
        parent: &ApnType,
        qos: QosParams,
        fx: &mut Effects,
    ) -> Result<BearerHandle> {
        let connection = self
            .context(parent)
            .ok_or_else(|| Error::unknown_apn_type(parent))?
            .connection_handle();
        self.bearers
            .request(parent, connection, qos, &mut self.ids, fx)
    }

    pub fn status(&self) -> TrackerStatus {
        let now = Instant::now();
        TrackerStatus {
            flags: self.flags.clone(),
            contexts: self
                .contexts
                .iter()
                .map(|ctx| ContextStatus {
                    apn_type: ctx.apn_type.clone(),
                    id: self.registry.id(&ctx.apn_type),
                    state: ctx.state,
                    data_state: ctx.data_state(),
                    activity: ctx.activity,
                    enabled: ctx.enabled,
                    dependency_met: ctx.dependency_met,
                    retry_count: ctx.retry.count,
                    retry_suppressed: ctx.retry.suppressed,
                    retry_due_ms: ctx
                        .retry
                        .due
                        .map(|due| due.saturating_duration_since(now).as_millis() as u64),
                    last_cause: ctx.last_cause,
                    profile: ctx.current_profile().map(|profile| profile.name.clone()),
                    connection: ctx.connection.clone(),
                })
                .collect(),
            bearers: self.bearers.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        bearer::BearerState,
        effect::{Effect, Notification, RadioRequest},
        event::{ConnectionHandle, LinkProperties},
    };
    use std::time::Duration;

    fn settings() -> Settings {
        Settings::new(None).expect("settings")
    }

    fn tracker_with(settings: &Settings) -> (Tracker, Effects) {
        let mut tracker = Tracker::new(settings).expect("tracker");
        let mut fx = Effects::default();
        for event in [Event::RecordsLoaded, Event::DataAttached, Event::RadioAvailable] {
            tracker.handle(event, &mut fx);
        }
        (tracker, fx)
    }

    fn tracker() -> (Tracker, Effects) {
        tracker_with(&settings())
    }

    fn state(tracker: &Tracker, apn_type: &ApnType) -> State {
        tracker
            .context(apn_type)
            .map(|ctx| ctx.state())
            .expect("context")
    }

    fn setups<'a>(fx: &'a Effects, apn_type: &ApnType) -> Vec<&'a ApnProfile> {
        fx.radio_requests()
            .filter_map(move |r| match r {
                RadioRequest::SetupData {
                    apn_type: t,
                    profile,
                    ..
                } if t == apn_type => Some(profile),
                _ => None,
            })
            .collect()
    }

    fn teardown(fx: &Effects, apn_type: &ApnType) -> Option<ConnectionHandle> {
        fx.radio_requests().find_map(|r| match r {
            RadioRequest::DeactivateData {
                apn_type: t,
                handle,
                ..
            } if t == apn_type => Some(*handle),
            _ => None,
        })
    }

    fn complete(tracker: &mut Tracker, apn_type: &ApnType, result: crate::event::SetupResult, fx: &mut Effects) {
        let request = tracker
            .context(apn_type)
            .and_then(|ctx| ctx.pending_request())
            .expect("pending request");
        tracker.handle(
            Event::SetupComplete {
                apn_type: apn_type.clone(),
                request,
                result,
            },
            fx,
        );
    }

    fn connect(tracker: &mut Tracker, apn_type: &ApnType, fx: &mut Effects) {
        if state(tracker, apn_type) == State::Idle {
            tracker.apn_enable(apn_type, fx);
        }
        complete(tracker, apn_type, Ok(LinkProperties::default()), fx);
        assert_eq!(State::Connected, state(tracker, apn_type));
    }

    #[test]
    fn setup_waits_for_gates() {
        let mut tracker = Tracker::new(&settings()).expect("tracker");
        let mut fx = Effects::default();
        tracker.handle(Event::RadioAvailable, &mut fx);
        tracker.handle(Event::DataAttached, &mut fx);
        assert!(setups(&fx, &ApnType::DEFAULT).is_empty());
        tracker.handle(Event::RecordsLoaded, &mut fx);
        assert_eq!(1, setups(&fx, &ApnType::DEFAULT).len());
        assert_eq!(State::Connecting, state(&tracker, &ApnType::DEFAULT));
        // only auto enabled types start
        assert_eq!(State::Idle, state(&tracker, &ApnType::MMS));
    }

    #[test]
    fn enable_then_permanent_failure() {
        let (mut tracker, _) = tracker();
        let mut fx = Effects::default();
        assert_eq!(ApnEnable::Started, tracker.apn_enable(&ApnType::MMS, &mut fx));
        assert_eq!(1, setups(&fx, &ApnType::MMS).len());
        assert_eq!(State::Connecting, state(&tracker, &ApnType::MMS));

        complete(&mut tracker, &ApnType::MMS, Err(FailCause::UserAuthentication), &mut fx);
        assert_eq!(State::Failed, state(&tracker, &ApnType::MMS));
        assert_eq!(0, fx.scheduled().count());
        assert!(fx.notifications().any(|n| matches!(
            n,
            Notification::ApnFailed { apn_type, suppressed: true, .. } if *apn_type == ApnType::MMS
        )));
    }

    #[test]
    fn scans_alternate_profiles() {
        let (mut tracker, mut fx) = tracker();
        complete(&mut tracker, &ApnType::DEFAULT, Err(FailCause::Timeout), &mut fx);
        assert_eq!(State::Scanning, state(&tracker, &ApnType::DEFAULT));
        let names: Vec<&str> = setups(&fx, &ApnType::DEFAULT)
            .iter()
            .map(|profile| profile.name.as_str())
            .collect();
        assert_eq!(vec!["internet", "internet.backup"], names);

        complete(&mut tracker, &ApnType::DEFAULT, Err(FailCause::Timeout), &mut fx);
        assert_eq!(State::Retrying, state(&tracker, &ApnType::DEFAULT));
        let (alarm, _) = fx.scheduled().next().expect("retry alarm");
        let alarm = alarm.clone();

        let mut fx = Effects::default();
        tracker.handle(Event::Alarm(alarm), &mut fx);
        assert_eq!(State::Connecting, state(&tracker, &ApnType::DEFAULT));
        assert_eq!(1, setups(&fx, &ApnType::DEFAULT).len());

        connect(&mut tracker, &ApnType::DEFAULT, &mut fx);
        assert_eq!(
            0,
            tracker.context(&ApnType::DEFAULT).map_or(1, |ctx| ctx.retry().count)
        );
    }

    #[test]
    fn default_policy_backs_off() {
        let (mut tracker, mut fx) = tracker();
        let mut delays = vec![];
        for _ in 0..3 {
            complete(&mut tracker, &ApnType::DEFAULT, Err(FailCause::Timeout), &mut fx);
            complete(&mut tracker, &ApnType::DEFAULT, Err(FailCause::Timeout), &mut fx);
            assert_eq!(State::Retrying, state(&tracker, &ApnType::DEFAULT));
            let (alarm, delay) = fx.scheduled().last().expect("retry alarm");
            let alarm = alarm.clone();
            delays.push(delay.base);
            fx = Effects::default();
            tracker.handle(Event::Alarm(alarm), &mut fx);
            assert_eq!(State::Connecting, state(&tracker, &ApnType::DEFAULT));
        }
        assert_eq!(
            vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(20)
            ],
            delays
        );
    }

    #[test]
    fn radio_available_rearms_exhausted_context() {
        let mut settings = settings();
        settings.retry.max_retries = 0;
        let (mut tracker, mut fx) = tracker_with(&settings);
        complete(&mut tracker, &ApnType::DEFAULT, Err(FailCause::Timeout), &mut fx);
        complete(&mut tracker, &ApnType::DEFAULT, Err(FailCause::Timeout), &mut fx);
        assert_eq!(State::Failed, state(&tracker, &ApnType::DEFAULT));
        assert!(tracker
            .context(&ApnType::DEFAULT)
            .map_or(false, |ctx| ctx.retry().suppressed));

        let mut fx = Effects::default();
        tracker.handle(Event::RadioAvailable, &mut fx);
        assert_eq!(State::Connecting, state(&tracker, &ApnType::DEFAULT));
        assert_eq!(1, setups(&fx, &ApnType::DEFAULT).len());
        assert!(tracker
            .context(&ApnType::DEFAULT)
            .map_or(false, |ctx| !ctx.retry().suppressed));
    }

    #[test]
    fn radio_available_keeps_permanent_rejection() {
        let (mut tracker, _) = tracker();
        let mut fx = Effects::default();
        tracker.apn_enable(&ApnType::MMS, &mut fx);
        complete(&mut tracker, &ApnType::MMS, Err(FailCause::UserAuthentication), &mut fx);
        assert_eq!(State::Failed, state(&tracker, &ApnType::MMS));

        let mut fx = Effects::default();
        tracker.handle(Event::RadioAvailable, &mut fx);
        assert_eq!(State::Failed, state(&tracker, &ApnType::MMS));
        assert!(setups(&fx, &ApnType::MMS).is_empty());
    }

    #[test]
    fn no_duplicate_setup_requests() {
        let (mut tracker, mut fx) = tracker();
        for _ in 0..3 {
            tracker.handle(
                Event::TrySetup {
                    apn_type: ApnType::DEFAULT,
                    reason: Reason::ApnEnabled,
                },
                &mut fx,
            );
            tracker.handle(Event::RadioAvailable, &mut fx);
        }
        assert_eq!(
            ApnEnable::AlreadyActive,
            tracker.apn_enable(&ApnType::DEFAULT, &mut fx)
        );
        assert_eq!(1, setups(&fx, &ApnType::DEFAULT).len());
    }

    #[test]
    fn voice_call_suspends_and_resumes() {
        let (mut tracker, mut fx) = tracker();
        connect(&mut tracker, &ApnType::DEFAULT, &mut fx);

        let mut fx = Effects::default();
        tracker.handle(Event::VoiceCallStarted { peer: false }, &mut fx);
        assert_eq!(State::Disconnecting, state(&tracker, &ApnType::DEFAULT));
        let handle = teardown(&fx, &ApnType::DEFAULT).expect("teardown request");

        let mut fx = Effects::default();
        tracker.handle(
            Event::TeardownComplete {
                apn_type: ApnType::DEFAULT,
                handle,
            },
            &mut fx,
        );
        assert_eq!(State::Idle, state(&tracker, &ApnType::DEFAULT));
        assert!(setups(&fx, &ApnType::DEFAULT).is_empty());

        tracker.handle(Event::VoiceCallEnded { peer: false }, &mut fx);
        assert_eq!(State::Connecting, state(&tracker, &ApnType::DEFAULT));
        assert_eq!(1, setups(&fx, &ApnType::DEFAULT).len());
    }

    #[test]
    fn concurrent_voice_data_keeps_connection() {
        let mut settings = settings();
        settings.voice.concurrent_voice_data = true;
        let (mut tracker, mut fx) = tracker_with(&settings);
        connect(&mut tracker, &ApnType::DEFAULT, &mut fx);
        tracker.handle(Event::VoiceCallStarted { peer: false }, &mut fx);
        assert_eq!(State::Connected, state(&tracker, &ApnType::DEFAULT));
    }

    #[test]
    fn peer_call_suspension_is_configurable() {
        let mut settings = settings();
        settings.voice.suspend_on_peer_call = false;
        let (mut tracker, mut fx) = tracker_with(&settings);
        connect(&mut tracker, &ApnType::DEFAULT, &mut fx);
        tracker.handle(Event::VoiceCallStarted { peer: true }, &mut fx);
        assert_eq!(State::Connected, state(&tracker, &ApnType::DEFAULT));
    }

    #[test]
    fn duplicate_bearer_request_is_coalesced() {
        let (mut tracker, mut fx) = tracker();
        connect(&mut tracker, &ApnType::DEFAULT, &mut fx);
        let mut fx = Effects::default();
        let qos = QosParams::new(1, 1);
        let first = tracker
            .request_bearer(&ApnType::DEFAULT, qos, &mut fx)
            .expect("first request");
        let second = tracker
            .request_bearer(&ApnType::DEFAULT, qos, &mut fx)
            .expect("second request");
        assert_eq!(first, second);
        assert_eq!(
            1,
            fx.radio_requests()
                .filter(|r| matches!(r, RadioRequest::ActivateBearer { .. }))
                .count()
        );
    }

    #[test]
    fn bearer_request_needs_connected_parent() {
        let (mut tracker, mut fx) = tracker();
        assert!(matches!(
            tracker.request_bearer(&ApnType::IMS, QosParams::new(1, 1), &mut fx),
            Err(Error::ParentNotConnected(_))
        ));
        assert!(matches!(
            tracker.request_bearer(&ApnType::new("nope"), QosParams::new(1, 1), &mut fx),
            Err(Error::UnknownApnType(_))
        ));
    }

    #[test]
    fn bearers_take_precedence_over_voice() {
        let (mut tracker, mut fx) = tracker();
        connect(&mut tracker, &ApnType::DEFAULT, &mut fx);
        connect(&mut tracker, &ApnType::IMS, &mut fx);
        let bearer = tracker
            .request_bearer(&ApnType::IMS, QosParams::new(1, 1), &mut fx)
            .expect("bearer");

        tracker.handle(Event::VoiceCallStarted { peer: false }, &mut fx);
        assert_eq!(State::Connected, state(&tracker, &ApnType::IMS));
        assert_eq!(State::Disconnecting, state(&tracker, &ApnType::DEFAULT));

        // once the bearer is gone the voice call suspends ims too
        tracker.handle(Event::BearerSetupComplete { bearer, result: Ok(()) }, &mut fx);
        tracker.handle(Event::ReleaseBearer(bearer), &mut fx);
        assert_eq!(State::Disconnecting, state(&tracker, &ApnType::IMS));
    }

    #[test]
    fn voice_takes_precedence_over_bearers() {
        let mut settings = settings();
        settings.voice.bearer_precedence = BearerPrecedence::Voice;
        let (mut tracker, mut fx) = tracker_with(&settings);
        connect(&mut tracker, &ApnType::IMS, &mut fx);
        tracker
            .request_bearer(&ApnType::IMS, QosParams::new(1, 1), &mut fx)
            .expect("bearer");

        tracker.handle(Event::VoiceCallStarted { peer: false }, &mut fx);
        assert_eq!(State::Disconnecting, state(&tracker, &ApnType::IMS));
        assert!(tracker.bearers().is_empty());
    }

    #[test]
    fn user_data_switch_spares_exempt_types() {
        let (mut tracker, mut fx) = tracker();
        connect(&mut tracker, &ApnType::DEFAULT, &mut fx);
        connect(&mut tracker, &ApnType::IMS, &mut fx);
        tracker.handle(Event::SetUserDataEnabled(false), &mut fx);
        assert_eq!(State::Disconnecting, state(&tracker, &ApnType::DEFAULT));
        assert_eq!(State::Connected, state(&tracker, &ApnType::IMS));
    }

    #[test]
    fn roaming_disconnects_disallowed_contexts() {
        let (mut tracker, mut fx) = tracker();
        connect(&mut tracker, &ApnType::DEFAULT, &mut fx);
        connect(&mut tracker, &ApnType::IMS, &mut fx);

        let mut fx = Effects::default();
        tracker.handle(Event::RoamingOn, &mut fx);
        assert_eq!(State::Disconnecting, state(&tracker, &ApnType::DEFAULT));
        assert_eq!(State::Connected, state(&tracker, &ApnType::IMS));
        let handle = teardown(&fx, &ApnType::DEFAULT).expect("teardown");
        tracker.handle(
            Event::TeardownComplete {
                apn_type: ApnType::DEFAULT,
                handle,
            },
            &mut fx,
        );
        assert_eq!(State::Idle, state(&tracker, &ApnType::DEFAULT));
        assert!(tracker.candidates(&ApnType::DEFAULT).is_empty());

        tracker.handle(Event::DataRoamingChanged(true), &mut fx);
        assert_eq!(State::Connecting, state(&tracker, &ApnType::DEFAULT));
    }

    #[test]
    fn radio_off_forces_idle() {
        let (mut tracker, mut fx) = tracker();
        connect(&mut tracker, &ApnType::DEFAULT, &mut fx);
        tracker
            .request_bearer(&ApnType::DEFAULT, QosParams::new(1, 1), &mut fx)
            .expect("bearer");

        let mut fx = Effects::default();
        tracker.handle(Event::RadioOffOrNotAvailable, &mut fx);
        assert_eq!(State::Idle, state(&tracker, &ApnType::DEFAULT));
        assert!(tracker.bearers().is_empty());
        assert!(fx
            .radio_requests()
            .any(|r| matches!(r, RadioRequest::DeactivateData { forced: true, .. })));

        tracker.handle(Event::RadioAvailable, &mut fx);
        assert_eq!(State::Connecting, state(&tracker, &ApnType::DEFAULT));
    }

    #[test]
    fn apn_change_during_setup_tears_down_first() {
        let (mut tracker, _) = tracker();
        let mut fx = Effects::default();
        let fresh = ApnProfile::new("fresh", &[ApnType::DEFAULT]);
        tracker.handle(Event::ApnListChanged(vec![fresh.clone()]), &mut fx);
        assert_eq!(State::Disconnecting, state(&tracker, &ApnType::DEFAULT));

        // the old setup lands and is torn down before reconnecting
        complete(&mut tracker, &ApnType::DEFAULT, Ok(LinkProperties::default()), &mut fx);
        let handle = teardown(&fx, &ApnType::DEFAULT).expect("teardown");
        tracker.handle(
            Event::TeardownComplete {
                apn_type: ApnType::DEFAULT,
                handle,
            },
            &mut fx,
        );
        assert_eq!(State::Connecting, state(&tracker, &ApnType::DEFAULT));
        assert_eq!(Some(&&fresh), setups(&fx, &ApnType::DEFAULT).last());
    }

    #[test]
    fn apn_change_registers_new_types() {
        let (mut tracker, mut fx) = tracker();
        let vsim = ApnType::new("vsim");
        tracker.handle(
            Event::ApnListChanged(vec![ApnProfile::new("vsim.apn", &[vsim.clone()])]),
            &mut fx,
        );
        assert_eq!(Some(17), tracker.registry().id(&vsim));
        assert_eq!(State::Idle, state(&tracker, &vsim));
        assert_eq!(ApnEnable::Started, tracker.apn_enable(&vsim, &mut fx));
    }

    #[test]
    fn extra_types_from_settings() {
        let mut settings = settings();
        settings.apn.extra_types = vec![ApnType::new("vsim")];
        let tracker = Tracker::new(&settings).expect("tracker");
        assert_eq!(Some(17), tracker.registry().id(&ApnType::new("vsim")));
        assert!(tracker.context(&ApnType::new("vsim")).is_some());
    }

    #[test]
    fn enable_replies() {
        let (mut tracker, mut fx) = tracker();
        assert_eq!(
            ApnEnable::NotAvailable,
            tracker.apn_enable(&ApnType::new("nope"), &mut fx)
        );
        // no profile serves dun
        assert_eq!(ApnEnable::Failed, tracker.apn_enable(&ApnType::DUN, &mut fx));
        assert_eq!(
            Some(FailCause::NoApnProfile),
            tracker.context(&ApnType::DUN).and_then(|ctx| ctx.last_cause())
        );
    }

    #[test]
    fn reenable_clears_rejections() {
        let (mut tracker, mut fx) = tracker();
        tracker.apn_enable(&ApnType::MMS, &mut fx);
        complete(&mut tracker, &ApnType::MMS, Err(FailCause::MissingUnknownApn), &mut fx);
        assert!(tracker.candidates(&ApnType::MMS).is_empty());

        // radio coming back does not undo a permanent rejection
        tracker.handle(Event::RadioAvailable, &mut fx);
        assert_eq!(State::Failed, state(&tracker, &ApnType::MMS));

        assert_eq!(ApnEnable::Started, tracker.apn_enable(&ApnType::MMS, &mut fx));
        assert_eq!(State::Connecting, state(&tracker, &ApnType::MMS));
    }

    #[test]
    fn clean_up_does_not_reconnect() {
        let (mut tracker, mut fx) = tracker();
        connect(&mut tracker, &ApnType::DEFAULT, &mut fx);
        let mut fx = Effects::default();
        tracker.handle(Event::CleanUpAll(Reason::CleanUp), &mut fx);
        let handle = teardown(&fx, &ApnType::DEFAULT).expect("teardown");
        tracker.handle(
            Event::TeardownComplete {
                apn_type: ApnType::DEFAULT,
                handle,
            },
            &mut fx,
        );
        assert_eq!(State::Idle, state(&tracker, &ApnType::DEFAULT));
        assert!(setups(&fx, &ApnType::DEFAULT).is_empty());

        tracker.handle(
            Event::TrySetup {
                apn_type: ApnType::DEFAULT,
                reason: Reason::ApnEnabled,
            },
            &mut fx,
        );
        assert_eq!(State::Connecting, state(&tracker, &ApnType::DEFAULT));
    }

    #[test]
    fn disconnect_retrying_cancels_alarm() {
        let (mut tracker, mut fx) = tracker();
        complete(&mut tracker, &ApnType::DEFAULT, Err(FailCause::Timeout), &mut fx);
        complete(&mut tracker, &ApnType::DEFAULT, Err(FailCause::Timeout), &mut fx);
        let alarm = fx
            .scheduled()
            .next()
            .map(|(alarm, _)| alarm.clone())
            .expect("alarm");

        tracker.handle(Event::DisconnectRetrying(ApnType::DEFAULT), &mut fx);
        assert_eq!(State::Idle, state(&tracker, &ApnType::DEFAULT));
        assert!(fx.iter().any(|e| *e == Effect::Cancel(alarm.id)));

        let mut fx = Effects::default();
        tracker.handle(Event::Alarm(alarm), &mut fx);
        assert!(fx.is_empty());
    }

    #[test]
    fn fail_fast_ends_retries() {
        let (mut tracker, mut fx) = tracker();
        complete(&mut tracker, &ApnType::DEFAULT, Err(FailCause::Timeout), &mut fx);
        complete(&mut tracker, &ApnType::DEFAULT, Err(FailCause::Timeout), &mut fx);
        assert_eq!(State::Retrying, state(&tracker, &ApnType::DEFAULT));
        tracker.handle(Event::SetFailFast(true), &mut fx);
        assert_eq!(State::Failed, state(&tracker, &ApnType::DEFAULT));
    }

    #[test]
    fn dependency_unmet_disconnects() {
        let (mut tracker, mut fx) = tracker();
        connect(&mut tracker, &ApnType::DEFAULT, &mut fx);
        tracker.handle(
            Event::SetDependencyMet {
                apn_type: ApnType::DEFAULT,
                met: false,
            },
            &mut fx,
        );
        assert_eq!(State::Disconnecting, state(&tracker, &ApnType::DEFAULT));
    }

    #[test]
    fn emergency_ignores_ps_restriction() {
        let (mut tracker, mut fx) = tracker();
        tracker.handle(Event::PsRestrictEnabled, &mut fx);
        tracker.handle(Event::SetPolicyDataEnabled(false), &mut fx);
        assert_eq!(ApnEnable::Started, tracker.apn_enable(&ApnType::MMS, &mut fx));
        assert_eq!(State::Idle, state(&tracker, &ApnType::MMS));
        tracker.apn_enable(&ApnType::EMERGENCY, &mut fx);
        assert_eq!(State::Connecting, state(&tracker, &ApnType::EMERGENCY));
    }

    #[test]
    fn connection_loss_retries() {
        let (mut tracker, mut fx) = tracker();
        connect(&mut tracker, &ApnType::DEFAULT, &mut fx);
        let handle = tracker
            .context(&ApnType::DEFAULT)
            .and_then(|ctx| ctx.connection_handle())
            .expect("handle");
        tracker.handle(
            Event::ConnectionLost {
                apn_type: ApnType::DEFAULT,
                handle,
                cause: FailCause::SignalLost,
            },
            &mut fx,
        );
        assert_eq!(State::Retrying, state(&tracker, &ApnType::DEFAULT));
    }

    #[test]
    fn network_bearers_follow_parent() {
        let (mut tracker, mut fx) = tracker();
        connect(&mut tracker, &ApnType::IMS, &mut fx);
        tracker.handle(
            Event::BearerActivatedByNetwork {
                parent: ApnType::IMS,
                qos: QosParams::new(1, 3),
            },
            &mut fx,
        );
        assert_eq!(
            Some(BearerState::Active),
            tracker.bearers().iter().next().map(|bearer| bearer.state)
        );
        tracker.handle(Event::DisableApn(ApnType::IMS), &mut fx);
        assert!(tracker.bearers().is_empty());
    }

    #[test]
    fn status_reports_contexts() {
        let (tracker, _) = tracker();
        let status = tracker.status();
        assert_eq!(tracker.registry().len(), status.contexts.len());
        let default = status
            .contexts
            .iter()
            .find(|ctx| ctx.apn_type == ApnType::DEFAULT)
            .expect("default");
        assert_eq!(DataState::Connecting, default.data_state);
        assert_eq!(Some("internet"), default.profile.as_deref());
        assert!(serde_json::to_value(&status).is_ok());
    }
}
