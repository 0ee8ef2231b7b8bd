//! Transitions of a single apn context.
//!
//! Every function here is total over the context states: an event that does
//! not apply to the current state is logged and ignored. Gating decisions (is
//! the context wanted, is setup allowed, which profiles are candidates) are
//! made by the tracker and passed in.

use crate::{
    context::{ApnContext, Connection, PendingSetup},
    effect::{Effects, Notification, RadioRequest},
    event::{Alarm, AlarmId, AlarmKind, ConnectionHandle, Ids, Reason, RequestId, SetupResult},
    retry::{RetryDecision, RetryPolicy},
    Activity, ApnProfile, FailCause, FailureClass, State,
};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Tracker state a transition may read or allocate from.
pub struct Env<'a> {
    pub ids: &'a mut Ids,
    pub fx: &'a mut Effects,
    pub policy: &'a RetryPolicy,
    pub fail_fast: bool,
}

fn set_state(ctx: &mut ApnContext, state: State, reason: Reason, fx: &mut Effects) {
    if ctx.state == state {
        return;
    }
    info!(apn_type = %ctx.apn_type, from = %ctx.state, to = %state, %reason, "state change");
    ctx.state = state;
    fx.notify(Notification::DataStateChanged {
        apn_type: ctx.apn_type.clone(),
        state,
        data_state: state.data_state(),
        reason,
    });
}

fn cancel_alarm(ctx: &mut ApnContext, fx: &mut Effects) {
    if let Some(alarm) = ctx.retry.alarm.take() {
        fx.cancel(alarm);
    }
    ctx.retry.due = None;
}

fn issue_setup(ctx: &mut ApnContext, env: &mut Env) {
    let Some(profile) = ctx.candidates.get(ctx.cursor).cloned() else {
        return;
    };
    let request = env.ids.request();
    debug!(apn_type = %ctx.apn_type, %request, apn = %profile, "setup request");
    env.fx.radio(RadioRequest::SetupData {
        request,
        apn_type: ctx.apn_type.clone(),
        profile: profile.clone(),
    });
    ctx.pending = Some(PendingSetup { request, profile });
}

fn start_scan(ctx: &mut ApnContext, candidates: Vec<ApnProfile>, reason: Reason, env: &mut Env) {
    ctx.candidates = candidates;
    ctx.cursor = 0;
    ctx.scan_permanent = true;
    if ctx.candidates.is_empty() {
        warn!(apn_type = %ctx.apn_type, "no apn profile available");
        ctx.last_cause = Some(FailCause::NoApnProfile);
        fail_scan(ctx, Reason::ApnFailed, env);
        return;
    }
    issue_setup(ctx, env);
    set_state(ctx, State::Connecting, reason, env.fx);
}

/// Starts setup on an idle context. Any other state already has setup in
/// hand, or is waiting on a retry or a re-arm, so the request is dropped.
/// Returns whether a setup request was issued.
pub fn try_setup(
    ctx: &mut ApnContext,
    candidates: Vec<ApnProfile>,
    reason: Reason,
    env: &mut Env,
) -> bool {
    match ctx.state {
        State::Idle => {
            start_scan(ctx, candidates, reason, env);
            ctx.pending.is_some()
        }
        State::Connecting
        | State::Scanning
        | State::Connected
        | State::Disconnecting
        | State::Failed
        | State::Retrying => {
            debug!(apn_type = %ctx.apn_type, state = %ctx.state, %reason, "ignoring setup");
            false
        }
    }
}

/// Runs out of candidates: FAILED, then RETRYING when the policy allows.
fn fail_scan(ctx: &mut ApnContext, reason: Reason, env: &mut Env) {
    let cause = ctx.last_cause.unwrap_or(FailCause::Unknown(0));
    set_state(ctx, State::Failed, reason, env.fx);

    let class = if ctx.scan_permanent {
        FailureClass::Permanent
    } else {
        FailureClass::Transient
    };
    let decision = if env.fail_fast {
        RetryDecision::Suppressed
    } else {
        env.policy.next(ctx.retry.count, class)
    };
    match decision {
        RetryDecision::Retry(delay) => {
            let alarm = Alarm {
                id: env.ids.alarm(),
                kind: AlarmKind::Retry(ctx.apn_type.clone()),
            };
            ctx.retry.count += 1;
            ctx.retry.alarm = Some(alarm.id);
            ctx.retry.due = Some(Instant::now() + delay.base);
            info!(
                apn_type = %ctx.apn_type,
                retry = ctx.retry.count,
                delay_ms = delay.base.as_millis() as u64,
                %cause,
                "scheduling retry"
            );
            env.fx.schedule(alarm, delay);
            env.fx.notify(Notification::ApnFailed {
                apn_type: ctx.apn_type.clone(),
                cause,
                suppressed: false,
            });
            set_state(ctx, State::Retrying, reason, env.fx);
        }
        RetryDecision::Exhausted | RetryDecision::Suppressed => {
            warn!(apn_type = %ctx.apn_type, %cause, ?decision, "giving up");
            ctx.retry.suppressed = true;
            env.fx.notify(Notification::ApnFailed {
                apn_type: ctx.apn_type.clone(),
                cause,
                suppressed: true,
            });
        }
    }
}

/// Handles a setup completion. Returns true when the completion finished a
/// teardown that was requested while setup was in flight.
pub fn setup_complete(
    ctx: &mut ApnContext,
    request: RequestId,
    result: SetupResult,
    env: &mut Env,
) -> bool {
    if ctx.pending_request() != Some(request) {
        debug!(apn_type = %ctx.apn_type, %request, "ignoring stale setup completion");
        return false;
    }
    let Some(pending) = ctx.pending.take() else {
        return false;
    };
    match (ctx.state, result) {
        (State::Connecting | State::Scanning, Ok(link)) => {
            let handle = env.ids.connection();
            info!(apn_type = %ctx.apn_type, %handle, apn = %pending.profile, "connected");
            ctx.connection = Some(Connection {
                handle,
                profile: pending.profile,
                link,
                established: Instant::now(),
            });
            ctx.retry.count = 0;
            ctx.retry.suppressed = false;
            ctx.last_cause = None;
            set_state(ctx, State::Connected, Reason::Connected, env.fx);
            false
        }
        (State::Connecting | State::Scanning, Err(cause)) => {
            info!(apn_type = %ctx.apn_type, apn = %pending.profile, %cause, "setup failed");
            if cause.is_permanent() {
                ctx.rejected.push(pending.profile.name);
            } else {
                ctx.scan_permanent = false;
            }
            ctx.last_cause = Some(cause);
            if ctx.cursor + 1 < ctx.candidates.len() {
                ctx.cursor += 1;
                issue_setup(ctx, env);
                set_state(ctx, State::Scanning, Reason::ApnFailed, env.fx);
            } else {
                fail_scan(ctx, Reason::ApnFailed, env);
            }
            false
        }
        (State::Disconnecting, Ok(link)) => {
            // disabled while setting up, tear the new connection down
            let handle = env.ids.connection();
            env.fx.radio(RadioRequest::DeactivateData {
                apn_type: ctx.apn_type.clone(),
                handle,
                forced: false,
            });
            ctx.connection = Some(Connection {
                handle,
                profile: pending.profile,
                link,
                established: Instant::now(),
            });
            false
        }
        (State::Disconnecting, Err(_)) => {
            let reason = ctx.teardown_reason.unwrap_or(Reason::CleanUp);
            set_state(ctx, State::Idle, reason, env.fx);
            true
        }
        (state, _) => {
            warn!(apn_type = %ctx.apn_type, %state, %request, "setup completion in unexpected state");
            false
        }
    }
}

/// Tears a context down. A connected context asks the radio for teardown, an
/// in flight setup is allowed to complete first, a pending retry is dropped.
pub fn disable(ctx: &mut ApnContext, reason: Reason, env: &mut Env) {
    match ctx.state {
        State::Connected => {
            if let Some(connection) = &ctx.connection {
                env.fx.radio(RadioRequest::DeactivateData {
                    apn_type: ctx.apn_type.clone(),
                    handle: connection.handle,
                    forced: false,
                });
            }
            ctx.teardown_reason = Some(reason);
            set_state(ctx, State::Disconnecting, reason, env.fx);
        }
        State::Connecting | State::Scanning => {
            ctx.teardown_reason = Some(reason);
            set_state(ctx, State::Disconnecting, reason, env.fx);
        }
        State::Retrying => {
            cancel_alarm(ctx, env.fx);
            set_state(ctx, State::Idle, reason, env.fx);
        }
        State::Idle | State::Disconnecting | State::Failed => {
            debug!(apn_type = %ctx.apn_type, state = %ctx.state, %reason, "ignoring disable")
        }
    }
}

/// Returns true when the teardown completed and the context is IDLE again.
pub fn teardown_complete(ctx: &mut ApnContext, handle: ConnectionHandle, env: &mut Env) -> bool {
    let matches = ctx
        .connection
        .as_ref()
        .map_or(false, |connection| connection.handle == handle);
    if ctx.state != State::Disconnecting || !matches {
        debug!(apn_type = %ctx.apn_type, %handle, state = %ctx.state, "ignoring teardown completion");
        return false;
    }
    ctx.connection = None;
    ctx.activity = Activity::None;
    let reason = ctx.teardown_reason.unwrap_or(Reason::CleanUp);
    set_state(ctx, State::Idle, reason, env.fx);
    true
}

/// Radio went away. Everything is dropped without waiting for the network.
pub fn radio_off(ctx: &mut ApnContext, env: &mut Env) {
    if ctx.state == State::Idle {
        return;
    }
    cancel_alarm(ctx, env.fx);
    let had_setup = ctx.pending.take().is_some();
    let had_data_path = had_setup || ctx.connection.is_some();
    if let Some(connection) = ctx.connection.take() {
        env.fx.radio(RadioRequest::DeactivateData {
            apn_type: ctx.apn_type.clone(),
            handle: connection.handle,
            forced: true,
        });
    }
    ctx.activity = Activity::None;
    ctx.teardown_reason = None;
    if had_data_path {
        set_state(ctx, State::Disconnecting, Reason::RadioTurnedOff, env.fx);
    }
    set_state(ctx, State::Idle, Reason::RadioTurnedOff, env.fx);
}

/// The network dropped a live connection.
pub fn connection_lost(
    ctx: &mut ApnContext,
    handle: ConnectionHandle,
    cause: FailCause,
    env: &mut Env,
) -> bool {
    let matches = ctx
        .connection
        .as_ref()
        .map_or(false, |connection| connection.handle == handle);
    if !matches {
        debug!(apn_type = %ctx.apn_type, %handle, "ignoring loss of unknown connection");
        return false;
    }
    match ctx.state {
        State::Connected => {
            warn!(apn_type = %ctx.apn_type, %handle, %cause, "connection lost");
            ctx.connection = None;
            ctx.activity = Activity::None;
            ctx.last_cause = Some(cause);
            ctx.scan_permanent = cause.is_permanent();
            fail_scan(ctx, Reason::LostConnection, env);
            false
        }
        // the teardown we asked for got there first
        State::Disconnecting => teardown_complete(ctx, handle, env),
        state => {
            debug!(apn_type = %ctx.apn_type, %state, "ignoring connection loss");
            false
        }
    }
}

/// Fires a retry alarm. Stale alarms are ignored. When setup is no longer
/// allowed the context drops back to IDLE and waits for the gate to open.
pub fn retry_alarm(
    ctx: &mut ApnContext,
    alarm: AlarmId,
    allowed: bool,
    candidates: Vec<ApnProfile>,
    env: &mut Env,
) {
    if ctx.state != State::Retrying || ctx.retry.alarm != Some(alarm) {
        debug!(apn_type = %ctx.apn_type, %alarm, state = %ctx.state, "ignoring stale retry alarm");
        return;
    }
    ctx.retry.alarm = None;
    ctx.retry.due = None;
    if !allowed {
        info!(apn_type = %ctx.apn_type, "retry not allowed, waiting");
        set_state(ctx, State::Idle, Reason::RetryAlarm, env.fx);
        return;
    }
    start_scan(ctx, candidates, Reason::RetryAlarm, env);
}

/// Drops a pending retry and returns to IDLE.
pub fn cancel_retry(ctx: &mut ApnContext, reason: Reason, env: &mut Env) {
    if ctx.state != State::Retrying {
        debug!(apn_type = %ctx.apn_type, state = %ctx.state, "no retry to cancel");
        return;
    }
    cancel_alarm(ctx, env.fx);
    set_state(ctx, State::Idle, reason, env.fx);
}

/// Turns a pending retry into a terminal failure.
pub fn fail_fast(ctx: &mut ApnContext, env: &mut Env) {
    if ctx.state != State::Retrying {
        return;
    }
    cancel_alarm(ctx, env.fx);
    ctx.retry.suppressed = true;
    set_state(ctx, State::Failed, Reason::FailFast, env.fx);
}

/// External re-arm. Clears the retry counter and suppression, and optionally
/// the permanent rejections. A FAILED context returns to IDLE, a RETRYING one
/// loses its alarm.
pub fn rearm(ctx: &mut ApnContext, clear_rejections: bool, reason: Reason, env: &mut Env) {
    ctx.retry.count = 0;
    ctx.retry.suppressed = false;
    if clear_rejections {
        ctx.rejected.clear();
    }
    match ctx.state {
        State::Failed => set_state(ctx, State::Idle, reason, env.fx),
        State::Retrying => {
            cancel_alarm(ctx, env.fx);
            set_state(ctx, State::Idle, reason, env.fx);
        }
        State::Idle
        | State::Connecting
        | State::Scanning
        | State::Connected
        | State::Disconnecting => (),
    }
}

pub fn link_activity(ctx: &mut ApnContext, activity: Activity, fx: &mut Effects) {
    if ctx.state != State::Connected || ctx.activity == activity {
        return;
    }
    ctx.activity = activity;
    fx.notify(Notification::DataActivity {
        apn_type: ctx.apn_type.clone(),
        activity,
    });
}
