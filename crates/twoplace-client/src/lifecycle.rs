//! Per-call status machine.
//!
//! ```text
//! idle ──initiate──▶ calling ──┐
//!                              ├──accepted──▶ accepted ──┐
//! idle ──incoming──▶ ringing ──┘                         ├──▶ ended
//!          (reject / hangup / timeout / unload / remote) ┘
//! ```
//!
//! The controller owns the ring and sleep timers. Accepting or ending
//! cancels them; a timer that fires anyway finds the call no longer in a
//! state it can act on and does nothing.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use twoplace_shared::{CallId, Role, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Idle,
    Calling,
    Ringing,
    Accepted,
    Ended,
}

impl CallStatus {
    pub fn is_live(self) -> bool {
        matches!(self, CallStatus::Calling | CallStatus::Ringing | CallStatus::Accepted)
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallStatus::Idle => "idle",
            CallStatus::Calling => "calling",
            CallStatus::Ringing => "ringing",
            CallStatus::Accepted => "accepted",
            CallStatus::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Why a call ended, from this client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Hangup,
    Rejected,
    Timeout,
    Unload,
    /// The other participant (or another process) ended it.
    Remote,
    SleepTimer,
}

/// What status subscribers see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSnapshot {
    pub call_id: Option<CallId>,
    pub role: Option<Role>,
    pub partner: Option<UserId>,
    pub status: CallStatus,
    pub end_reason: Option<EndReason>,
}

impl CallSnapshot {
    pub fn idle() -> Self {
        Self {
            call_id: None,
            role: None,
            partner: None,
            status: CallStatus::Idle,
            end_reason: None,
        }
    }
}

struct LifecycleState {
    status: CallStatus,
    end_reason: Option<EndReason>,
    ring_timer: Option<JoinHandle<()>>,
    sleep_timer: Option<JoinHandle<()>>,
    sleep_minutes: Option<u32>,
}

pub struct Lifecycle {
    call_id: CallId,
    role: Role,
    partner: UserId,
    state: Mutex<LifecycleState>,
    status_tx: Arc<watch::Sender<CallSnapshot>>,
}

impl Lifecycle {
    /// Enter `calling` (caller) or `ringing` (callee) and publish it.
    pub fn start(
        call_id: CallId,
        role: Role,
        partner: UserId,
        status_tx: Arc<watch::Sender<CallSnapshot>>,
    ) -> Self {
        let status = match role {
            Role::Caller => CallStatus::Calling,
            Role::Callee => CallStatus::Ringing,
        };
        let lifecycle = Self {
            call_id,
            role,
            partner,
            state: Mutex::new(LifecycleState {
                status,
                end_reason: None,
                ring_timer: None,
                sleep_timer: None,
                sleep_minutes: None,
            }),
            status_tx,
        };
        lifecycle.status_tx.send_replace(lifecycle.snapshot(status, None));
        info!(call = %call_id, role = role.as_str(), %status, "call started");
        lifecycle
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn status(&self) -> CallStatus {
        self.lock().status
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.lock().end_reason
    }

    pub fn is_ended(&self) -> bool {
        self.status() == CallStatus::Ended
    }

    /// Hand the unanswered-call timer to the controller. Dropped on the spot
    /// if the call is already past ringing.
    pub fn arm_ring_timer(&self, timer: JoinHandle<()>) {
        let mut state = self.lock();
        if matches!(state.status, CallStatus::Calling | CallStatus::Ringing) {
            if let Some(old) = state.ring_timer.replace(timer) {
                old.abort();
            }
        } else {
            timer.abort();
        }
    }

    /// True while the ring timer may still end the call.
    pub fn ring_timer_applies(&self) -> bool {
        matches!(self.status(), CallStatus::Calling | CallStatus::Ringing)
    }

    /// Record the sleep timer length. Returns it if the call is accepted and
    /// the timer should be armed now.
    pub fn set_sleep_minutes(&self, minutes: u32) -> Option<u32> {
        let mut state = self.lock();
        if state.sleep_minutes == Some(minutes) || state.status == CallStatus::Ended {
            return None;
        }
        state.sleep_minutes = Some(minutes);
        (state.status == CallStatus::Accepted).then_some(minutes)
    }

    pub fn arm_sleep_timer(&self, timer: JoinHandle<()>) {
        let mut state = self.lock();
        if state.status == CallStatus::Accepted {
            if let Some(old) = state.sleep_timer.replace(timer) {
                old.abort();
            }
        } else {
            timer.abort();
        }
    }

    /// `calling|ringing -> accepted`. Cancels the ring timer. Returns the
    /// pending sleep timer length on the transition, `None` if this was not
    /// a transition.
    pub fn mark_accepted(&self) -> Option<Option<u32>> {
        let mut state = self.lock();
        if !matches!(state.status, CallStatus::Calling | CallStatus::Ringing) {
            return None;
        }
        state.status = CallStatus::Accepted;
        if let Some(timer) = state.ring_timer.take() {
            timer.abort();
        }
        let sleep = state.sleep_minutes;
        drop(state);

        self.publish(CallStatus::Accepted, None);
        info!(call = %self.call_id, "call accepted");
        Some(sleep)
    }

    /// Enter `ended`. Cancels every timer. Returns `true` exactly once per
    /// call; later calls (a second teardown path, a late timer) get `false`.
    pub fn mark_ended(&self, reason: EndReason) -> bool {
        let mut state = self.lock();
        if state.status == CallStatus::Ended {
            debug!(call = %self.call_id, ?reason, "already ended");
            return false;
        }
        state.status = CallStatus::Ended;
        state.end_reason = Some(reason);
        for timer in [state.ring_timer.take(), state.sleep_timer.take()]
            .into_iter()
            .flatten()
        {
            timer.abort();
        }
        drop(state);

        self.publish(CallStatus::Ended, Some(reason));
        info!(call = %self.call_id, ?reason, "call ended");
        true
    }

    fn snapshot(&self, status: CallStatus, end_reason: Option<EndReason>) -> CallSnapshot {
        CallSnapshot {
            call_id: Some(self.call_id),
            role: Some(self.role),
            partner: Some(self.partner.clone()),
            status,
            end_reason,
        }
    }

    /// Publish only while this call is the one subscribers are watching.
    fn publish(&self, status: CallStatus, end_reason: Option<EndReason>) {
        let next = self.snapshot(status, end_reason);
        self.status_tx.send_if_modified(|current| {
            if current.call_id != Some(self.call_id) {
                return false;
            }
            *current = next;
            true
        });
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        let state = self.lock();
        for timer in [&state.ring_timer, &state.sleep_timer].into_iter().flatten() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn channel() -> (Arc<watch::Sender<CallSnapshot>>, watch::Receiver<CallSnapshot>) {
        let (tx, rx) = watch::channel(CallSnapshot::idle());
        (Arc::new(tx), rx)
    }

    fn never() -> JoinHandle<()> {
        tokio::spawn(std::future::pending())
    }

    #[tokio::test]
    async fn caller_and_callee_start_states() {
        let (tx, rx) = channel();
        let caller = Lifecycle::start(CallId::new(), Role::Caller, UserId::from("b"), tx.clone());
        assert_eq!(rx.borrow().status, CallStatus::Calling);
        assert_eq!(caller.status(), CallStatus::Calling);

        let callee = Lifecycle::start(CallId::new(), Role::Callee, UserId::from("a"), tx);
        assert_eq!(rx.borrow().status, CallStatus::Ringing);
        assert_eq!(rx.borrow().call_id, Some(callee.call_id()));
    }

    #[tokio::test]
    async fn live_until_ended() {
        let (tx, _rx) = channel();
        let lc = Lifecycle::start(CallId::new(), Role::Caller, UserId::from("b"), tx);
        assert!(lc.status().is_live());
        lc.mark_accepted();
        assert!(lc.status().is_live());
        lc.mark_ended(EndReason::Hangup);
        assert!(!lc.status().is_live());
        assert!(!CallStatus::Idle.is_live());
    }

    #[tokio::test]
    async fn ended_is_sticky() {
        let (tx, rx) = channel();
        let lc = Lifecycle::start(CallId::new(), Role::Callee, UserId::from("a"), tx);

        assert!(lc.mark_ended(EndReason::Rejected));
        assert!(!lc.mark_ended(EndReason::Timeout));
        assert!(lc.mark_accepted().is_none());

        assert_eq!(lc.status(), CallStatus::Ended);
        assert_eq!(lc.end_reason(), Some(EndReason::Rejected));
        assert_eq!(rx.borrow().end_reason, Some(EndReason::Rejected));
    }

    #[tokio::test]
    async fn accept_cancels_ring_timer() {
        let (tx, _rx) = channel();
        let lc = Lifecycle::start(CallId::new(), Role::Caller, UserId::from("b"), tx);
        let timer = never();
        let probe = timer.abort_handle();
        lc.arm_ring_timer(timer);

        assert_eq!(lc.mark_accepted(), Some(None));
        tokio::task::yield_now().await;
        assert!(probe.is_finished());
        assert!(!lc.ring_timer_applies());

        // Second acceptance is not a transition.
        assert!(lc.mark_accepted().is_none());
    }

    #[tokio::test]
    async fn end_cancels_every_timer() {
        let (tx, _rx) = channel();
        let lc = Lifecycle::start(CallId::new(), Role::Callee, UserId::from("a"), tx);
        let ring = never();
        let ring_probe = ring.abort_handle();
        lc.arm_ring_timer(ring);
        lc.mark_accepted();
        lc.set_sleep_minutes(5);
        let sleep = never();
        let sleep_probe = sleep.abort_handle();
        lc.arm_sleep_timer(sleep);

        lc.mark_ended(EndReason::Hangup);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(ring_probe.is_finished());
        assert!(sleep_probe.is_finished());
    }

    #[tokio::test]
    async fn late_timer_after_end_is_dropped() {
        let (tx, _rx) = channel();
        let lc = Lifecycle::start(CallId::new(), Role::Caller, UserId::from("b"), tx);
        lc.mark_ended(EndReason::Hangup);

        let timer = never();
        let probe = timer.abort_handle();
        lc.arm_ring_timer(timer);
        tokio::task::yield_now().await;
        assert!(probe.is_finished());
    }

    #[tokio::test]
    async fn sleep_minutes_armed_on_accept() {
        let (tx, _rx) = channel();
        let lc = Lifecycle::start(CallId::new(), Role::Caller, UserId::from("b"), tx);
        assert_eq!(lc.set_sleep_minutes(10), None);
        assert_eq!(lc.mark_accepted(), Some(Some(10)));
        assert_eq!(lc.set_sleep_minutes(10), None);
        assert_eq!(lc.set_sleep_minutes(20), Some(20));
    }

    #[tokio::test]
    async fn stale_call_does_not_overwrite_current() {
        let (tx, rx) = channel();
        let old = Lifecycle::start(CallId::new(), Role::Caller, UserId::from("b"), tx.clone());
        let new = Lifecycle::start(CallId::new(), Role::Caller, UserId::from("c"), tx);

        old.mark_ended(EndReason::Remote);
        assert_eq!(rx.borrow().call_id, Some(new.call_id()));
        assert_eq!(rx.borrow().status, CallStatus::Calling);
    }
}
