use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace};

use crate::controller::PaneId;

const COUNTDOWN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    /// Attempt 0 retries immediately; afterwards the delay doubles from `base`
    /// until it reaches `cap`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}

pub type CountdownCallback = Arc<dyn Fn(Duration) + Send + Sync>;

#[derive(Default)]
struct PaneBackoff {
    attempts: u32,
    cancelled: bool,
    ticket: u64,
    timer: Option<JoinHandle<()>>,
    countdown: Option<CountdownCallback>,
}

struct Inner {
    policy: BackoffPolicy,
    panes: Mutex<HashMap<PaneId, PaneBackoff>>,
}

/// Reconnect pacing shared by every pane of one orchestrator.
///
/// Counters, timers and cancellation are keyed by [`PaneId`], so one pane's
/// failures never stretch another pane's delay.
#[derive(Clone)]
pub struct BackoffCoordinator {
    inner: Arc<Inner>,
}

impl BackoffCoordinator {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                panes: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.inner.policy
    }

    pub fn attempts(&self, pane: PaneId) -> u32 {
        self.inner
            .panes
            .lock()
            .get(&pane)
            .map_or(0, |entry| entry.attempts)
    }

    pub fn increment(&self, pane: PaneId) -> u32 {
        let mut panes = self.inner.panes.lock();
        let entry = panes.entry(pane).or_default();
        entry.attempts = entry.attempts.saturating_add(1);
        trace!(
            target: "beach_panes::backoff",
            pane = pane.0,
            attempts = entry.attempts,
            "reconnect attempt recorded"
        );
        entry.attempts
    }

    /// Clears attempts and the cancelled flag without touching the countdown
    /// callback.
    pub fn reset_state(&self, pane: PaneId) {
        let mut panes = self.inner.panes.lock();
        let entry = panes.entry(pane).or_default();
        entry.attempts = 0;
        entry.cancelled = false;
    }

    pub fn successful_connection_reset(&self, pane: PaneId) {
        let had_attempts = self.attempts(pane);
        self.reset_state(pane);
        if had_attempts > 0 {
            debug!(
                target: "beach_panes::backoff",
                pane = pane.0,
                previous_attempts = had_attempts,
                "backoff reset after successful connection"
            );
        }
    }

    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.inner.policy.delay_for(attempt)
    }

    pub fn max_attempts(&self) -> u32 {
        self.inner.policy.max_attempts
    }

    pub fn is_max_attempts_reached(&self, pane: PaneId) -> bool {
        self.attempts(pane) >= self.inner.policy.max_attempts
    }

    pub fn is_cancelled(&self, pane: PaneId) -> bool {
        self.inner
            .panes
            .lock()
            .get(&pane)
            .is_some_and(|entry| entry.cancelled)
    }

    pub fn is_pending(&self, pane: PaneId) -> bool {
        self.inner
            .panes
            .lock()
            .get(&pane)
            .is_some_and(|entry| entry.timer.is_some())
    }

    pub fn set_countdown_callback<F>(&self, pane: PaneId, callback: F)
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        let mut panes = self.inner.panes.lock();
        panes.entry(pane).or_default().countdown = Some(Arc::new(callback));
    }

    /// Arms a timer for `backoff_delay(attempts(pane))` and runs `callback`
    /// exactly once when it elapses, unless cancelled or superseded by a newer
    /// schedule first. Requires a Tokio runtime.
    pub fn schedule_reconnect<F>(&self, pane: PaneId, callback: F) -> Duration
    where
        F: FnOnce() + Send + 'static,
    {
        let mut panes = self.inner.panes.lock();
        let entry = panes.entry(pane).or_default();
        let delay = self.inner.policy.delay_for(entry.attempts);
        if let Some(previous) = entry.timer.take() {
            previous.abort();
        }
        entry.cancelled = false;
        entry.ticket += 1;

        let ticket = entry.ticket;
        let countdown = entry.countdown.clone();
        let coordinator = self.clone();
        debug!(
            target: "beach_panes::backoff",
            pane = pane.0,
            attempts = entry.attempts,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );
        // The lock is held until the handle is stored, so `claim` in the task
        // always observes it.
        entry.timer = Some(tokio::spawn(async move {
            let deadline = Instant::now() + delay;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                if let Some(countdown) = countdown.as_ref() {
                    countdown(remaining);
                }
                sleep(remaining.min(COUNTDOWN_INTERVAL)).await;
            }
            if coordinator.claim(pane, ticket) {
                callback();
            }
        }));
        delay
    }

    /// Idempotent. After this returns no previously scheduled callback for the
    /// pane runs, even one whose timer already elapsed.
    pub fn cancel_reconnect(&self, pane: PaneId) {
        let mut panes = self.inner.panes.lock();
        let entry = panes.entry(pane).or_default();
        entry.cancelled = true;
        entry.ticket += 1;
        if let Some(timer) = entry.timer.take() {
            timer.abort();
            debug!(target: "beach_panes::backoff", pane = pane.0, "pending reconnect cancelled");
        }
    }

    /// Drops all bookkeeping for a torn-down pane.
    pub fn forget(&self, pane: PaneId) {
        if let Some(entry) = self.inner.panes.lock().remove(&pane) {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
        }
    }

    fn claim(&self, pane: PaneId, ticket: u64) -> bool {
        let mut panes = self.inner.panes.lock();
        match panes.get_mut(&pane) {
            Some(entry) if entry.ticket == ticket && !entry.cancelled => {
                entry.timer = None;
                true
            }
            _ => false,
        }
    }
}
