//! Leading/trailing throttle.
//!
//! Storage events can arrive in bursts (a login flow may write, clear and
//! rewrite the token within a few milliseconds). [`Throttle`] runs its action
//! immediately when the previous run is older than the interval; otherwise it
//! schedules exactly one trailing run at the end of the window, and every
//! further trigger inside that window is absorbed by the pending run.
//!
//! ```text
//! trigger:  x      x x x x              x
//! runs:     ▲ ───interval─── ▲          ▲
//!        leading          trailing   leading
//! ```

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::Instant};

/// What a call to [`Throttle::trigger`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The action ran synchronously inside `trigger`.
    Immediate,
    /// A trailing run was scheduled for the end of the window.
    Scheduled,
    /// A trailing run was already pending and absorbs this trigger.
    Coalesced,
}

type Action = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct ThrottleState {
    last_run: Option<Instant>,
    trailing: Option<JoinHandle<()>>,
}

/// Coalescing throttle around a synchronous action.
pub struct Throttle {
    interval: Duration,
    action: Action,
    state: Arc<Mutex<ThrottleState>>,
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("interval", &self.interval)
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}

impl Throttle {
    /// Creates a throttle that runs `action` at most once per `interval`,
    /// plus one trailing run for triggers that land inside the window.
    pub fn new(interval: Duration, action: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            interval,
            action: Arc::new(action),
            state: Arc::new(Mutex::new(ThrottleState::default())),
        }
    }

    /// Minimum spacing between runs.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `true` while a trailing run is scheduled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state.lock().trailing.is_some()
    }

    /// Requests a run of the action.
    ///
    /// Scheduling a trailing run needs a Tokio runtime; outside one the
    /// action runs immediately instead.
    pub fn trigger(&self) -> TriggerOutcome {
        let mut state = self.state.lock();
        if state.trailing.is_some() {
            tracing::trace!("throttle trigger absorbed by pending trailing run");
            return TriggerOutcome::Coalesced;
        }

        let now = Instant::now();
        let due = state.last_run.map(|last| last + self.interval).filter(|due| *due > now);
        match (due, tokio::runtime::Handle::try_current()) {
            (Some(due), Ok(runtime)) => {
                let shared = Arc::clone(&self.state);
                let action = Arc::clone(&self.action);
                state.trailing = Some(runtime.spawn(async move {
                    tokio::time::sleep_until(due).await;
                    {
                        let mut state = shared.lock();
                        state.trailing = None;
                        state.last_run = Some(Instant::now());
                    }
                    action();
                }));
                let delay = due.saturating_duration_since(now);
                tracing::debug!(
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "throttle scheduled trailing run"
                );
                TriggerOutcome::Scheduled
            },
            _ => {
                state.last_run = Some(now);
                drop(state);
                (self.action)();
                TriggerOutcome::Immediate
            },
        }
    }

    /// Cancels a pending trailing run, if any.
    pub fn cancel(&self) {
        if let Some(handle) = self.state.lock().trailing.take() {
            handle.abort();
        }
    }
}

impl Drop for Throttle {
    fn drop(&mut self) {
        self.cancel();
    }
}
