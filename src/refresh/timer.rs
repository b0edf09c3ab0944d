// =============================================================================
// Auto-refresh Timer — single-owner periodic trigger
// =============================================================================
//
// Wraps one background Tokio task that calls `on_tick` every `period`. The
// first tick fires one full period after `start`, never immediately, and a
// restart always begins a fresh period (no drift carried over).
//
// Dropping the timer stops it.
// =============================================================================

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

#[derive(Default)]
pub struct AutoRefreshTimer {
    handle: Option<JoinHandle<()>>,
    period: Option<Duration>,
}

impl AutoRefreshTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)start the timer at `period`, replacing any running schedule.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<F>(&mut self, period: Duration, on_tick: F)
    where
        F: Fn() + Send + 'static,
    {
        self.stop();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                on_tick();
            }
        });

        debug!(period_ms = period.as_millis() as u64, "auto-refresh timer started");
        self.handle = Some(handle);
        self.period = Some(period);
    }

    /// Cancel the schedule. A no-op when not running.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("auto-refresh timer stopped");
        }
        self.period = None;
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn period(&self) -> Option<Duration> {
        self.period
    }
}

impl Drop for AutoRefreshTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
