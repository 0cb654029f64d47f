//! Scheduled ingestion.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use mailsift_core::{CancelHandle, Coordinator};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Watch loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// Pause between successful cycles, in seconds.
    pub interval_secs: u64,
    /// Consecutive retryable failures before waiting a full interval.
    pub max_attempts: u32,
    /// First retry delay, in seconds. Doubles on each further failure.
    pub initial_backoff_secs: u64,
    /// Longest retry delay, in seconds.
    pub max_backoff_secs: u64,
}

impl ScheduleSettings {
    /// Pause between cycles.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Delay before retry number `attempt` (starting at 1).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let secs = self
            .initial_backoff_secs
            .saturating_mul(factor)
            .min(self.max_backoff_secs);
        Duration::from_secs(secs)
    }
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_attempts: 5,
            initial_backoff_secs: 1,
            max_backoff_secs: 32,
        }
    }
}

/// Stop signal for the CLI: cancels the running cycle and wakes any sleep.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    cancel: CancelHandle,
    wake: Arc<Notify>,
}

impl Shutdown {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle passed to ingestion cycles.
    #[must_use]
    pub const fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    /// Requests shutdown.
    pub fn trigger(&self) {
        self.cancel.cancel();
        self.wake.notify_one();
    }

    /// Returns true once shutdown was requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sleeps for `duration`. Returns true if woken by shutdown instead.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => self.is_triggered(),
            () = self.wake.notified() => true,
        }
    }

    /// Triggers shutdown on Ctrl-C.
    pub fn trigger_on_ctrl_c(&self) {
        let shutdown = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, finishing messages in flight");
                shutdown.trigger();
            }
        });
    }
}

/// Runs ingestion cycles until shutdown or a non-retryable failure.
///
/// Retryable failures are retried with exponential backoff. After
/// `max_attempts` of them in a row the loop logs an error and waits a full
/// interval before trying again.
pub async fn run(
    coordinator: &Coordinator,
    schedule: &ScheduleSettings,
    shutdown: &Shutdown,
) -> Result<()> {
    info!(
        mailbox = coordinator.mailbox(),
        interval_secs = schedule.interval_secs,
        "Watching mailbox"
    );
    let mut failures = 0u32;

    while !shutdown.is_triggered() {
        let pause = match coordinator.run_cycle(shutdown.cancel_handle()).await {
            Ok(_) => {
                failures = 0;
                schedule.interval()
            }
            Err(e) if e.is_retryable() => {
                failures += 1;
                if failures >= schedule.max_attempts.max(1) {
                    error!(failures, "Giving up on this round after repeated failures: {e}");
                    failures = 0;
                    schedule.interval()
                } else {
                    let delay = schedule.backoff(failures);
                    warn!(failures, ?delay, "Cycle failed, retrying: {e}");
                    delay
                }
            }
            Err(e) => return Err(e.into()),
        };

        if shutdown.sleep(pause).await {
            break;
        }
    }

    info!("Watch stopped");
    Ok(())
}
