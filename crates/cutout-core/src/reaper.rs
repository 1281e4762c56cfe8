//! Idle reaper: evicts the model after a period without requests

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::lifecycle::LifecycleController;

/// Background task that checks for inactivity on a fixed interval.
///
/// Cancellation is only observed between ticks, so an unload that has
/// started always runs to completion.
pub struct IdleReaper {
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl IdleReaper {
    /// Start reaping `controller` every `interval`, unloading once it has
    /// been idle longer than `idle_timeout`.
    pub fn spawn(controller: LifecycleController, idle_timeout: Duration, interval: Duration) -> Self {
        info!(
            model = controller.model(),
            idle_timeout_secs = idle_timeout.as_secs(),
            interval_secs = interval.as_secs(),
            "idle reaper started"
        );
        Self::spawn_with(interval, move || {
            if controller.is_loaded() && controller.unload_if_idle(idle_timeout) {
                info!(model = controller.model(), "evicted idle model");
            }
        })
    }

    fn spawn_with<F>(interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                // A failing tick must not end the loop
                if let Err(panic) = catch_unwind(AssertUnwindSafe(&mut tick)) {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".into());
                    error!(error = %msg, "idle reaper tick failed");
                }
            }
            debug!("idle reaper stopped");
        });

        Self {
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Cancel the task and wait for it to exit. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "idle reaper task ended abnormally");
            }
        }
    }
}

impl Drop for IdleReaper {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
