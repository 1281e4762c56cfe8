//! Bounded executor for blocking model work
//!
//! Model loads and inference calls are CPU/GPU bound and must never run on
//! the async control path. Jobs run on tokio's blocking threads, but only
//! `worker_count()` of them at a time: a caller waits for a free slot
//! instead of spawning more work, and the slot travels with the job so that
//! dropping the caller does not release it early.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{RemoverError, Result};
use crate::request::RequestId;

/// Hard cap on worker slots, regardless of configured concurrency
pub const MAX_WORKERS: usize = 4;

pub struct BoundedExecutor {
    slots: Arc<Semaphore>,
    workers: usize,
    accepting: AtomicBool,
}

impl BoundedExecutor {
    /// Create an executor with `min(max_concurrency, MAX_WORKERS)` slots
    /// (at least one).
    pub fn new(max_concurrency: usize) -> Self {
        let workers = max_concurrency.clamp(1, MAX_WORKERS);
        Self {
            slots: Arc::new(Semaphore::new(workers)),
            workers,
            accepting: AtomicBool::new(true),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Number of slots currently held by running jobs
    pub fn active_workers(&self) -> usize {
        self.workers.saturating_sub(self.slots.available_permits())
    }

    /// Whether new submissions are accepted
    pub fn is_active(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Run `job` on a worker thread once a slot is free.
    ///
    /// A panicking job is reported as `RemoverError::Processing` for
    /// `request_id`.
    pub async fn run<T, F>(&self, request_id: &RequestId, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if !self.is_active() {
            return Err(RemoverError::NotReady("executor is shut down".into()));
        }

        let slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RemoverError::NotReady("executor is shut down".into()))?;

        debug!(request_id = %request_id, active = self.active_workers(), "dispatching job");

        let handle = tokio::task::spawn_blocking(move || {
            let _slot = slot;
            job()
        });

        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(RemoverError::processing(
                request_id,
                format!("worker panicked: {}", panic_message(e.into_panic())),
            )),
            Err(e) => Err(RemoverError::processing(request_id, e)),
        }
    }

    /// Stop accepting work and wait up to `timeout` for running jobs to
    /// finish. Jobs already queued for a slot still run: permits are handed
    /// out in FIFO order, so the drain waits behind them. Calling it again
    /// is a no-op.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        info!(active = self.active_workers(), "shutting down executor");

        let drained = tokio::time::timeout(timeout, self.slots.acquire_many(self.workers as u32)).await;
        self.slots.close();

        match drained {
            Ok(_) => {
                info!("executor drained");
                Ok(())
            }
            Err(_) => {
                let still_running = self.active_workers();
                warn!(still_running, ?timeout, "executor did not drain in time");
                Err(RemoverError::Shutdown(format!(
                    "{} job(s) still running after {:?}",
                    still_running, timeout
                )))
            }
        }
    }
}

impl std::fmt::Debug for BoundedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedExecutor")
            .field("workers", &self.workers)
            .field("active", &self.active_workers())
            .field("accepting", &self.is_active())
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
