//! Lazy model lifecycle
//!
//! [`LifecycleController`] owns the single shared model session and the
//! `Unloaded → Loading → Loaded → Unloading → Unloaded` state machine:
//!
//! - `ensure_loaded()` checks an atomic mirror of the state first and only
//!   takes the mutex when the model is not loaded. Under the mutex the state
//!   is checked again; the first caller to find it unloaded starts the load,
//!   everyone else subscribes to that same in-flight load.
//! - The load itself runs on the [`BoundedExecutor`] and is driven by a
//!   detached task, so it always reaches `Loaded` or `Unloaded` even if every
//!   waiter goes away.
//! - Callers borrow the session as an `Arc` lease. Unloading clears the shared
//!   slot for future callers; leases already handed out stay valid and the
//!   model is freed when the last one is dropped.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backend::{ModelSession, SegmentationBackend};
use crate::error::{RemoverError, Result};
use crate::executor::BoundedExecutor;
use crate::request::RequestId;

/// Lifecycle state of the shared model session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ServiceState {
    Unloaded = 0,
    Loading = 1,
    Loaded = 2,
    Unloading = 3,
}

impl ServiceState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ServiceState::Loading,
            2 => ServiceState::Loaded,
            3 => ServiceState::Unloading,
            _ => ServiceState::Unloaded,
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceState::Unloaded => "unloaded",
            ServiceState::Loading => "loading",
            ServiceState::Loaded => "loaded",
            ServiceState::Unloading => "unloading",
        };
        f.write_str(s)
    }
}

/// `None` while the load is running, then the outcome every waiter receives
type LoadOutcome = Option<Result<()>>;

struct Slot {
    state: ServiceState,
    session: Option<Arc<dyn ModelSession>>,
    pending: Option<watch::Receiver<LoadOutcome>>,
    closed: bool,
}

struct ControllerInner {
    backend: Arc<dyn SegmentationBackend>,
    executor: Arc<BoundedExecutor>,
    model: String,
    cache_dir: PathBuf,
    slot: Mutex<Slot>,
    /// Mirror of `slot.state`, written only while holding `slot`
    state: AtomicU8,
    epoch: Instant,
    /// Milliseconds since `epoch` at the last accepted request
    last_used_ms: AtomicU64,
    loads: AtomicU64,
}

/// Owner of the shared model session.
///
/// This type is cheaply cloneable; all clones share the same state.
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<ControllerInner>,
}

impl LifecycleController {
    pub fn new(
        backend: Arc<dyn SegmentationBackend>,
        executor: Arc<BoundedExecutor>,
        model: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                backend,
                executor,
                model: model.into(),
                cache_dir: cache_dir.into(),
                slot: Mutex::new(Slot {
                    state: ServiceState::Unloaded,
                    session: None,
                    pending: None,
                    closed: false,
                }),
                state: AtomicU8::new(ServiceState::Unloaded as u8),
                epoch: Instant::now(),
                last_used_ms: AtomicU64::new(0),
                loads: AtomicU64::new(0),
            }),
        }
    }

    pub fn model(&self) -> &str {
        &self.inner.model
    }

    /// Point-in-time state, without locking
    pub fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == ServiceState::Loaded
    }

    /// Number of backend loads started so far
    pub fn load_count(&self) -> u64 {
        self.inner.loads.load(Ordering::Relaxed)
    }

    /// Record that a unit of work was accepted now.
    pub fn touch(&self) {
        let now = self.inner.epoch.elapsed().as_millis() as u64;
        self.inner.last_used_ms.store(now, Ordering::Relaxed);
    }

    /// Time since the last `touch()` (or since construction)
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.inner.last_used_ms.load(Ordering::Relaxed));
        self.inner.epoch.elapsed().saturating_sub(last)
    }

    /// Wait until the model is loaded, starting the load if nobody has.
    ///
    /// All callers that arrive while a load is running receive that load's
    /// outcome, including the same `RemoverError::Load` on failure.
    pub async fn ensure_loaded(&self) -> Result<()> {
        if self.is_loaded() {
            return Ok(());
        }

        let mut pending = {
            let mut slot = self.inner.slot.lock();
            if slot.closed {
                return Err(RemoverError::NotReady("model controller is closed".into()));
            }
            match slot.state {
                ServiceState::Loaded => return Ok(()),
                ServiceState::Loading => match slot.pending.clone() {
                    Some(rx) => rx,
                    None => self.begin_load(&mut slot),
                },
                ServiceState::Unloaded | ServiceState::Unloading => self.begin_load(&mut slot),
            }
        };

        let outcome = pending
            .wait_for(Option::is_some)
            .await
            .map_err(|_| RemoverError::Load("load task ended without reporting".into()))?
            .clone();

        outcome.unwrap_or_else(|| Err(RemoverError::Load("load outcome missing".into())))
    }

    /// Borrow the loaded session, loading it first if needed.
    pub async fn lease(&self) -> Result<Arc<dyn ModelSession>> {
        loop {
            self.ensure_loaded().await?;
            let session = self.inner.slot.lock().session.clone();
            if let Some(session) = session {
                return Ok(session);
            }
            // Evicted between the load and the lease
            debug!(model = %self.inner.model, "session evicted before lease, reloading");
        }
    }

    /// Release the shared session. Returns `false` when nothing was loaded.
    pub fn unload(&self) -> bool {
        let released = {
            let mut slot = self.inner.slot.lock();
            self.take_session(&mut slot)
        };
        self.finish_unload(released, "unload requested")
    }

    /// Release the session only if it is loaded and has been idle longer
    /// than `timeout`. Both conditions are re-checked under the lock.
    pub fn unload_if_idle(&self, timeout: Duration) -> bool {
        let released = {
            let mut slot = self.inner.slot.lock();
            if slot.state != ServiceState::Loaded || self.idle_for() <= timeout {
                return false;
            }
            self.take_session(&mut slot)
        };
        self.finish_unload(released, "idle timeout")
    }

    /// Refuse further loads and release the session. A load that is still
    /// running discards its result when it finishes.
    pub fn close(&self) -> bool {
        let released = {
            let mut slot = self.inner.slot.lock();
            slot.closed = true;
            self.take_session(&mut slot)
        };
        self.finish_unload(released, "shutdown")
    }

    pub fn is_closed(&self) -> bool {
        self.inner.slot.lock().closed
    }

    fn publish(&self, slot: &mut Slot, state: ServiceState) {
        slot.state = state;
        self.inner.state.store(state as u8, Ordering::Release);
    }

    fn take_session(&self, slot: &mut Slot) -> Option<Arc<dyn ModelSession>> {
        if slot.state != ServiceState::Loaded {
            return None;
        }
        self.publish(slot, ServiceState::Unloading);
        let session = slot.session.take();
        self.publish(slot, ServiceState::Unloaded);
        session
    }

    fn finish_unload(&self, released: Option<Arc<dyn ModelSession>>, reason: &str) -> bool {
        match released {
            Some(session) => {
                // Outstanding leases keep the session alive until they finish
                let leases = Arc::strong_count(&session) - 1;
                info!(
                    model = %self.inner.model,
                    reason,
                    leases_outstanding = leases,
                    idle_secs = self.idle_for().as_secs(),
                    "model unloaded"
                );
                drop(session);
                true
            }
            None => false,
        }
    }

    fn begin_load(&self, slot: &mut Slot) -> watch::Receiver<LoadOutcome> {
        let (tx, rx) = watch::channel(None);
        self.publish(slot, ServiceState::Loading);
        slot.pending = Some(rx.clone());

        let controller = self.clone();
        tokio::spawn(async move { controller.drive_load(tx).await });
        rx
    }

    async fn drive_load(self, tx: watch::Sender<LoadOutcome>) {
        let inner = &self.inner;
        let attempt = inner.loads.fetch_add(1, Ordering::Relaxed) + 1;
        let backend = inner.backend.clone();
        let model = inner.model.clone();
        let cache_dir = inner.cache_dir.clone();

        info!(model = %model, backend = backend.name(), attempt, "loading model");
        let started = Instant::now();

        let result = inner
            .executor
            .run(&RequestId::new(format!("load-{attempt}")), move || {
                std::fs::create_dir_all(&cache_dir).map_err(|e| {
                    RemoverError::Load(format!(
                        "cannot create cache directory {}: {}",
                        cache_dir.display(),
                        e
                    ))
                })?;
                backend
                    .load(&model, &cache_dir)
                    .map_err(|e| RemoverError::Load(e.to_string()))
            })
            .await
            .map_err(|e| match e {
                RemoverError::Load(_) | RemoverError::NotReady(_) => e,
                other => RemoverError::Load(other.to_string()),
            });

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let mut discarded = None;
        let outcome = {
            let mut slot = inner.slot.lock();
            slot.pending = None;
            match result {
                Ok(session) if !slot.closed => {
                    slot.session = Some(session);
                    self.publish(&mut slot, ServiceState::Loaded);
                    Ok(())
                }
                Ok(session) => {
                    discarded = Some(session);
                    self.publish(&mut slot, ServiceState::Unloaded);
                    Err(RemoverError::NotReady("shut down while the model was loading".into()))
                }
                Err(e) => {
                    slot.session = None;
                    self.publish(&mut slot, ServiceState::Unloaded);
                    Err(e)
                }
            }
        };
        drop(discarded);

        match &outcome {
            Ok(()) => info!(model = %inner.model, elapsed_ms, "model loaded"),
            Err(RemoverError::NotReady(_)) => {
                warn!(model = %inner.model, elapsed_ms, "model load discarded after shutdown")
            }
            Err(e) => error!(model = %inner.model, elapsed_ms, error = %e, "model load failed"),
        }

        // Nobody listening is fine: the state is already committed
        let _ = tx.send(Some(outcome));
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("model", &self.inner.model)
            .field("state", &self.state())
            .field("loads", &self.load_count())
            .finish()
    }
}
