//! Background-removal service facade
//!
//! Ties the lifecycle controller, executor, idle reaper and batch
//! coordinator together behind the calls the surrounding service layer uses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{ImageBuffer, ModelSession, SegmentationBackend};
use crate::batch::{check_batch_size, fan_out};
use crate::config::{LoadPolicy, RemoverConfig};
use crate::error::{RemoverError, Result};
use crate::executor::BoundedExecutor;
use crate::health::StatusSnapshot;
use crate::lifecycle::{LifecycleController, ServiceState};
use crate::reaper::IdleReaper;
use crate::request::{timed, RequestId};

struct RemoverInner {
    config: RemoverConfig,
    controller: LifecycleController,
    executor: Arc<BoundedExecutor>,
    reaper: Mutex<Option<IdleReaper>>,
    initialized: AtomicBool,
    shut_down: AtomicBool,
}

/// Background remover with a lazily loaded, idle-evicted model.
///
/// This type is cheaply cloneable; all clones share the same underlying state.
#[derive(Clone)]
pub struct BackgroundRemover {
    inner: Arc<RemoverInner>,
}

impl BackgroundRemover {
    pub fn new(config: RemoverConfig, backend: Arc<dyn SegmentationBackend>) -> Result<Self> {
        config.validate()?;

        let executor = Arc::new(BoundedExecutor::new(config.max_concurrency));
        let controller = LifecycleController::new(
            backend,
            executor.clone(),
            config.model.clone(),
            config.cache_dir.clone(),
        );

        info!(
            model = %config.model,
            workers = executor.worker_count(),
            idle_timeout_secs = config.idle_timeout_secs,
            policy = ?config.load_policy,
            "background remover created"
        );

        Ok(Self {
            inner: Arc::new(RemoverInner {
                config,
                controller,
                executor,
                reaper: Mutex::new(None),
                initialized: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &RemoverConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ServiceState {
        self.inner.controller.state()
    }

    /// Start the service.
    ///
    /// Lazy policy: starts the idle reaper; the model loads on first use.
    /// Eager policy: loads the model now and keeps it resident.
    /// Calling it again after success is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(RemoverError::NotReady("service has been shut down".into()));
        }
        if self.inner.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }

        match self.inner.config.load_policy {
            LoadPolicy::Lazy => {
                let mut reaper = self.inner.reaper.lock();
                // cleanup() takes this lock after setting `shut_down`
                if self.inner.shut_down.load(Ordering::SeqCst) {
                    return Err(RemoverError::NotReady("service has been shut down".into()));
                }
                if reaper.is_none() {
                    *reaper = Some(IdleReaper::spawn(
                        self.inner.controller.clone(),
                        self.inner.config.idle_timeout(),
                        self.inner.config.reaper_interval(),
                    ));
                }
            }
            LoadPolicy::Eager => {
                let id = RequestId::generate();
                timed("Model initialization", &id, self.inner.controller.ensure_loaded()).await?;
            }
        }

        self.inner.initialized.store(true, Ordering::SeqCst);
        info!(model = %self.inner.config.model, "background remover initialized");
        Ok(())
    }

    /// Remove the background from a single image.
    pub async fn remove_background(
        &self,
        image: ImageBuffer,
        request_id: Option<RequestId>,
    ) -> Result<ImageBuffer> {
        let request_id = request_id.unwrap_or_else(RequestId::generate);
        self.check_ready()?;
        self.inner.controller.touch();

        timed("Background removal", &request_id, async {
            let session = self.inner.controller.lease().await?;
            self.process_item(session, image, request_id.clone()).await
        })
        .await
    }

    /// Remove backgrounds from several images concurrently.
    ///
    /// All-or-nothing: if any image fails the whole call fails with the first
    /// failure observed. Results are in input order.
    pub async fn remove_background_batch(
        &self,
        images: Vec<ImageBuffer>,
        request_id: Option<RequestId>,
    ) -> Result<Vec<ImageBuffer>> {
        let batch_id = request_id.unwrap_or_else(RequestId::generate);
        check_batch_size(images.len(), self.inner.config.max_batch_size)?;
        self.check_ready()?;
        self.inner.controller.touch();

        let operation = format!("Batch background removal ({} images)", images.len());
        timed(&operation, &batch_id, async {
            let session = self.inner.controller.lease().await?;
            fan_out(&batch_id, images, |image, item_id| {
                self.process_item(session.clone(), image, item_id)
            })
            .await
        })
        .await
    }

    /// Point-in-time status. Never blocks on a load and never changes state.
    pub fn health_check(&self) -> StatusSnapshot {
        let reaper_active = self
            .inner
            .reaper
            .lock()
            .as_ref()
            .is_some_and(IdleReaper::is_running);
        StatusSnapshot::capture(
            &self.inner.controller,
            &self.inner.executor,
            reaper_active,
            self.inner.config.idle_timeout(),
        )
    }

    /// Whether requests would currently be accepted
    pub fn is_ready(&self) -> bool {
        self.check_ready().is_ok()
    }

    /// Stop the reaper, release the model and shut down the executor, in
    /// that order. Step failures are logged, never returned. Safe to call
    /// more than once.
    pub async fn cleanup(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            debug!("background remover already cleaned up");
            return;
        }
        info!("shutting down background remover");

        let reaper = self.inner.reaper.lock().take();
        if let Some(reaper) = reaper {
            reaper.stop().await;
        }

        if self.inner.controller.close() {
            debug!("model released during cleanup");
        }

        if let Err(e) = self
            .inner
            .executor
            .shutdown(self.inner.config.shutdown_timeout())
            .await
        {
            warn!(error = %e, "cleanup step failed: executor shutdown");
        }

        info!("background remover cleaned up");
    }

    fn check_ready(&self) -> Result<()> {
        if self.inner.shut_down.load(Ordering::SeqCst) || !self.inner.executor.is_active() {
            return Err(RemoverError::NotReady("service has been shut down".into()));
        }
        if self.inner.config.load_policy == LoadPolicy::Eager
            && !self.inner.initialized.load(Ordering::SeqCst)
        {
            return Err(RemoverError::NotReady("service not initialized".into()));
        }
        Ok(())
    }

    async fn process_item(
        &self,
        session: Arc<dyn ModelSession>,
        image: ImageBuffer,
        request_id: RequestId,
    ) -> Result<ImageBuffer> {
        let job_id = request_id.clone();
        let job = self.inner.executor.run(&request_id, move || {
            session
                .infer(&image)
                .map_err(|e| RemoverError::processing(&job_id, e))
        });

        let output = match self.inner.config.request_timeout() {
            Some(limit) => tokio::time::timeout(limit, job).await.map_err(|_| {
                RemoverError::Timeout {
                    request_id: request_id.to_string(),
                    after: limit,
                }
            })??,
            None => job.await?,
        };

        debug!(request_id = %request_id, "Successfully processed image");
        Ok(output)
    }
}

impl std::fmt::Debug for BackgroundRemover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemover")
            .field("model", &self.inner.config.model)
            .field("state", &self.state())
            .field("ready", &self.is_ready())
            .finish()
    }
}
