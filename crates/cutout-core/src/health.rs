//! Point-in-time status reporting

use serde::Serialize;
use std::time::Duration;

use crate::executor::BoundedExecutor;
use crate::lifecycle::{LifecycleController, ServiceState};

/// Overall service health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Accepting work. The model may still be unloaded; it loads on demand.
    Healthy,
    /// Not accepting work
    Unhealthy,
}

/// Read-only snapshot of the runtime.
///
/// Built from atomic reads only, so taking one never waits on a load and
/// never changes state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: HealthStatus,
    pub loaded: bool,
    pub state: ServiceState,
    pub executor_active: bool,
    pub reaper_active: bool,
    pub idle_timeout: Duration,
    pub idle_for: Duration,
    pub model: String,
    pub max_concurrency: usize,
    pub active_workers: usize,
    pub load_count: u64,
}

impl StatusSnapshot {
    pub(crate) fn capture(
        controller: &LifecycleController,
        executor: &BoundedExecutor,
        reaper_active: bool,
        idle_timeout: Duration,
    ) -> Self {
        let state = controller.state();
        let executor_active = executor.is_active();
        Self {
            status: if executor_active {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            loaded: state == ServiceState::Loaded,
            state,
            executor_active,
            reaper_active,
            idle_timeout,
            idle_for: controller.idle_for(),
            model: controller.model().to_string(),
            max_concurrency: executor.worker_count(),
            active_workers: executor.active_workers(),
            load_count: controller.load_count(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
