//! Cutout Testing Utilities
//!
//! Provides a scriptable segmentation backend and helpers for exercising the
//! runtime without a real model.

pub mod backend;

pub use backend::{tag_of, tagged_image, MockSegmentationBackend};

use cutout_core::RemoverConfig;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`, defaulting to debug output for the runtime.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cutout_core=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Configuration pointing the model cache at `cache_dir`, with the request
/// timeout disabled so paused-clock tests are not cut short.
pub fn test_config(cache_dir: &Path) -> RemoverConfig {
    RemoverConfig::new("mock-model", cache_dir.join("models")).with_request_timeout_secs(0)
}
