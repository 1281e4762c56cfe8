//! Error types for the background-removal runtime

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the lifecycle controller, executor and service facade.
///
/// `Clone` is required so that a single failed load can be delivered to every
/// caller that was waiting on it.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum RemoverError {
    /// The backend failed to produce a session
    #[error("model load failed: {0}")]
    Load(String),

    /// The service is not accepting work (not initialized, or shut down)
    #[error("service not ready: {0}")]
    NotReady(String),

    /// Batch larger than the configured maximum
    #[error("batch size ({size}) exceeds maximum allowed ({max})")]
    BatchSizeExceeded { size: usize, max: usize },

    /// Batch with no items
    #[error("batch contains no images")]
    EmptyBatch,

    /// A single item's compute failed
    #[error("processing failed [req: {request_id}]: {message}")]
    Processing { request_id: String, message: String },

    /// The caller gave up waiting for a result
    #[error("processing timed out after {after:?} [req: {request_id}]")]
    Timeout { request_id: String, after: Duration },

    /// A cleanup step failed; only ever logged
    #[error("shutdown error: {0}")]
    Shutdown(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl RemoverError {
    pub(crate) fn processing(request_id: impl ToString, message: impl ToString) -> Self {
        Self::Processing {
            request_id: request_id.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether the caller may retry the same request later.
    ///
    /// The HTTP layer answers these with `503 Service Unavailable`; the
    /// rest are caller errors (`400`) or processing failures (`500`).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotReady(_) | Self::Timeout { .. } | Self::Load(_))
    }
}

/// Convenience alias used throughout this crate
pub type Result<T> = std::result::Result<T, RemoverError>;
