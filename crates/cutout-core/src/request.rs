//! Request identifiers and timed operation logging

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tokio::time::Instant;
use tracing::{error, info, Instrument};

/// Identifier attached to every log line of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Identifier of the `index`-th (1-based) member of a batch
    pub fn child(&self, index: usize) -> Self {
        Self(format!("{}-{}", self.0, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Run `fut` inside a span for `request_id`, logging start, completion and
/// failure together with the elapsed time.
pub async fn timed<T, E, F>(operation: &str, request_id: &RequestId, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let span = tracing::info_span!("op", operation, request_id = %request_id);
    async move {
        let started = Instant::now();
        info!("Starting {}", operation);
        let result = fut.await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(elapsed_ms, "Completed {}", operation),
            Err(e) => error!(elapsed_ms, error = %e, "Failed {}", operation),
        }
        result
    }
    .instrument(span)
    .await
}
