//! Batch fan-out / fan-in
//!
//! A batch is all-or-nothing: every item runs to completion, and if any of
//! them failed the caller gets the first failure observed while the
//! successful results are thrown away. On success results come back in
//! input order.

use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, error, warn};

use crate::error::{RemoverError, Result};
use crate::request::RequestId;

/// Validate a batch size before any work is started.
pub fn check_batch_size(size: usize, max: usize) -> Result<()> {
    if size == 0 {
        return Err(RemoverError::EmptyBatch);
    }
    if size > max {
        return Err(RemoverError::BatchSizeExceeded { size, max });
    }
    Ok(())
}

/// Run `op` for every item concurrently and join all of them.
///
/// Each item gets the sub-identifier `"{batch_id}-{i}"` (1-based).
pub async fn fan_out<I, T, F, Fut>(batch_id: &RequestId, items: Vec<I>, mut op: F) -> Result<Vec<T>>
where
    F: FnMut(I, RequestId) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let total = items.len();
    let mut branches: FuturesUnordered<_> = items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            let fut = op(item, batch_id.child(idx + 1));
            async move { (idx, fut.await) }
        })
        .collect();

    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
    let mut first_failure = None;
    let mut failed = 0usize;

    while let Some((idx, result)) = branches.next().await {
        match result {
            Ok(value) => {
                debug!(batch_id = %batch_id, index = idx + 1, "batch item done");
                results[idx] = Some(value);
            }
            Err(e) => {
                failed += 1;
                error!(batch_id = %batch_id, index = idx + 1, error = %e, "batch item failed");
                first_failure.get_or_insert(e);
            }
        }
    }

    if let Some(e) = first_failure {
        warn!(batch_id = %batch_id, failed, total, "batch failed, discarding partial results");
        return Err(e);
    }

    results
        .into_iter()
        .map(|r| r.ok_or_else(|| RemoverError::processing(batch_id, "missing batch result")))
        .collect()
}
