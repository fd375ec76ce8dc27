//! Call bounding and caller-side retry

use flock_core::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Await a store call, bounding it by `limit`.
///
/// Expiry becomes [`Error::Timeout`], distinct from a transaction conflict.
/// Dropping the returned future drops the in-flight call with it.
pub(crate) async fn timed<T, F>(limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = flock_store::Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(Error::Timeout(limit)),
    }
}

/// Run `op`, running it once more if it fails with a retryable error
/// (`TransactionConflict` or `Timeout`).
///
/// A timed-out write may still have committed; only repeat idempotent ones.
pub async fn with_retry<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op().await {
        Err(e) if e.is_retryable() => {
            tracing::info!("Retrying after {} ({})", e, e.kind());
            op().await
        }
        other => other,
    }
}
