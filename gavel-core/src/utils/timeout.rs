//! Per-call time bounds for store, cache and queue operations.

use crate::error::{CacheError, QueueError, StoreError};
use std::future::Future;
use std::time::Duration;

/// Errors that have a dedicated "call timed out" variant.
pub trait TimedOut {
    fn timed_out() -> Self;
}

impl TimedOut for StoreError {
    fn timed_out() -> Self {
        StoreError::Timeout
    }
}

impl TimedOut for CacheError {
    fn timed_out() -> Self {
        CacheError::Timeout
    }
}

impl TimedOut for QueueError {
    fn timed_out() -> Self {
        QueueError::Timeout
    }
}

/// Await `fut` for at most `limit`; an elapsed timer becomes the error's
/// timeout variant.
pub async fn bounded<T, E, F>(limit: Duration, fut: F) -> Result<T, E>
where
    E: TimedOut,
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(E::timed_out()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_call_becomes_timeout() {
        let result: Result<(), CacheError> = bounded(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(CacheError::Timeout)));
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let result: Result<u8, StoreError> = bounded(Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
