//! Bounded exponential backoff for transient failures.

use crate::error::{Disposition, SyncError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Delay before the first retry.
pub const BASE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// No single backoff sleep exceeds this.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Exponential ceiling for the given retry attempt (0-based): `base * 2^attempt`,
/// capped at [`MAX_RETRY_DELAY`].
pub fn backoff_ceiling(attempt: u32, base: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(16));
    base.saturating_mul(factor).min(MAX_RETRY_DELAY)
}

/// Full-jitter delay in `[ceiling / 2, ceiling]`.
pub fn retry_delay(attempt: u32, base: Duration) -> Duration {
    let ceiling = backoff_ceiling(attempt, base).as_millis() as u64;
    let millis = rand::rng().random_range(ceiling / 2..=ceiling);
    Duration::from_millis(millis)
}

/// Run `op`, retrying up to `max_retries` more times while it fails with an
/// error whose policy is [`Disposition::Retry`].
///
/// Errors with any other disposition are returned immediately, as is the
/// last transient error once the retries are used up.
pub async fn retry_transient<T, F, Fut>(
    what: &str,
    max_retries: u32,
    mut op: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.disposition() == Disposition::Retry && attempt < max_retries => {
                let delay = retry_delay(attempt, BASE_RETRY_DELAY);
                warn!(
                    operation = what,
                    attempt = attempt + 1,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_ceiling() {
        let base = Duration::from_millis(200);
        assert_eq!(backoff_ceiling(0, base), Duration::from_millis(200));
        assert_eq!(backoff_ceiling(1, base), Duration::from_millis(400));
        assert_eq!(backoff_ceiling(3, base), Duration::from_millis(1600));
        // Capped
        assert_eq!(backoff_ceiling(10, base), MAX_RETRY_DELAY);
        assert_eq!(backoff_ceiling(u32::MAX, base), MAX_RETRY_DELAY);
    }

    #[test]
    fn test_retry_delay_within_jitter_bounds() {
        for attempt in 0..6 {
            let ceiling = backoff_ceiling(attempt, BASE_RETRY_DELAY);
            let delay = retry_delay(attempt, BASE_RETRY_DELAY);
            assert!(delay <= ceiling);
            assert!(delay >= ceiling / 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried_then_surface() {
        let calls = AtomicU32::new(0);
        let result: Result<(), SyncError> = retry_transient("test", 2, || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err(SyncError::from(CacheError::Timeout)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = retry_transient("test", 3, || {
            let n = calls.fetch_add(1, Ordering::Relaxed);
            async move {
                if n == 0 {
                    Err(SyncError::from(CacheError::Timeout))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_non_transient_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), SyncError> = retry_transient("test", 5, || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err(SyncError::auction_not_found("a-1")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
