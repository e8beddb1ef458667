//! Run-level retry with exponential backoff and jitter.
//!
//! Stage invocations are retried as a whole: checkpoints only advance on
//! success, so re-running a failed invocation reprocesses the same window
//! without duplicating committed work.

use std::future::Future;
use std::time::Duration;

use medallion_config::shared::RetryConfig;
use rand::Rng;
use tracing::warn;

use crate::error::{PipelineError, PipelineResult};

/// Calculates the backoff delay for a 0-indexed attempt.
///
/// Uses exponential backoff (`base_delay * 2^attempt`) capped at the
/// configured maximum, with up to 30% random jitter to avoid retry
/// synchronization.
fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponential = config
        .base_delay_ms
        .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
    let capped = exponential.min(config.max_delay_ms);

    let jitter_factor = rand::thread_rng().gen_range(0.0..0.3);
    let jittered = capped as f64 * (1.0 + jitter_factor);

    Duration::from_millis(jittered as u64)
}

/// Runs `operation` until it succeeds, fails permanently, or the attempt
/// budget is exhausted.
///
/// Only errors whose kind is retryable are retried; permanent errors are
/// propagated immediately. The final error is returned unchanged so callers
/// observe the original failure kind.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    description: &'static str,
    mut operation: F,
) -> PipelineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PipelineResult<T>>,
{
    let mut last_error: Option<PipelineError> = None;

    for attempt in 0..config.max_attempts {
        if attempt > 0 {
            let delay = backoff_delay(config, attempt - 1);
            warn!(
                operation = description,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying after transient failure"
            );
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    // max_attempts is validated to be non-zero, so an error was recorded.
    Err(last_error.expect("retry loop ran at least once"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::error::ErrorKind;
    use crate::pipeline_error;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));

        let result = retry_with_backoff(&fast_retry(), "test", || {
            let attempts = attempts.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(pipeline_error!(
                        ErrorKind::StoreIoError,
                        "Transient failure"
                    ));
                }

                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));

        let result: PipelineResult<()> = retry_with_backoff(&fast_retry(), "test", || {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(pipeline_error!(
                    ErrorKind::DuplicateKeyInBatch,
                    "Permanent failure"
                ))
            }
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::DuplicateKeyInBatch);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempt_budget_is_bounded() {
        let attempts = Arc::new(AtomicU32::new(0));

        let result: PipelineResult<()> = retry_with_backoff(&fast_retry(), "test", || {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(pipeline_error!(ErrorKind::StoreIoError, "Still failing"))
            }
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::StoreIoError);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = RetryConfig {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 500,
        };

        let delay = backoff_delay(&config, 9);
        // 30% jitter above the 500ms cap at most.
        assert!(delay <= Duration::from_millis(650));
    }
}
