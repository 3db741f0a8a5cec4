//! Service Call Retry Logic
//!
//! Implements bounded retries with exponential backoff and additive jitter for
//! calls to external services. Every external call in the pipeline goes through
//! [`RetryExecutor::execute`].
//!
//! **Algorithm:**
//! 1. Stop with `Cancelled` if the batch was cancelled (checked before each attempt)
//! 2. Attempt operation; on success return immediately
//! 3. On failure append `{tag}:{ErrorKind}:attempt{i}` to the error sink
//! 4. If attempts remain: sleep `min(max, base * 2^(i-1)) + uniform(0, jitter)` ms, retry
//! 5. Otherwise fail with `RetryExhausted`
//!
//! The executor holds no mutable state, so one instance can be shared by any
//! number of concurrent callers. Backoff sleeps hold no locks.

use crate::error::{RetryError, ServiceError};
use catfix_common::RetrySettings;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Exponential backoff parameters (milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub jitter_ms: u64,
}

impl BackoffConfig {
    pub fn new(base_ms: u64, max_ms: u64, jitter_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            jitter_ms,
        }
    }

    /// Deterministic part of the delay after failed attempt `attempt` (1-based)
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let factor = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        self.base_ms.saturating_mul(factor).min(self.max_ms)
    }

    /// Full delay after failed attempt `attempt`: base delay plus random jitter
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        self.base_delay_ms(attempt).saturating_add(jitter)
    }
}

/// Attempt budget plus backoff for one service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl RetryPolicy {
    /// `max_attempts` below 1 is raised to 1
    pub fn new(max_attempts: u32, backoff: BackoffConfig) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self::new(
            settings.attempts,
            BackoffConfig::new(settings.base_delay_ms, settings.max_delay_ms, settings.jitter_ms),
        )
    }
}

/// Runs fallible service operations under a [`RetryPolicy`]
///
/// Carries the batch cancellation token; cancellation takes effect at the next
/// attempt boundary and never interrupts an attempt in flight.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    cancel: CancellationToken,
}

impl RetryExecutor {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Call `operation` up to `policy.max_attempts` times
    ///
    /// # Arguments
    /// * `tag` - Call-site tag for error annotations and logs (e.g., "catalog_search")
    /// * `policy` - Attempt budget and backoff for the target service
    /// * `errors` - Optional sink receiving one `tag:ErrorKind:attemptN` entry per failure
    /// * `operation` - Closure producing one attempt
    ///
    /// # Returns
    /// First successful result, or `RetryError` once attempts are exhausted or the
    /// batch is cancelled
    pub async fn execute<T, F, Fut>(
        &self,
        tag: &str,
        policy: &RetryPolicy,
        mut errors: Option<&mut Vec<String>>,
        mut operation: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            if self.cancel.is_cancelled() {
                tracing::debug!(tag, attempt, "Batch cancelled, not starting attempt");
                return Err(RetryError::Cancelled {
                    tag: tag.to_string(),
                    attempts: attempt - 1,
                });
            }

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::debug!(tag, attempt, "Service call succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if let Some(sink) = errors.as_deref_mut() {
                        sink.push(format!("{}:{}:attempt{}", tag, err.kind(), attempt));
                    }

                    if attempt >= max_attempts {
                        tracing::warn!(
                            tag,
                            attempts = attempt,
                            error = %err,
                            "Service call failed: retries exhausted"
                        );
                        return Err(RetryError::Exhausted {
                            tag: tag.to_string(),
                            attempts: attempt,
                            last_error: err,
                        });
                    }

                    let backoff_ms = policy.backoff.delay_ms(attempt);

                    tracing::warn!(
                        tag,
                        attempt,
                        backoff_ms,
                        remaining = max_attempts - attempt,
                        error = %err,
                        "Service call failed, will retry after backoff"
                    );

                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(attempts: u32, base: u64, max: u64) -> RetryPolicy {
        RetryPolicy::new(attempts, BackoffConfig::new(base, max, 0))
    }

    #[test]
    fn test_backoff_sequence_is_capped() {
        let backoff = BackoffConfig::new(10, 40, 0);
        let delays: Vec<u64> = (1..=5).map(|i| backoff.base_delay_ms(i)).collect();
        assert_eq!(delays, vec![10, 20, 40, 40, 40]);
        assert_eq!(backoff.delay_ms(2), 20);
    }

    #[test]
    fn test_backoff_large_attempt_does_not_overflow() {
        let backoff = BackoffConfig::new(100, 2000, 0);
        assert_eq!(backoff.base_delay_ms(200), 2000);
    }

    #[test]
    fn test_jitter_is_additive_and_bounded() {
        let backoff = BackoffConfig::new(10, 40, 5);
        for _ in 0..200 {
            let delay = backoff.delay_ms(1);
            assert!((10..=15).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let calls = AtomicU32::new(0);
        let mut errors = Vec::new();

        let result = RetryExecutor::default()
            .execute("test_op", &policy(3, 10, 40), Some(&mut errors), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<i32, ServiceError>(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(errors.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_failures_with_exact_delays() {
        let calls = AtomicU32::new(0);
        let mut errors = Vec::new();
        let start = Instant::now();

        let result = RetryExecutor::default()
            .execute("test_op", &policy(3, 10, 40), Some(&mut errors), || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(ServiceError::Timeout("slow".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(
            errors,
            vec!["test_op:Timeout:attempt1", "test_op:Timeout:attempt2"]
        );
        // 10ms after attempt 1, 20ms after attempt 2
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(30));
        assert!(elapsed < Duration::from_millis(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted_reports_last_error() {
        let calls = AtomicU32::new(0);
        let mut errors = Vec::new();

        let result = RetryExecutor::default()
            .execute("catalog_search", &policy(3, 10, 40), Some(&mut errors), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ServiceError::Connection("refused".into())) }
            })
            .await;

        match result {
            Err(RetryError::Exhausted { tag, attempts, last_error }) => {
                assert_eq!(tag, "catalog_search");
                assert_eq!(attempts, 3);
                assert_eq!(last_error.kind(), "ConnectionError");
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[2], "catalog_search:ConnectionError:attempt3");
    }

    #[tokio::test]
    async fn test_no_sink_still_retries() {
        let calls = AtomicU32::new(0);

        let result = RetryExecutor::default()
            .execute("test_op", &policy(2, 0, 0), None, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n == 1 {
                        Err(ServiceError::Simulated("flaky".into()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_batch_makes_no_calls() {
        let token = CancellationToken::new();
        token.cancel();
        let calls = AtomicU32::new(0);

        let result = RetryExecutor::new(token)
            .execute("test_op", &policy(3, 10, 40), None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), ServiceError>(()) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 0, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_takes_effect_at_next_attempt() {
        let token = CancellationToken::new();
        let executor = RetryExecutor::new(token.clone());
        let calls = AtomicU32::new(0);

        let result = executor
            .execute("test_op", &policy(5, 10, 40), None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                token.cancel();
                async { Err::<(), _>(ServiceError::Timeout("slow".into())) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
