//! Classification-driven retry with exponential backoff and jitter
//!
//! Transient failures (throttling, 5xx, network) are retried up to the
//! configured number of attempts; permanent failures are returned after the
//! first attempt.

use crate::config::EngineConfig;
use crate::error::{ArchiveError, StorageError};
use crate::storage::{StorageOp, StorageResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// A successful operation and how many attempts it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    /// Operation result
    pub value: T,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

/// A failed operation after the policy gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure {
    /// Operation that failed
    pub op: StorageOp,
    /// Last error returned by the backend
    pub error: StorageError,
    /// Attempts made
    pub attempts: u32,
}

impl RetryFailure {
    /// True when the error was transient and attempts ran out
    pub fn exhausted(&self) -> bool {
        self.error.is_transient()
    }

    /// Convert into the engine error for a given object key
    pub fn into_error(self, key: impl Into<String>) -> ArchiveError {
        if self.exhausted() {
            ArchiveError::RetriesExhausted {
                operation: self.op,
                key: key.into(),
                attempts: self.attempts,
                source: self.error,
            }
        } else {
            ArchiveError::Permanent {
                operation: self.op,
                key: key.into(),
                source: self.error,
            }
        }
    }
}

/// Bounded retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    cap: Duration,
}

impl RetryPolicy {
    /// Create a policy; `max_attempts` is clamped to at least one
    pub fn new(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            cap,
        }
    }

    /// Build from engine configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.max_attempts, config.backoff_base, config.backoff_cap)
    }

    /// Maximum attempts per operation
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retrying after failed attempt `attempt` (0-based), without jitter
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Backoff delay plus uniform jitter in `[0, delay / 2]`
    pub fn jittered_delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.backoff_delay(attempt);
        let jitter: f64 = rng.gen_range(0.0..=0.5);
        let extra = Duration::try_from_secs_f64(delay.as_secs_f64() * jitter).unwrap_or(Duration::ZERO);
        delay.saturating_add(extra)
    }

    /// Run `operation`, retrying transient failures
    pub async fn run<T, F, Fut>(
        &self,
        op: StorageOp,
        key: &str,
        mut operation: F,
    ) -> Result<Retried<T>, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => {
                    return Ok(Retried {
                        value,
                        attempts: attempt + 1,
                    })
                }
                Err(error) if error.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = self.jittered_delay(attempt, &mut rand::thread_rng());
                    tracing::warn!(
                        %op,
                        key,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        error = %error,
                        delay = ?delay,
                        "Retryable backend error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    if error.is_transient() {
                        tracing::warn!(%op, key, attempts = attempt + 1, error = %error, "Retries exhausted");
                    } else {
                        tracing::debug!(%op, key, error = %error, "Permanent backend error");
                    }
                    return Err(RetryFailure {
                        op,
                        error,
                        attempts: attempt + 1,
                    });
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageErrorKind;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(1))
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = policy();
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(800));
        // Should cap at one second
        assert_eq!(policy.backoff_delay(4), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(40), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let calls = AtomicU32::new(0);
        let result = policy()
            .run(StorageOp::Copy, "a.txt", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(StorageError::new(StorageErrorKind::ServerError, "503"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.value, "done");
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_is_not_retried() {
        let calls = AtomicU32::new(0);
        let failure = policy()
            .run(StorageOp::Delete, "a.txt", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StorageError::new(StorageErrorKind::PermissionDenied, "403")) }
            })
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 1);
        assert!(!failure.exhausted());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(failure.into_error("a.txt"), ArchiveError::Permanent { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion() {
        let calls = AtomicU32::new(0);
        let failure = policy()
            .run(StorageOp::Head, "a.txt", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StorageError::new(StorageErrorKind::RateLimited, "429")) }
            })
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(matches!(
            failure.into_error("a.txt"),
            ArchiveError::RetriesExhausted { attempts: 5, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(60));
        let start = tokio::time::Instant::now();

        let _ = policy
            .run(StorageOp::Copy, "a.txt", || async {
                Err::<(), _>(StorageError::new(StorageErrorKind::Network, "reset"))
            })
            .await;

        // 2s + 4s minimum, plus at most half again in jitter
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(6));
        assert!(elapsed <= Duration::from_secs(9));
    }

    #[test]
    fn test_jitter_saturates_at_huge_cap() {
        use rand::SeedableRng;

        let policy = RetryPolicy::new(5, Duration::MAX / 4, Duration::MAX);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        assert_eq!(policy.backoff_delay(10), Duration::MAX);
        for attempt in 0..8 {
            assert!(policy.jittered_delay(attempt, &mut rng) >= policy.backoff_delay(attempt));
        }
    }

    proptest! {
        #[test]
        fn prop_jitter_within_bounds(attempt in 0u32..64, base_ms in 1u64..5_000, seed in any::<u64>()) {
            use rand::SeedableRng;

            let policy = RetryPolicy::new(5, Duration::from_millis(base_ms), Duration::from_secs(64));
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            let delay = policy.backoff_delay(attempt);
            let jittered = policy.jittered_delay(attempt, &mut rng);

            prop_assert!(delay <= Duration::from_secs(64));
            prop_assert!(jittered >= delay);
            prop_assert!(jittered <= delay + delay / 2);
        }
    }
}
