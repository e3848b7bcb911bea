//! Retry policy for upstream requests.
//!
//! Every network call in the pipeline goes through [`RetryPolicy::execute`]
//! so retries are bounded, backed off, and counted the same way everywhere.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::FetchError;

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay between attempts.
    pub base_delay: Duration,
    /// Whether to use exponential backoff.
    pub exponential_backoff: bool,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the given attempt cap and a 1 second base delay.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_secs(1),
            exponential_backoff: true,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Disables retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            exponential_backoff: false,
            max_delay: Duration::ZERO,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enables or disables exponential backoff.
    pub fn with_exponential_backoff(mut self, enabled: bool) -> Self {
        self.exponential_backoff = enabled;
        self
    }

    /// Calculates the delay after a failed attempt (1-based).
    ///
    /// `base_delay * 2^(attempt-1)`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = if self.exponential_backoff {
            let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
            self.base_delay.saturating_mul(factor)
        } else {
            self.base_delay
        };

        delay.min(self.max_delay)
    }

    /// Runs `operation` until it succeeds, fails non-retryably, or the
    /// attempt cap is reached.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(attempts, "Operation succeeded after retry");
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(error) if error.is_retryable() && attempts < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempts);
                    warn!(
                        error = %error,
                        attempt = attempts,
                        max_attempts = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    if error.is_retryable() {
                        warn!(error = %error, attempts, "Retries exhausted");
                    } else {
                        debug!(error = %error, "Non-retryable failure");
                    }
                    return RetryOutcome {
                        result: Err(error),
                        attempts,
                    };
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Result of a retried operation plus the attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Final result.
    pub result: Result<T, FetchError>,
    /// Attempts made (at least 1).
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    /// Returns the number of retries performed (attempts beyond the first).
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts).with_base_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(8));
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = RetryPolicy::new(10).with_base_delay(Duration::from_secs(10));

        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(30));
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::new(3).with_exponential_backoff(false);
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let outcome = fast_policy(3)
            .execute(move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FetchError::TransientNetwork("reset".into()))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(*outcome.result.as_ref().unwrap(), 42);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.retries(), 2);
    }

    #[tokio::test]
    async fn test_stops_at_attempt_cap() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let outcome: RetryOutcome<()> = fast_policy(2)
            .execute(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Timeout(Duration::from_secs(1)))
            })
            .await;

        assert!(outcome.result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let outcome: RetryOutcome<()> = fast_policy(5)
            .execute(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::from_status(404, "not found"))
            })
            .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_retry_policy() {
        let outcome: RetryOutcome<()> = RetryPolicy::no_retry()
            .execute(|| async { Err(FetchError::TransientNetwork("down".into())) })
            .await;
        assert_eq!(outcome.attempts, 1);
    }
}
