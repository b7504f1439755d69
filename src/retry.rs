//! Bounded, fixed-delay retry for operations against clusters that are still coming up.
//!
//! Freshly provisioned clusters often refuse connections for a while: the API
//! server is not answering yet, or the package-manager agent has not been
//! scheduled. [`poll_with_retry`] invokes an operation a fixed number of times
//! with a constant pause in between.
//!
//! # Example
//!
//! ```ignore
//! use posthook::retry::{poll_with_retry, RetryPolicy};
//!
//! let kubeconfig = poll_with_retry(
//!     &RetryPolicy::new(30, Duration::from_secs(15)),
//!     "download_kubeconfig",
//!     || cluster.download_kubeconfig(),
//! ).await?;
//! ```

use std::time::Duration;

use tracing::{error, info};

/// Attempt count and inter-attempt delay for a polled operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (0 behaves like 1)
    pub attempts: u32,
    /// Fixed pause between failed attempts
    pub delay: Duration,
}

impl RetryPolicy {
    /// Create a policy with the given attempt count and delay
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Create a policy from a delay expressed in whole seconds
    pub fn from_secs(attempts: u32, delay_secs: u64) -> Self {
        Self::new(attempts, Duration::from_secs(delay_secs))
    }

    /// Same delay, one extra attempt
    pub fn inclusive(self) -> Self {
        Self {
            attempts: self.attempts.saturating_add(1),
            ..self
        }
    }

    fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }
}

/// Invoke `operation` until it succeeds or `policy.attempts` is exhausted.
///
/// Every error is retried the same way. Returns the last error when all
/// attempts fail.
pub async fn poll_with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    poll_with_retry_if(policy, operation_name, operation, |_| true).await
}

/// Like [`poll_with_retry`], but only errors accepted by `retryable` are retried.
///
/// A rejected error is returned immediately without sleeping.
pub async fn poll_with_retry_if<F, Fut, T, E, R>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
    retryable: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !retryable(&e) => return Err(e),
            Err(e) => {
                if attempt >= max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "Operation failed after max attempts"
                    );
                    return Err(e);
                }

                info!(
                    operation = %operation_name,
                    attempt,
                    max_attempts,
                    error = %e,
                    delay_secs = policy.delay.as_secs(),
                    "Operation failed, waiting before next attempt"
                );

                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    const DELAY: Duration = Duration::from_secs(15);

    fn failing_then_ok(
        failures: u32,
        calls: Arc<AtomicU32>,
    ) -> impl FnMut() -> std::future::Ready<Result<u32, String>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= failures {
                std::future::ready(Err(format!("attempt {n} failed")))
            } else {
                std::future::ready(Ok(n))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_immediately_without_sleeping() {
        let start = Instant::now();
        let result: Result<i32, &str> =
            poll_with_retry(&RetryPolicy::new(3, DELAY), "op", || async { Ok(42) }).await;

        assert_eq!(result, Ok(42));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    /// N-1 failures then success: exactly N attempts and N-1 sleeps
    #[tokio::test(start_paused = true)]
    async fn test_uses_exactly_n_attempts_and_n_minus_one_sleeps() {
        for n in 1..=6u32 {
            let calls = Arc::new(AtomicU32::new(0));
            let start = Instant::now();

            let result = poll_with_retry(
                &RetryPolicy::new(n, DELAY),
                "op",
                failing_then_ok(n - 1, calls.clone()),
            )
            .await;

            assert_eq!(result, Ok(n));
            assert_eq!(calls.load(Ordering::SeqCst), n);
            assert_eq!(start.elapsed(), DELAY * (n - 1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_returns_last_error_after_n_attempts() {
        for n in 1..=5u32 {
            let calls = Arc::new(AtomicU32::new(0));
            let start = Instant::now();

            let result =
                poll_with_retry(&RetryPolicy::new(n, DELAY), "op", failing_then_ok(u32::MAX, calls.clone()))
                    .await;

            assert_eq!(result, Err(format!("attempt {n} failed")));
            assert_eq!(calls.load(Ordering::SeqCst), n);
            assert_eq!(start.elapsed(), DELAY * (n - 1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_tries_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = poll_with_retry(
            &RetryPolicy::new(0, DELAY),
            "op",
            failing_then_ok(u32::MAX, calls.clone()),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_errors_return_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = poll_with_retry_if(
            &RetryPolicy::new(5, DELAY),
            "op",
            failing_then_ok(u32::MAX, calls.clone()),
            |e: &String| !e.contains("attempt 2"),
        )
        .await;

        assert_eq!(result, Err("attempt 2 failed".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(start.elapsed(), DELAY);
    }

    #[test]
    fn test_inclusive_adds_one_attempt() {
        let policy = RetryPolicy::from_secs(30, 15).inclusive();
        assert_eq!(policy.attempts, 31);
        assert_eq!(policy.delay, Duration::from_secs(15));
    }
}
