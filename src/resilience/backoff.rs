//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Bounded retry policy for transient conflicts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts (1 = no retries).
    pub max_attempts: u32,
    /// Base delay in milliseconds.
    pub base_ms: u64,
    /// Maximum delay in milliseconds.
    pub max_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_ms: u64, max_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_ms,
            max_ms,
        }
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or the
    /// attempt budget is exhausted. `retryable` classifies errors.
    pub async fn run<T, E, F, Fut, R>(&self, retryable: R, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < self.max_attempts && retryable(&e) => {
                    attempt += 1;
                    let delay = calculate_backoff(attempt, self.base_ms, self.max_ms);
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after conflict");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_calculation() {
        let b1 = calculate_backoff(1, 100, 2000);
        assert!(b1.as_millis() >= 100);

        let b2 = calculate_backoff(2, 100, 2000);
        assert!(b2.as_millis() >= 200);

        let max = calculate_backoff(10, 100, 1000);
        assert!(max.as_millis() >= 1000);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, 1, 10);

        let result: Result<u32, &str> = policy
            .run(
                |_| true,
                || {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err("conflict")
                        } else {
                            Ok(n)
                        }
                    }
                },
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_surfaces_immediately() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, 1, 10);

        let result: Result<u32, &str> = policy
            .run(
                |e: &&str| *e == "conflict",
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err("fatal") }
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let policy = RetryPolicy::new(3, 1, 5);
        let attempts = AtomicU32::new(0);

        let result: Result<(), &str> = policy
            .run(
                |_| true,
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err("conflict") }
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
