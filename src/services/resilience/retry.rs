//! Retry with exponential backoff for flaky remote calls.

use std::time::Duration;

use tokio::time::sleep;

/// Errors classify themselves as worth retrying (network faults, 429, 5xx)
/// or terminal (validation failures, other 4xx). Terminal errors surface to
/// the caller immediately, without a second attempt.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given attempt (1-based):
    /// `min(base * multiplier^(attempt-1), max_delay)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let delay_ms =
            self.base_delay.as_millis() as f64 * self.multiplier.powi(exp as i32);
        let delay = Duration::from_millis(delay_ms as u64);
        delay.min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, retrying retryable errors up to
/// `policy.max_attempts` total attempts. The last error is returned
/// unchanged when attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => {
                tracing::warn!(error = %err, "non-retryable error, failing immediately");
                return Err(err);
            }
            Err(err) if attempt >= policy.max_attempts => {
                tracing::error!(attempt, error = %err, "giving up after max attempts");
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "operation failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
