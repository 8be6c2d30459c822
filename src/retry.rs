//! Bounded exponential-backoff retry for upstream calls.
//!
//! Only [`UpstreamError`]s that report themselves as retryable (rate limits,
//! server errors, network failures) are retried. Everything else returns
//! immediately with the attempt count so far.

use std::future::Future;
use std::time::Duration;

use ragchat_core::error::UpstreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (1-based). The first attempt has none;
    /// attempt `n > 1` waits `base_delay * 2^(n-2)`, capped at `max_delay`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(20);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Terminal failure of a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFailure {
    pub attempts: u32,
    pub error: UpstreamError,
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(target: "ragchat::retry", label, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if error.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_before(attempt + 1);
                tracing::warn!(
                    target: "ragchat::retry",
                    label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "transient upstream failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                tracing::error!(target: "ragchat::retry", label, attempt, %error, "upstream call failed");
                return Err(RetryFailure {
                    attempts: attempt,
                    error,
                });
            }
        }
    }
}
