//! Retry backoff policy.
//!
//! The delay before retry `n` (1-based) is `first × factor^(n-1)`. With the
//! defaults that gives 2s, 8s, 32s for the three allowed retries.

use std::time::Duration;

/// Exponential retry policy for failed deliveries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub first: Duration,
    /// Multiplicative growth per retry.
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            first: Duration::from_secs(2),
            factor: 4,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry attempt (1-based). Attempt 0 is treated as 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let multiplier = self.factor.max(1).saturating_pow(exp);
        self.first.saturating_mul(multiplier)
    }

    /// Whether another retry may follow once `retry_count` retries have run.
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}
