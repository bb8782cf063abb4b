//! Retry policy for feed requests
//!
//! Backoff behavior is expressed as a policy value consumed by feed
//! adapters rather than ad hoc loops at call sites. The engine retries
//! transient errors (rate limits, transport failures) with exponential
//! backoff plus jitter; auth failures get one refresh-and-retry and are
//! then fatal.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff policy with jitter
///
/// Delay for attempt `n` (zero-based) is `base_delay * 2^n`, capped at
/// `max_delay`, then scaled by a random factor in `1.0 ± jitter`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (so `1` means no retries)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay, pre-jitter
    pub max_delay: Duration,
    /// Jitter fraction in `0.0..=1.0`
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempt` failures
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Backoff delay after the given zero-based failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
            .min(self.max_delay);

        if self.jitter <= 0.0 {
            return exp;
        }

        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        Duration::from_secs_f64(exp.as_secs_f64() * factor)
    }
}
