//! Retry ceiling and optional exponential backoff for failed jobs.
//!
//! The default policy allows three attempts in total and requeues failed
//! jobs immediately. A non-zero [`RetryPolicy::base_delay`] turns on
//! exponential backoff, clamped to [`RetryPolicy::max_delay`].

use std::time::Duration;

/// Total execution attempts a job gets before it is dropped.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Tunable parameters for the retry decision.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts allowed in total; a job whose failure count reaches this is
    /// dropped.
    pub max_attempts: u32,
    /// Delay before the first retry. Zero requeues immediately.
    pub base_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::ZERO,
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Immediate requeue with a custom ceiling.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Exponential backoff starting at `base_delay`.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            ..Default::default()
        }
    }

    /// Whether a job with `failure_count` failed attempts gets another one.
    pub fn should_retry(&self, failure_count: u32) -> bool {
        failure_count < self.max_attempts
    }

    /// Delay before the attempt following failure number `failure_count`
    /// (1-indexed).
    pub fn delay_for(&self, failure_count: u32) -> Duration {
        if self.base_delay.is_zero() || failure_count == 0 {
            return Duration::ZERO;
        }

        let exp = self.multiplier.powi(failure_count.saturating_sub(1) as i32);
        let delay_ms = (self.base_delay.as_millis() as f64 * exp) as u64;
        Duration::from_millis(delay_ms).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allows_three_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn default_has_no_backoff() {
        let policy = RetryPolicy::default();
        for failures in 0..5 {
            assert_eq!(policy.delay_for(failures), Duration::ZERO);
        }
    }

    #[test]
    fn exponential_sequence_clamps_at_max() {
        let policy =
            RetryPolicy::exponential(10, Duration::from_millis(100), Duration::from_millis(500));
        let expected = [100, 200, 400, 500, 500];

        for (i, &ms) in expected.iter().enumerate() {
            assert_eq!(policy.delay_for(i as u32 + 1), Duration::from_millis(ms));
        }
    }

    #[test]
    fn custom_multiplier() {
        let policy = RetryPolicy {
            multiplier: 3.0,
            ..RetryPolicy::exponential(5, Duration::from_secs(1), Duration::from_secs(60))
        };
        assert_eq!(policy.delay_for(3), Duration::from_secs(9));
    }

    #[test]
    fn zero_attempts_never_retries() {
        assert!(!RetryPolicy::immediate(0).should_retry(0));
    }
}
