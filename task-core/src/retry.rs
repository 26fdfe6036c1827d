//! Retry policy for failed tasks.
//!
//! Only tasks flagged `retry` are retried, at most `max_retries` times.
//! Delays grow exponentially with random jitter so devices that lost the
//! connection together do not all retry in the same instant.

use std::time::Duration;

use crate::definition::TaskMeta;

/// Backoff settings for retried tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed per task.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound of the exponential part.
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to every delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// No delay at all (for tests).
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Whether a failed task may run again.
    pub fn should_retry(&self, meta: &TaskMeta) -> bool {
        meta.retry && meta.retry_count < self.max_retries
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// Formula: min(max_delay, base_delay * 2^(attempt-1)) + random(0..=max_jitter)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        base + random_jitter(self.max_jitter)
    }
}

fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes).expect("getrandom failed");
    let random = u64::from_le_bytes(bytes);
    Duration::from_millis(random % (max_ms + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_flagged_tasks_retry() {
        let policy = RetryPolicy::default();
        let mut meta = TaskMeta::new();
        assert!(!policy.should_retry(&meta));

        meta.retry = true;
        assert!(policy.should_retry(&meta));

        meta.retry_count = 1;
        assert!(!policy.should_retry(&meta));
    }

    #[test]
    fn delays_grow_exponentially() {
        let policy = RetryPolicy {
            max_jitter: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
    }

    #[test]
    fn delays_are_capped() {
        let policy = RetryPolicy {
            max_jitter: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(750));
        }
    }

    #[test]
    fn immediate_policy_has_no_delay() {
        assert_eq!(RetryPolicy::immediate(3).delay_for(5), Duration::ZERO);
    }
}
