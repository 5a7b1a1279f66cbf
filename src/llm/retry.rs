//! # Completion Retry Policy
//!
//! Exponential backoff for completion-provider calls, kept as a pure
//! function from attempt number to delay so retry timing is unit-testable
//! without real sleeps. The I/O retry loop lives with the caller.

use std::time::Duration;

/// Retry parameters for completion-provider calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(4000),
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep after failed attempt number `attempt` (0-based):
    /// `base × 2^attempt`, capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let delay_ms = match 1u64.checked_shl(attempt) {
            Some(factor) => base_ms.saturating_mul(factor),
            None => u64::MAX,
        };
        Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_per_attempt_until_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(4000),
        };

        let delays: Vec<u64> = (0..5)
            .map(|a| policy.backoff_delay(a).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 4000]);
    }

    #[test]
    fn test_huge_attempt_numbers_stay_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(63), policy.max_delay);
        assert_eq!(policy.backoff_delay(64), policy.max_delay);
        assert_eq!(policy.backoff_delay(200), policy.max_delay);
    }
}
