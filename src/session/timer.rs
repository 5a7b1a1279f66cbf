//! # Interview Timer
//!
//! Tracks elapsed wall-clock time since session start against the configured
//! maximum duration. Exposes warn/expired predicates and a formatted elapsed
//! time for logging and finalization.
//!
//! The warn predicate stays true for the whole warning window; it is meant
//! to fire once per approach, so callers track whether they already warned.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct InterviewTimer {
    started_at: Instant,
    max_duration: Duration,
    warning_threshold: Duration,
}

impl InterviewTimer {
    /// Start a timer now with the given maximum duration and warning
    /// threshold (minutes remaining at which the warn predicate turns on).
    pub fn new(max_duration_minutes: u64, warning_threshold_minutes: u64) -> Self {
        Self::starting_at(
            Instant::now(),
            max_duration_minutes,
            warning_threshold_minutes,
        )
    }

    /// Start a timer at an arbitrary instant. Tests construct timers in the
    /// past to exercise the warn/expired windows without sleeping.
    pub fn starting_at(
        started_at: Instant,
        max_duration_minutes: u64,
        warning_threshold_minutes: u64,
    ) -> Self {
        Self {
            started_at,
            max_duration: Duration::from_secs(max_duration_minutes * 60),
            warning_threshold: Duration::from_secs(warning_threshold_minutes * 60),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// True once remaining time is at or under the warning threshold but the
    /// session has not yet expired.
    pub fn in_warning_window(&self) -> bool {
        let elapsed = self.elapsed();
        elapsed < self.max_duration && self.max_duration - elapsed <= self.warning_threshold
    }

    /// True once elapsed time has reached the maximum duration.
    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.max_duration
    }

    /// Whole minutes remaining, clamped at zero. Used in the spoken warning.
    pub fn minutes_remaining(&self) -> u64 {
        let elapsed = self.elapsed();
        if elapsed >= self.max_duration {
            0
        } else {
            (self.max_duration - elapsed).as_secs() / 60
        }
    }

    /// Elapsed time as `mm:ss` for logs and the finalized record.
    pub fn formatted_elapsed(&self) -> String {
        let secs = self.elapsed().as_secs();
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer_with_elapsed(elapsed_secs: u64, max_min: u64, warn_min: u64) -> InterviewTimer {
        let started = Instant::now() - Duration::from_secs(elapsed_secs);
        InterviewTimer::starting_at(started, max_min, warn_min)
    }

    #[test]
    fn test_fresh_timer_neither_warns_nor_expires() {
        let timer = timer_with_elapsed(0, 15, 2);
        assert!(!timer.in_warning_window());
        assert!(!timer.is_expired());
    }

    #[test]
    fn test_warning_window_at_fourteen_of_fifteen_minutes() {
        let timer = timer_with_elapsed(14 * 60, 15, 2);
        assert!(timer.in_warning_window());
        assert!(!timer.is_expired());
        assert_eq!(timer.minutes_remaining(), 1);
    }

    #[test]
    fn test_expired_at_and_past_max_duration() {
        let at_max = timer_with_elapsed(15 * 60, 15, 2);
        assert!(at_max.is_expired());
        assert!(!at_max.in_warning_window());

        let past_max = timer_with_elapsed(16 * 60, 15, 2);
        assert!(past_max.is_expired());
        assert_eq!(past_max.minutes_remaining(), 0);
    }

    #[test]
    fn test_formatted_elapsed() {
        let timer = timer_with_elapsed(83, 15, 2);
        assert_eq!(timer.formatted_elapsed(), "01:23");
    }
}
