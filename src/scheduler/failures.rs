use std::time::Duration;
use tokio::time::Instant;

/// Consecutive-failure bookkeeping that drives the escalating cooldown
#[derive(Debug, Clone, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
}

impl FailureTracker {
    pub fn record_success(&mut self, now: Instant) {
        self.consecutive_failures = 0;
        self.last_success = Some(now);
    }

    /// Returns the new consecutive failure count
    pub fn record_failure(&mut self, now: Instant) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = Some(now);
        self.consecutive_failures
    }

    /// Cooldown grows with the failure streak: base * min(failures, max_multiplier)
    pub fn cooldown_window(&self, base: Duration, max_multiplier: u32) -> Duration {
        let multiplier = self.consecutive_failures.clamp(1, max_multiplier.max(1));
        base.saturating_mul(multiplier)
    }

    /// Time left before cycles may contact upstream again
    pub fn cooldown_remaining(
        &self,
        now: Instant,
        base: Duration,
        max_multiplier: u32,
    ) -> Option<Duration> {
        let last_failure = self.last_failure?;
        let window = self.cooldown_window(base, max_multiplier);
        let elapsed = now.saturating_duration_since(last_failure);

        (elapsed < window).then(|| window - elapsed)
    }

    /// Reset the streak once the last failure is old enough; true when a reset happened
    pub fn reset_if_stale(&mut self, now: Instant, reset_after: Duration) -> bool {
        match self.last_failure {
            Some(last) if self.consecutive_failures > 0 => {
                if now.saturating_duration_since(last) >= reset_after {
                    self.consecutive_failures = 0;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn since_last_success(&self, now: Instant) -> Option<Duration> {
        self.last_success
            .map(|last| now.saturating_duration_since(last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(15 * 60);

    #[test]
    fn test_no_failure_no_cooldown() {
        let tracker = FailureTracker::default();
        assert_eq!(tracker.cooldown_remaining(Instant::now(), BASE, 4), None);
    }

    #[test]
    fn test_cooldown_escalates_and_caps() {
        let mut tracker = FailureTracker::default();
        let now = Instant::now();

        tracker.record_failure(now);
        assert_eq!(tracker.cooldown_window(BASE, 4), BASE);

        tracker.record_failure(now);
        tracker.record_failure(now);
        assert_eq!(tracker.cooldown_window(BASE, 4), BASE * 3);

        for _ in 0..10 {
            tracker.record_failure(now);
        }
        assert_eq!(tracker.consecutive_failures(), 13);
        assert_eq!(tracker.cooldown_window(BASE, 4), BASE * 4);
    }

    #[test]
    fn test_cooldown_remaining_expires() {
        let mut tracker = FailureTracker::default();
        let failed_at = Instant::now();
        tracker.record_failure(failed_at);
        tracker.record_failure(failed_at);

        let later = failed_at + Duration::from_secs(10 * 60);
        assert_eq!(
            tracker.cooldown_remaining(later, BASE, 4),
            Some(Duration::from_secs(20 * 60))
        );

        let much_later = failed_at + Duration::from_secs(30 * 60);
        assert_eq!(tracker.cooldown_remaining(much_later, BASE, 4), None);
    }

    #[test]
    fn test_success_resets_streak() {
        let mut tracker = FailureTracker::default();
        let now = Instant::now();
        tracker.record_failure(now);
        tracker.record_failure(now);

        tracker.record_success(now);
        assert_eq!(tracker.consecutive_failures(), 0);
        assert_eq!(tracker.since_last_success(now), Some(Duration::ZERO));
        // The last failure still imposes the base cooldown
        assert_eq!(tracker.cooldown_remaining(now, BASE, 4), Some(BASE));
    }

    #[test]
    fn test_health_check_resets_after_quiet_period() {
        let mut tracker = FailureTracker::default();
        let failed_at = Instant::now();
        tracker.record_failure(failed_at);
        tracker.record_failure(failed_at);

        let reset_after = Duration::from_secs(2 * 3600);
        assert!(!tracker.reset_if_stale(failed_at + Duration::from_secs(3600), reset_after));
        assert_eq!(tracker.consecutive_failures(), 2);

        assert!(tracker.reset_if_stale(failed_at + reset_after, reset_after));
        assert_eq!(tracker.consecutive_failures(), 0);

        // Nothing left to reset
        assert!(!tracker.reset_if_stale(failed_at + reset_after * 2, reset_after));
    }
}
