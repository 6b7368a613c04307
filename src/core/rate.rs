//! Hit Rate Limiting
//!
//! Bounds how often a single player's hits are accepted. Excess hits are
//! absorbed rather than rejected, so fast legitimate play is never interrupted
//! while automated rapid-fire input cannot push the score past a fixed ceiling.

use std::time::{Duration, Instant};

/// Default minimum interval between two accepted hits (20 hits per second).
pub const DEFAULT_MIN_HIT_INTERVAL: Duration = Duration::from_millis(50);

/// Per-player minimum inter-hit interval gate.
///
/// Time is passed in by the caller so the gate stays deterministic under test.
#[derive(Debug, Clone)]
pub struct HitRateLimiter {
    min_interval: Duration,
    last_accepted: Option<Instant>,
}

impl HitRateLimiter {
    /// Create a limiter that accepts at most one hit per `min_interval`.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: None,
        }
    }

    /// Try to accept a hit at `now`. Returns `false` if the hit arrives
    /// sooner than `min_interval` after the last accepted one.
    pub fn try_accept(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.min_interval {
                return false;
            }
        }
        self.last_accepted = Some(now);
        true
    }

    /// Forget the last accepted hit.
    pub fn reset(&mut self) {
        self.last_accepted = None;
    }
}

impl Default for HitRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_HIT_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_hit_accepted() {
        let mut limiter = HitRateLimiter::default();
        assert!(limiter.try_accept(Instant::now()));
    }

    #[test]
    fn test_hits_inside_interval_dropped() {
        let mut limiter = HitRateLimiter::new(Duration::from_millis(50));
        let t0 = Instant::now();

        assert!(limiter.try_accept(t0));
        assert!(!limiter.try_accept(t0 + Duration::from_millis(20)));
        assert!(!limiter.try_accept(t0 + Duration::from_millis(49)));
        assert!(limiter.try_accept(t0 + Duration::from_millis(50)));
    }

    #[test]
    fn test_dropped_hit_does_not_extend_window() {
        let mut limiter = HitRateLimiter::new(Duration::from_millis(50));
        let t0 = Instant::now();

        assert!(limiter.try_accept(t0));
        assert!(!limiter.try_accept(t0 + Duration::from_millis(40)));
        // Measured from the last accepted hit, not the dropped one
        assert!(limiter.try_accept(t0 + Duration::from_millis(55)));
    }

    #[test]
    fn test_zero_interval_accepts_everything() {
        let mut limiter = HitRateLimiter::new(Duration::ZERO);
        let t0 = Instant::now();
        for _ in 0..100 {
            assert!(limiter.try_accept(t0));
        }
    }

    #[test]
    fn test_reset() {
        let mut limiter = HitRateLimiter::new(Duration::from_secs(10));
        let t0 = Instant::now();
        assert!(limiter.try_accept(t0));
        assert!(!limiter.try_accept(t0));
        limiter.reset();
        assert!(limiter.try_accept(t0));
    }

    proptest! {
        /// An auto-clicker firing every `period_ms` never gets more hits
        /// accepted than the ceiling implied by the minimum interval.
        #[test]
        fn prop_accepted_hits_bounded(period_ms in 1u64..200, count in 1usize..500) {
            let interval = Duration::from_millis(50);
            let mut limiter = HitRateLimiter::new(interval);
            let t0 = Instant::now();

            let accepted = (0..count)
                .filter(|i| limiter.try_accept(t0 + Duration::from_millis(*i as u64 * period_ms)))
                .count();

            let span_ms = (count as u64 - 1) * period_ms;
            let ceiling = (span_ms / 50) as usize + 1;
            prop_assert!(accepted <= ceiling);
            prop_assert!(accepted >= 1);
        }
    }
}
