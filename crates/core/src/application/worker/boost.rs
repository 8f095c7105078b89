// Saturation Tracking
// Decides when a pool boosts and when a boost ends; pure timing logic

use super::constants::{
    MONITOR_TICK_MAX, MONITOR_TICK_MIN, SATURATION_DENOMINATOR, SATURATION_NUMERATOR,
};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoostAction {
    None,
    /// Add `boost_workers` workers
    Boost,
    /// Stop the current generation of boosted workers
    EndBoost,
}

/// One sample of the pool, taken by the monitor each tick
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub buffered: usize,
    pub capacity: usize,
    pub workers: usize,
    pub boosted: usize,
}

impl Sample {
    pub fn is_saturated(&self) -> bool {
        self.buffered * SATURATION_DENOMINATOR >= self.capacity * SATURATION_NUMERATOR
    }
}

/// Tracks how long the buffer has been saturated or calm
#[derive(Debug, Default)]
pub struct BoostTracker {
    saturated_since: Option<Instant>,
    calm_since: Option<Instant>,
}

impl BoostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, now: Instant, sample: Sample, boost_timeout: Duration) -> BoostAction {
        // Nobody is draining the buffer
        if sample.workers == 0 && sample.buffered > 0 {
            self.reset();
            return BoostAction::Boost;
        }

        if sample.is_saturated() {
            self.calm_since = None;
            let since = *self.saturated_since.get_or_insert(now);
            if now.duration_since(since) >= boost_timeout {
                // each further boost needs another full period of saturation
                self.saturated_since = None;
                return BoostAction::Boost;
            }
            return BoostAction::None;
        }

        self.saturated_since = None;
        if sample.boosted == 0 {
            self.calm_since = None;
            return BoostAction::None;
        }
        let since = *self.calm_since.get_or_insert(now);
        if now.duration_since(since) >= boost_timeout {
            self.calm_since = None;
            return BoostAction::EndBoost;
        }
        BoostAction::None
    }

    fn reset(&mut self) {
        self.saturated_since = None;
        self.calm_since = None;
    }
}

/// Monitor sampling interval for a given boost timeout
pub fn monitor_tick(boost_timeout: Duration) -> Duration {
    (boost_timeout / 4).clamp(MONITOR_TICK_MIN, MONITOR_TICK_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(200);

    fn sample(buffered: usize, workers: usize, boosted: usize) -> Sample {
        Sample {
            buffered,
            capacity: 10,
            workers,
            boosted,
        }
    }

    #[test]
    fn test_saturation_threshold_is_ninety_percent() {
        assert!(!sample(8, 1, 0).is_saturated());
        assert!(sample(9, 1, 0).is_saturated());
        assert!(sample(10, 1, 0).is_saturated());

        let tiny = Sample {
            buffered: 1,
            capacity: 1,
            workers: 1,
            boosted: 0,
        };
        assert!(tiny.is_saturated());
    }

    #[test]
    fn test_boost_only_after_sustained_saturation() {
        let start = Instant::now();
        let mut tracker = BoostTracker::new();

        assert_eq!(tracker.observe(start, sample(10, 1, 0), TIMEOUT), BoostAction::None);
        assert_eq!(
            tracker.observe(start + Duration::from_millis(100), sample(10, 1, 0), TIMEOUT),
            BoostAction::None
        );
        assert_eq!(
            tracker.observe(start + Duration::from_millis(200), sample(10, 1, 0), TIMEOUT),
            BoostAction::Boost
        );
        // clock restarted after the boost
        assert_eq!(
            tracker.observe(start + Duration::from_millis(250), sample(10, 3, 2), TIMEOUT),
            BoostAction::None
        );
    }

    #[test]
    fn test_calm_interrupts_saturation_clock() {
        let start = Instant::now();
        let mut tracker = BoostTracker::new();

        tracker.observe(start, sample(10, 1, 0), TIMEOUT);
        tracker.observe(start + Duration::from_millis(150), sample(2, 1, 0), TIMEOUT);
        assert_eq!(
            tracker.observe(start + Duration::from_millis(250), sample(10, 1, 0), TIMEOUT),
            BoostAction::None
        );
    }

    #[test]
    fn test_boost_ends_after_sustained_calm() {
        let start = Instant::now();
        let mut tracker = BoostTracker::new();

        assert_eq!(tracker.observe(start, sample(0, 3, 2), TIMEOUT), BoostAction::None);
        assert_eq!(
            tracker.observe(start + Duration::from_millis(199), sample(0, 3, 2), TIMEOUT),
            BoostAction::None
        );
        assert_eq!(
            tracker.observe(start + Duration::from_millis(200), sample(0, 3, 2), TIMEOUT),
            BoostAction::EndBoost
        );
    }

    #[test]
    fn test_calm_without_boost_does_nothing() {
        let start = Instant::now();
        let mut tracker = BoostTracker::new();
        assert_eq!(
            tracker.observe(start + Duration::from_secs(10), sample(0, 1, 0), TIMEOUT),
            BoostAction::None
        );
    }

    #[test]
    fn test_zero_workers_with_backlog_boosts_immediately() {
        let mut tracker = BoostTracker::new();
        assert_eq!(
            tracker.observe(Instant::now(), sample(1, 0, 0), TIMEOUT),
            BoostAction::Boost
        );
        assert_eq!(
            tracker.observe(Instant::now(), sample(0, 0, 0), TIMEOUT),
            BoostAction::None
        );
    }

    #[test]
    fn test_monitor_tick_is_clamped() {
        assert_eq!(monitor_tick(Duration::from_millis(1)), MONITOR_TICK_MIN);
        assert_eq!(monitor_tick(Duration::from_millis(200)), Duration::from_millis(50));
        assert_eq!(monitor_tick(Duration::from_secs(300)), MONITOR_TICK_MAX);
    }
}
