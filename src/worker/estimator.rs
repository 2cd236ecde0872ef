//! Adaptive batch sizing

use std::time::Duration;

/// Upper bound on a single batch, whatever the measured speed
pub const MAX_BATCH: usize = 10_000;

/// Tracks the timing of the last batch and proposes the size of the next one
/// so that a worker computes for roughly `nominal_busy` between round trips.
#[derive(Debug, Clone)]
pub struct ThroughputEstimator {
    nominal_busy: Option<Duration>,
    default_batch: usize,
    compute_time: Option<Duration>,
    communication_time: Duration,
}

impl ThroughputEstimator {
    /// `nominal_busy` of `None` keeps the batch size fixed at `default_batch`.
    pub fn new(nominal_busy: Option<Duration>, default_batch: usize) -> Self {
        Self {
            nominal_busy: nominal_busy.filter(|d| !d.is_zero()),
            default_batch: default_batch.clamp(1, MAX_BATCH),
            compute_time: None,
            communication_time: Duration::ZERO,
        }
    }

    /// Record how long the last batch spent computing and on the wire.
    pub fn record(&mut self, compute: Duration, communication: Duration) {
        self.compute_time = Some(compute);
        self.communication_time = communication;
    }

    pub fn compute_time(&self) -> Option<Duration> {
        self.compute_time
    }

    pub fn communication_time(&self) -> Duration {
        self.communication_time
    }

    /// Points per second of pure compute
    pub fn brutto_speed(&self, count: usize) -> Option<f64> {
        let secs = self.compute_time?.as_secs_f64();
        Some(if secs > 0.0 {
            count as f64 / secs
        } else {
            f64::INFINITY
        })
    }

    /// Points per second including the fetch and push round trips
    pub fn netto_speed(&self, count: usize) -> Option<f64> {
        let secs = (self.compute_time? + self.communication_time).as_secs_f64();
        Some(if secs > 0.0 {
            count as f64 / secs
        } else {
            f64::INFINITY
        })
    }

    pub fn next_batch_size(&self, last_count: usize) -> usize {
        let (Some(busy), Some(speed)) = (self.nominal_busy, self.brutto_speed(last_count)) else {
            return self.default_batch;
        };

        let proposed = (busy.as_secs_f64() * speed).round();
        if proposed >= MAX_BATCH as f64 {
            MAX_BATCH
        } else if proposed < 1.0 {
            1
        } else {
            proposed as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adaptive(busy_secs: f64) -> ThroughputEstimator {
        ThroughputEstimator::new(Some(Duration::from_secs_f64(busy_secs)), 10)
    }

    #[test]
    fn test_first_request_uses_default() {
        assert_eq!(adaptive(2.0).next_batch_size(0), 10);
    }

    #[test]
    fn test_zero_busy_time_keeps_fixed_size() {
        let mut estimator = ThroughputEstimator::new(Some(Duration::ZERO), 25);
        estimator.record(Duration::from_millis(10), Duration::from_millis(5));
        assert_eq!(estimator.next_batch_size(1000), 25);

        let mut estimator = ThroughputEstimator::new(None, 25);
        estimator.record(Duration::from_millis(10), Duration::ZERO);
        assert_eq!(estimator.next_batch_size(1000), 25);
    }

    #[test]
    fn test_scales_to_nominal_busy_time() {
        let mut estimator = adaptive(2.0);
        estimator.record(Duration::from_millis(500), Duration::from_millis(500));
        assert_eq!(estimator.brutto_speed(100), Some(200.0));
        assert_eq!(estimator.netto_speed(100), Some(100.0));
        assert_eq!(estimator.next_batch_size(100), 400);
    }

    #[test]
    fn test_clamped_to_bounds() {
        let mut estimator = adaptive(10.0);
        estimator.record(Duration::from_millis(1), Duration::ZERO);
        assert_eq!(estimator.next_batch_size(100), MAX_BATCH);

        estimator.record(Duration::ZERO, Duration::ZERO);
        assert_eq!(estimator.next_batch_size(1), MAX_BATCH);

        let mut slow = adaptive(0.1);
        slow.record(Duration::from_secs(60), Duration::ZERO);
        assert_eq!(slow.next_batch_size(1), 1);
    }

    #[test]
    fn test_batch_size_follows_speed_up() {
        let mut estimator = adaptive(1.0);
        let mut previous = 0;
        for millis in [2000u64, 1000, 400, 100, 20, 5, 1] {
            estimator.record(Duration::from_millis(millis), Duration::from_millis(50));
            let next = estimator.next_batch_size(50);
            assert!(next >= previous, "{} then {}", previous, next);
            previous = next;
        }
        assert_eq!(previous, MAX_BATCH);
    }

    #[test]
    fn test_default_batch_is_clamped() {
        assert_eq!(ThroughputEstimator::new(None, 0).next_batch_size(0), 1);
        assert_eq!(
            ThroughputEstimator::new(None, 50_000).next_batch_size(0),
            MAX_BATCH
        );
    }
}
