use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

/// Upper bounds in milliseconds for each non-overflow bucket. `record` increments the
/// first bucket whose bound is greater than or equal to the observed duration; anything
/// past the last bound falls into the overflow bucket appended after these.
const BOUNDS_MS: [u64; 10] = [1, 5, 10, 25, 50, 100, 250, 500, 1_000, 5_000];

/// A fixed-bucket latency histogram backed entirely by atomics. `percentile` takes a
/// read lock around its snapshot so concurrent bucket reads don't interleave with a
/// concurrent `reset`.
pub struct LatencyHistogram {
    buckets: [AtomicU64; BOUNDS_MS.len() + 1],
    consistency: RwLock<()>,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            consistency: RwLock::new(()),
        }
    }

    pub fn record(&self, d: Duration) {
        let _guard = self.consistency.read();
        let millis = d.as_millis() as u64;
        let idx = BOUNDS_MS.iter().position(|&bound| millis <= bound).unwrap_or(BOUNDS_MS.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    /// Sums bucket counts, computes `target = ceil(total * p / 100)`, and returns the
    /// bound of the first bucket whose cumulative count reaches it. An empty histogram
    /// returns 0; a target that only the overflow bucket satisfies returns `u64::MAX`.
    pub fn percentile(&self, p: f64) -> u64 {
        let _guard = self.consistency.write();
        let counts: Vec<u64> = self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect();
        let total: u64 = counts.iter().sum();
        if total == 0 {
            return 0;
        }
        let target = (total as f64 * p / 100.0).ceil() as u64;
        let mut cumulative = 0u64;
        for (i, count) in counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return if i < BOUNDS_MS.len() { BOUNDS_MS[i] } else { u64::MAX };
            }
        }
        u64::MAX
    }

    pub fn reset(&self) {
        let _guard = self.consistency.write();
        for bucket in &self.buckets {
            bucket.store(0, Ordering::Relaxed);
        }
    }

    pub fn total(&self) -> u64 {
        self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_percentile_is_zero() {
        let h = LatencyHistogram::new();
        assert_eq!(h.percentile(50.0), 0);
        assert_eq!(h.percentile(99.0), 0);
    }

    #[test]
    fn single_sample_percentile_matches_its_bucket() {
        let h = LatencyHistogram::new();
        h.record(Duration::from_millis(30));
        assert_eq!(h.percentile(50.0), 50);
        assert_eq!(h.percentile(99.0), 50);
    }

    #[test]
    fn overflow_bucket_used_past_last_bound() {
        let h = LatencyHistogram::new();
        h.record(Duration::from_secs(10));
        assert_eq!(h.percentile(99.0), u64::MAX);
    }

    #[test]
    fn percentile_walks_cumulative_counts() {
        let h = LatencyHistogram::new();
        for _ in 0..90 {
            h.record(Duration::from_millis(1));
        }
        for _ in 0..9 {
            h.record(Duration::from_millis(50));
        }
        h.record(Duration::from_millis(5_000));
        // total = 100; p50 target = 50, satisfied by the 1ms bucket alone (90 >= 50)
        assert_eq!(h.percentile(50.0), 1);
        // p95 target = ceil(95) = 95, needs the 1ms (90) + 50ms (9) buckets = 99 >= 95
        assert_eq!(h.percentile(95.0), 50);
        // p99 target = 99, still satisfied within the 50ms bucket's cumulative 99
        assert_eq!(h.percentile(99.0), 50);
        // only the overflow sample pushes cumulative to 100
        assert_eq!(h.percentile(100.0), u64::MAX);
    }

    #[test]
    fn reset_clears_all_buckets() {
        let h = LatencyHistogram::new();
        h.record(Duration::from_millis(1));
        h.reset();
        assert_eq!(h.total(), 0);
        assert_eq!(h.percentile(50.0), 0);
    }

    #[test]
    fn bound_is_first_bucket_greater_or_equal() {
        let h = LatencyHistogram::new();
        h.record(Duration::from_millis(5));
        assert_eq!(h.percentile(100.0), 5);
        let h2 = LatencyHistogram::new();
        h2.record(Duration::from_millis(6));
        assert_eq!(h2.percentile(100.0), 10);
    }
}
