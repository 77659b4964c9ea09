use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct SpaceCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    op_latency_sum_micros: AtomicU64,
    op_count: AtomicU64,
    evictions: AtomicU64,
}

impl SpaceCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, micros: u64) {
        self.op_latency_sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.op_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SpaceMetrics {
        let count = self.op_count.load(Ordering::Relaxed);
        let sum = self.op_latency_sum_micros.load(Ordering::Relaxed);
        SpaceMetrics {
            hits: self.hits(),
            misses: self.misses(),
            evictions: self.evictions(),
            avg_latency_micros: if count == 0 { 0.0 } else { sum as f64 / count as f64 },
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SpaceMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub avg_latency_micros: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheMetrics {
    pub manifest: SpaceMetrics,
    pub blob: SpaceMetrics,
    pub tags: SpaceMetrics,
    pub memory_usage: u64,
    pub memory_peak: u64,
    pub evictions: u64,
}

/// Compare-and-swap loop updating `peak` to `current`'s value whenever it has grown.
pub fn update_peak(current: &AtomicU64, peak: &AtomicU64) {
    let cur = current.load(Ordering::Relaxed);
    let mut observed = peak.load(Ordering::Relaxed);
    while cur > observed {
        match peak.compare_exchange_weak(observed, cur, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => observed = actual,
        }
    }
}
