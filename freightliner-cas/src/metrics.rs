use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct CasCounters {
    blobs_stored: AtomicU64,
    blobs_retrieved: AtomicU64,
    blobs_deleted: AtomicU64,
    dedup_hits: AtomicU64,
    total_bytes: AtomicU64,
    dedup_saved_bytes: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    get_latency_sum_micros: AtomicU64,
    get_count: AtomicU64,
    put_latency_sum_micros: AtomicU64,
    put_count: AtomicU64,
}

impl CasCounters {
    pub fn record_store(&self, bytes: u64) {
        self.blobs_stored.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_dedup(&self, saved_bytes: u64) {
        self.dedup_hits.fetch_add(1, Ordering::Relaxed);
        self.dedup_saved_bytes.fetch_add(saved_bytes, Ordering::Relaxed);
    }

    pub fn record_retrieved(&self) {
        self.blobs_retrieved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deleted(&self) {
        self.blobs_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_get_latency(&self, micros: u64) {
        self.get_latency_sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.get_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_put_latency(&self, micros: u64) {
        self.put_latency_sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.put_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CasMetrics {
        let get_count = self.get_count.load(Ordering::Relaxed);
        let get_sum = self.get_latency_sum_micros.load(Ordering::Relaxed);
        let put_count = self.put_count.load(Ordering::Relaxed);
        let put_sum = self.put_latency_sum_micros.load(Ordering::Relaxed);
        CasMetrics {
            blobs_stored: self.blobs_stored.load(Ordering::Relaxed),
            blobs_retrieved: self.blobs_retrieved.load(Ordering::Relaxed),
            blobs_deleted: self.blobs_deleted.load(Ordering::Relaxed),
            dedup_hits: self.dedup_hits.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            dedup_saved_bytes: self.dedup_saved_bytes.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            avg_get_latency_micros: if get_count == 0 { 0.0 } else { get_sum as f64 / get_count as f64 },
            avg_put_latency_micros: if put_count == 0 { 0.0 } else { put_sum as f64 / put_count as f64 },
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CasMetrics {
    pub blobs_stored: u64,
    pub blobs_retrieved: u64,
    pub blobs_deleted: u64,
    pub dedup_hits: u64,
    pub total_bytes: u64,
    pub dedup_saved_bytes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub avg_get_latency_micros: f64,
    pub avg_put_latency_micros: f64,
}
