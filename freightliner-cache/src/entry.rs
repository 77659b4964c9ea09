use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// Envelope around a cached value carrying the bookkeeping every space needs: when it was
/// cached, its TTL, and atomic access tracking. Wrapped in `Arc` by callers so that cloning
/// the entry out of the LRU map (required to release the map's lock before mutating
/// recency-adjacent counters) still shares the same atomics.
pub struct CacheEntry<T> {
    pub value: T,
    pub cached_at: SystemTime,
    pub ttl: Duration,
    access_count: AtomicU64,
    last_access: AtomicU64,
    size: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, ttl: Duration, size: u64) -> Self {
        let now = now_micros();
        Self {
            value,
            cached_at: SystemTime::now(),
            ttl,
            access_count: AtomicU64::new(0),
            last_access: AtomicU64::new(now),
            size,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_expired(&self) -> bool {
        match SystemTime::now().duration_since(self.cached_at) {
            Ok(elapsed) => elapsed > self.ttl,
            Err(_) => false,
        }
    }

    pub fn mark_accessed(&self) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
        self.last_access.store(now_micros(), Ordering::Relaxed);
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    pub fn last_access_micros(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn expires_after_ttl() {
        let e = CacheEntry::new(42, Duration::from_millis(1), 8);
        assert!(!e.is_expired());
        sleep(Duration::from_millis(5));
        assert!(e.is_expired());
    }

    #[test]
    fn mark_accessed_increments_counter() {
        let e = CacheEntry::new("x", Duration::from_secs(60), 1);
        assert_eq!(e.access_count(), 0);
        e.mark_accessed();
        e.mark_accessed();
        assert_eq!(e.access_count(), 2);
    }
}
