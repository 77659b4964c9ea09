use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::Mutex;

fn now_micros() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_micros() as u64
}

/// A content-addressed byte payload owned by the store. External callers get either a
/// copy of the payload or a reader; they never get mutable access to this type.
pub struct Blob {
    pub digest: String,
    pub data: Bytes,
    pub size: u64,
    pub created_at: SystemTime,
    last_access: AtomicU64,
    ref_count: AtomicI64,
    tags: Mutex<HashSet<String>>,
}

impl Blob {
    pub fn new(digest: String, data: Bytes) -> Self {
        let size = data.len() as u64;
        Self {
            digest,
            data,
            size,
            created_at: SystemTime::now(),
            last_access: AtomicU64::new(now_micros()),
            ref_count: AtomicI64::new(1),
            tags: Mutex::new(HashSet::new()),
        }
    }

    pub fn touch(&self) {
        self.last_access.store(now_micros(), Ordering::Relaxed);
    }

    pub fn last_access_micros(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    pub fn ref_count(&self) -> i64 {
        self.ref_count.load(Ordering::Relaxed)
    }

    pub fn incr_ref(&self) -> i64 {
        self.ref_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn decr_ref(&self) -> i64 {
        self.ref_count.fetch_sub(1, Ordering::Relaxed) - 1
    }

    pub fn add_tag(&self, tag: &str) {
        self.tags.lock().insert(tag.to_string());
    }

    pub fn remove_tag(&self, tag: &str) {
        self.tags.lock().remove(tag);
    }

    pub fn tags(&self) -> Vec<String> {
        self.tags.lock().iter().cloned().collect()
    }
}
