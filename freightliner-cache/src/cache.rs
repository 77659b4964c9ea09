use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::entry::CacheEntry;
use crate::lru::LruMap;
use crate::metrics::{update_peak, CacheMetrics, SpaceCounters};
use crate::values::{CachedBlob, CachedManifest, CachedTagList, LogicalSize};

const DEFAULT_MANIFEST_CAPACITY: usize = 10_000;
const DEFAULT_BLOB_CAPACITY: usize = 50_000;
const DEFAULT_TAG_CAPACITY: usize = 5_000;

const DEFAULT_MANIFEST_TTL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_BLOB_TTL: Duration = Duration::from_secs(6 * 60 * 60);
const DEFAULT_TAG_TTL: Duration = Duration::from_secs(15 * 60);

const DEFAULT_MAX_MEMORY_USAGE: u64 = 500 * 1024 * 1024;
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub manifest_capacity: usize,
    pub blob_capacity: usize,
    pub tag_capacity: usize,
    pub manifest_ttl: Duration,
    pub blob_ttl: Duration,
    pub tag_ttl: Duration,
    pub max_memory_usage: u64,
    pub eviction_enabled: bool,
    pub cleanup_interval: Duration,
    pub metrics_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            manifest_capacity: DEFAULT_MANIFEST_CAPACITY,
            blob_capacity: DEFAULT_BLOB_CAPACITY,
            tag_capacity: DEFAULT_TAG_CAPACITY,
            manifest_ttl: DEFAULT_MANIFEST_TTL,
            blob_ttl: DEFAULT_BLOB_TTL,
            tag_ttl: DEFAULT_TAG_TTL,
            max_memory_usage: DEFAULT_MAX_MEMORY_USAGE,
            eviction_enabled: true,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            metrics_interval: DEFAULT_METRICS_INTERVAL,
        }
    }
}

#[derive(Default)]
pub struct CacheBuilder {
    config: CacheConfig,
}

impl CacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn manifest_capacity(mut self, n: usize) -> Self {
        self.config.manifest_capacity = n;
        self
    }

    pub fn blob_capacity(mut self, n: usize) -> Self {
        self.config.blob_capacity = n;
        self
    }

    pub fn tag_capacity(mut self, n: usize) -> Self {
        self.config.tag_capacity = n;
        self
    }

    pub fn manifest_ttl(mut self, ttl: Duration) -> Self {
        self.config.manifest_ttl = ttl;
        self
    }

    pub fn blob_ttl(mut self, ttl: Duration) -> Self {
        self.config.blob_ttl = ttl;
        self
    }

    pub fn tag_ttl(mut self, ttl: Duration) -> Self {
        self.config.tag_ttl = ttl;
        self
    }

    pub fn max_memory_usage(mut self, bytes: u64) -> Self {
        self.config.max_memory_usage = bytes;
        self
    }

    pub fn eviction_enabled(mut self, enabled: bool) -> Self {
        self.config.eviction_enabled = enabled;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.config.metrics_interval = interval;
        self
    }

    pub fn build(self) -> HighPerformanceCache {
        HighPerformanceCache::new(self.config)
    }
}

type ManifestEntry = Arc<CacheEntry<CachedManifest>>;
type BlobEntry = Arc<CacheEntry<CachedBlob>>;
type TagEntry = Arc<CacheEntry<CachedTagList>>;

struct Spaces {
    manifest: LruMap<String, ManifestEntry>,
    blob: LruMap<String, BlobEntry>,
    tags: LruMap<String, TagEntry>,
}

struct Counters {
    manifest: SpaceCounters,
    blob: SpaceCounters,
    tags: SpaceCounters,
}

struct Tasks {
    cleanup: Option<JoinHandle<()>>,
    metrics: Option<JoinHandle<()>>,
}

struct Inner {
    config: CacheConfig,
    spaces: Spaces,
    counters: Counters,
    current_memory_usage: AtomicU64,
    peak_memory_usage: AtomicU64,
    running: AtomicBool,
    cancel: CancellationToken,
    tasks: Mutex<Tasks>,
}

/// Three independent LRU spaces (manifests, blob metadata, tag lists) behind a shared
/// memory ceiling, with background tickers for TTL sweeping and metrics logging.
///
/// Cheap to clone: all state lives behind the inner `Arc`, so clones share one cache.
#[derive(Clone)]
pub struct HighPerformanceCache {
    inner: Arc<Inner>,
}

fn manifest_key(repo: &str, tag: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repo.as_bytes());
    hasher.update(b":");
    hasher.update(tag.as_bytes());
    hex::encode(hasher.finalize())
}

impl HighPerformanceCache {
    pub fn new(config: CacheConfig) -> Self {
        let spaces = Spaces {
            manifest: LruMap::new(config.manifest_capacity),
            blob: LruMap::new(config.blob_capacity),
            tags: LruMap::new(config.tag_capacity),
        };
        let counters = Counters {
            manifest: SpaceCounters::default(),
            blob: SpaceCounters::default(),
            tags: SpaceCounters::default(),
        };
        Self {
            inner: Arc::new(Inner {
                config,
                spaces,
                counters,
                current_memory_usage: AtomicU64::new(0),
                peak_memory_usage: AtomicU64::new(0),
                running: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Tasks { cleanup: None, metrics: None }),
            }),
        }
    }

    pub fn builder() -> CacheBuilder {
        CacheBuilder::new()
    }

    fn account_insert(&self, size: u64) {
        self.inner.current_memory_usage.fetch_add(size, Ordering::Relaxed);
        update_peak(&self.inner.current_memory_usage, &self.inner.peak_memory_usage);
    }

    fn account_remove(&self, size: u64) {
        self.inner
            .current_memory_usage
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| Some(cur.saturating_sub(size)))
            .ok();
    }

    fn memory_usage(&self) -> u64 {
        self.inner.current_memory_usage.load(Ordering::Relaxed)
    }

    /// Evicts least-recently-used entries, manifests first, then blobs, then tags, until
    /// there is room for `incoming` more bytes or all three spaces are empty.
    fn enforce_memory_limit(&self, incoming: u64) {
        let target = self.inner.config.max_memory_usage.saturating_sub(incoming);
        if self.memory_usage() <= target {
            return;
        }
        for _ in 0..self.inner.spaces.manifest.size() {
            if self.memory_usage() <= target {
                break;
            }
            if let Some((_, evicted)) = self.inner.spaces.manifest.get_oldest().and_then(|(k, _)| {
                self.inner.spaces.manifest.remove(&k).map(|v| (k, v))
            }) {
                self.account_remove(evicted.size());
                self.inner.counters.manifest.record_eviction();
            } else {
                break;
            }
        }
        for _ in 0..self.inner.spaces.blob.size() {
            if self.memory_usage() <= target {
                break;
            }
            if let Some((_, evicted)) = self.inner.spaces.blob.get_oldest().and_then(|(k, _)| {
                self.inner.spaces.blob.remove(&k).map(|v| (k, v))
            }) {
                self.account_remove(evicted.size());
                self.inner.counters.blob.record_eviction();
            } else {
                break;
            }
        }
        for _ in 0..self.inner.spaces.tags.size() {
            if self.memory_usage() <= target {
                break;
            }
            if let Some((_, evicted)) = self.inner.spaces.tags.get_oldest().and_then(|(k, _)| {
                self.inner.spaces.tags.remove(&k).map(|v| (k, v))
            }) {
                self.account_remove(evicted.size());
                self.inner.counters.tags.record_eviction();
            } else {
                break;
            }
        }
    }

    pub fn get_manifest(&self, repo: &str, tag: &str) -> Option<CachedManifest> {
        let started = Instant::now();
        let key = manifest_key(repo, tag);
        let result = match self.inner.spaces.manifest.get(&key) {
            None => {
                self.inner.counters.manifest.record_miss();
                None
            }
            Some(entry) => {
                if entry.is_expired() {
                    if let Some(removed) = self.inner.spaces.manifest.remove(&key) {
                        self.account_remove(removed.size());
                    }
                    self.inner.counters.manifest.record_miss();
                    None
                } else {
                    entry.mark_accessed();
                    self.inner.counters.manifest.record_hit();
                    Some(entry.value.clone())
                }
            }
        };
        self.inner.counters.manifest.record_latency(started.elapsed().as_micros() as u64);
        result
    }

    pub fn put_manifest(&self, repo: &str, tag: &str, data: CachedManifest) {
        let key = manifest_key(repo, tag);
        let size = data.logical_size(key.len());
        if self.inner.config.eviction_enabled && self.memory_usage() + size > self.inner.config.max_memory_usage {
            self.enforce_memory_limit(size);
        }
        let entry = Arc::new(CacheEntry::new(data, self.inner.config.manifest_ttl, size));
        let outcome = self.inner.spaces.manifest.put(key, entry);
        if let Some(previous) = outcome.previous {
            self.account_remove(previous.size());
        }
        if let Some((_, evicted)) = outcome.evicted {
            self.account_remove(evicted.size());
            self.inner.counters.manifest.record_eviction();
        }
        self.account_insert(size);
    }

    pub fn get_blob(&self, digest: &str) -> Option<CachedBlob> {
        let started = Instant::now();
        let key = digest.to_string();
        let result = match self.inner.spaces.blob.get(&key) {
            None => {
                self.inner.counters.blob.record_miss();
                None
            }
            Some(entry) => {
                if entry.is_expired() {
                    if let Some(removed) = self.inner.spaces.blob.remove(&key) {
                        self.account_remove(removed.size());
                    }
                    self.inner.counters.blob.record_miss();
                    None
                } else {
                    entry.mark_accessed();
                    self.inner.counters.blob.record_hit();
                    Some(entry.value.clone())
                }
            }
        };
        self.inner.counters.blob.record_latency(started.elapsed().as_micros() as u64);
        result
    }

    pub fn put_blob(&self, digest: &str, data: CachedBlob) {
        let key = digest.to_string();
        let size = data.logical_size(key.len());
        if self.inner.config.eviction_enabled && self.memory_usage() + size > self.inner.config.max_memory_usage {
            self.enforce_memory_limit(size);
        }
        let entry = Arc::new(CacheEntry::new(data, self.inner.config.blob_ttl, size));
        let outcome = self.inner.spaces.blob.put(key, entry);
        if let Some(previous) = outcome.previous {
            self.account_remove(previous.size());
        }
        if let Some((_, evicted)) = outcome.evicted {
            self.account_remove(evicted.size());
            self.inner.counters.blob.record_eviction();
        }
        self.account_insert(size);
    }

    pub fn get_tags(&self, repo: &str) -> Option<Vec<String>> {
        let started = Instant::now();
        let key = repo.to_string();
        let result = match self.inner.spaces.tags.get(&key) {
            None => {
                self.inner.counters.tags.record_miss();
                None
            }
            Some(entry) => {
                if entry.is_expired() {
                    if let Some(removed) = self.inner.spaces.tags.remove(&key) {
                        self.account_remove(removed.size());
                    }
                    self.inner.counters.tags.record_miss();
                    None
                } else {
                    entry.mark_accessed();
                    self.inner.counters.tags.record_hit();
                    Some(entry.value.tags.clone())
                }
            }
        };
        self.inner.counters.tags.record_latency(started.elapsed().as_micros() as u64);
        result
    }

    /// `tags` is copied into the cache; mutating the caller's slice afterward has no effect
    /// on what's stored.
    pub fn put_tags(&self, repo: &str, tags: &[String]) {
        let key = repo.to_string();
        let data = CachedTagList { tags: tags.to_vec() };
        let size = data.logical_size(key.len());
        if self.inner.config.eviction_enabled && self.memory_usage() + size > self.inner.config.max_memory_usage {
            self.enforce_memory_limit(size);
        }
        let entry = Arc::new(CacheEntry::new(data, self.inner.config.tag_ttl, size));
        let outcome = self.inner.spaces.tags.put(key, entry);
        if let Some(previous) = outcome.previous {
            self.account_remove(previous.size());
        }
        if let Some((_, evicted)) = outcome.evicted {
            self.account_remove(evicted.size());
            self.inner.counters.tags.record_eviction();
        }
        self.account_insert(size);
    }

    pub fn invalidate_manifest(&self, repo: &str, tag: &str) {
        let key = manifest_key(repo, tag);
        if let Some(removed) = self.inner.spaces.manifest.remove(&key) {
            self.account_remove(removed.size());
        }
    }

    pub fn invalidate_blob(&self, digest: &str) {
        if let Some(removed) = self.inner.spaces.blob.remove(&digest.to_string()) {
            self.account_remove(removed.size());
        }
    }

    pub fn invalidate_tags(&self, repo: &str) {
        if let Some(removed) = self.inner.spaces.tags.remove(&repo.to_string()) {
            self.account_remove(removed.size());
        }
    }

    pub fn metrics(&self) -> CacheMetrics {
        let manifest = self.inner.counters.manifest.snapshot();
        let blob = self.inner.counters.blob.snapshot();
        let tags = self.inner.counters.tags.snapshot();
        CacheMetrics {
            evictions: manifest.evictions + blob.evictions + tags.evictions,
            manifest,
            blob,
            tags,
            memory_usage: self.memory_usage(),
            memory_peak: self.inner.peak_memory_usage.load(Ordering::Relaxed),
        }
    }

    fn sweep_expired(&self) {
        let mut expired = Vec::new();
        self.inner.spaces.manifest.iterate_oldest(|k, v| {
            if v.is_expired() {
                expired.push(k.clone());
            }
            true
        });
        for key in expired {
            if let Some(removed) = self.inner.spaces.manifest.remove(&key) {
                self.account_remove(removed.size());
            }
        }

        let mut expired = Vec::new();
        self.inner.spaces.blob.iterate_oldest(|k, v| {
            if v.is_expired() {
                expired.push(k.clone());
            }
            true
        });
        for key in expired {
            if let Some(removed) = self.inner.spaces.blob.remove(&key) {
                self.account_remove(removed.size());
            }
        }

        let mut expired = Vec::new();
        self.inner.spaces.tags.iterate_oldest(|k, v| {
            if v.is_expired() {
                expired.push(k.clone());
            }
            true
        });
        for key in expired {
            if let Some(removed) = self.inner.spaces.tags.remove(&key) {
                self.account_remove(removed.size());
            }
        }
    }

    /// Starts the background cleanup and metrics tickers. Idempotent: a second call on an
    /// already-started cache is a no-op.
    pub fn start(&self) {
        if self.inner.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return;
        }

        let cleanup_cache = self.clone();
        let cleanup_interval = self.inner.config.cleanup_interval;
        let cleanup_cancel = self.inner.cancel.clone();
        let cleanup_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            loop {
                tokio::select! {
                    _ = cleanup_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        debug!("cache cleanup sweep starting");
                        cleanup_cache.sweep_expired();
                    }
                }
            }
        });

        let metrics_cache = self.clone();
        let metrics_interval = self.inner.config.metrics_interval;
        let metrics_cancel = self.inner.cancel.clone();
        let metrics_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(metrics_interval);
            loop {
                tokio::select! {
                    _ = metrics_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let m = metrics_cache.metrics();
                        info!(
                            "cache metrics: manifest(hits={} misses={}) blob(hits={} misses={}) tags(hits={} misses={}) memory={}/{} peak={}",
                            m.manifest.hits, m.manifest.misses,
                            m.blob.hits, m.blob.misses,
                            m.tags.hits, m.tags.misses,
                            m.memory_usage, metrics_cache.inner.config.max_memory_usage, m.memory_peak,
                        );
                    }
                }
            }
        });

        let mut tasks = self.inner.tasks.lock();
        tasks.cleanup = Some(cleanup_handle);
        tasks.metrics = Some(metrics_handle);
    }

    /// Stops the background tickers and waits for them to exit. Idempotent.
    pub async fn stop(&self) {
        if self.inner.running.compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return;
        }
        self.inner.cancel.cancel();
        let (cleanup, metrics) = {
            let mut tasks = self.inner.tasks.lock();
            (tasks.cleanup.take(), tasks.metrics.take())
        };
        if let Some(h) = cleanup {
            if let Err(e) = h.await {
                warn!("cache cleanup task did not shut down cleanly: {e}");
            }
        }
        if let Some(h) = metrics {
            if let Err(e) = h.await {
                warn!("cache metrics task did not shut down cleanly: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(data: &str) -> CachedManifest {
        CachedManifest {
            data: bytes::Bytes::copy_from_slice(data.as_bytes()),
            media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
            digest: "sha256:deadbeef".to_string(),
        }
    }

    #[test]
    fn put_then_get_manifest_hits() {
        let cache = HighPerformanceCache::new(CacheConfig::default());
        cache.put_manifest("library/alpine", "latest", manifest("{}"));
        let got = cache.get_manifest("library/alpine", "latest");
        assert!(got.is_some());
        assert_eq!(cache.metrics().manifest.hits, 1);
    }

    #[test]
    fn miss_on_unknown_key() {
        let cache = HighPerformanceCache::new(CacheConfig::default());
        assert!(cache.get_manifest("library/alpine", "latest").is_none());
        assert_eq!(cache.metrics().manifest.misses, 1);
    }

    #[test]
    fn expired_entry_counts_as_miss_and_is_evicted() {
        let config = CacheConfig {
            manifest_ttl: Duration::from_millis(1),
            ..CacheConfig::default()
        };
        let cache = HighPerformanceCache::new(config);
        cache.put_manifest("library/alpine", "latest", manifest("{}"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get_manifest("library/alpine", "latest").is_none());
        assert_eq!(cache.metrics().manifest.misses, 1);
    }

    #[test]
    fn put_tags_defensively_copies() {
        let cache = HighPerformanceCache::new(CacheConfig::default());
        let mut tags = vec!["latest".to_string()];
        cache.put_tags("library/alpine", &tags);
        tags.push("edge".to_string());
        assert_eq!(cache.get_tags("library/alpine"), Some(vec!["latest".to_string()]));
    }

    #[test]
    fn memory_limit_evicts_across_spaces() {
        let config = CacheConfig {
            max_memory_usage: 200,
            manifest_capacity: 1000,
            blob_capacity: 1000,
            tag_capacity: 1000,
            ..CacheConfig::default()
        };
        let cache = HighPerformanceCache::new(config);
        for i in 0..20 {
            cache.put_manifest("repo", &format!("tag{i}"), manifest("0123456789"));
        }
        assert!(cache.memory_usage() <= 200);
        assert!(cache.metrics().evictions > 0);
    }
}
