use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::StorageBackend;
use crate::blob::Blob;
use crate::error::{Error, Result};
use crate::index::BlobIndex;
use crate::metrics::{CasCounters, CasMetrics};

const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy)]
pub struct CasConfig {
    pub gc_interval: Duration,
}

impl Default for CasConfig {
    fn default() -> Self {
        Self { gc_interval: DEFAULT_GC_INTERVAL }
    }
}

fn digest_of(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

struct Tasks {
    gc: Option<JoinHandle<()>>,
}

struct Inner {
    index: RwLock<BlobIndex>,
    backend: Arc<dyn StorageBackend>,
    counters: CasCounters,
    config: CasConfig,
    running: AtomicBool,
    cancel: CancellationToken,
    tasks: Mutex<Tasks>,
}

/// Two-tier content-addressable blob store: a memory tier (always present) over a
/// pluggable durable backend. Deduplicates by digest and reference-counts readers.
///
/// Cheap to clone: state lives behind the inner `Arc`.
#[derive(Clone)]
pub struct Cas {
    inner: Arc<Inner>,
}

impl Cas {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_config(backend, CasConfig::default())
    }

    pub fn with_config(backend: Arc<dyn StorageBackend>, config: CasConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                index: RwLock::new(BlobIndex::new()),
                backend,
                counters: CasCounters::default(),
                config,
                running: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Tasks { gc: None }),
            }),
        }
    }

    /// Stores `data`, deduplicating against any blob already present under the same
    /// digest. Returns the digest regardless of whether this call created a new blob
    /// or bumped an existing one's reference count. `ctx` is raced against the backend
    /// write, the operation's one true suspension point.
    pub async fn store(&self, ctx: &CancellationToken, data: Bytes) -> Result<String> {
        let started = Instant::now();
        let digest = digest_of(&data);

        if let Some(blob) = self.inner.index.read().get(&digest) {
            blob.incr_ref();
            blob.touch();
            self.inner.counters.record_dedup(blob.size);
            self.inner.counters.record_put_latency(started.elapsed().as_micros() as u64);
            return Ok(digest);
        }

        let blob = Arc::new(Blob::new(digest.clone(), data.clone()));
        {
            let mut index = self.inner.index.write();
            if let Some(existing) = index.get(&digest) {
                existing.incr_ref();
                existing.touch();
                self.inner.counters.record_dedup(existing.size);
                self.inner.counters.record_put_latency(started.elapsed().as_micros() as u64);
                return Ok(digest);
            }
            index.insert(blob.clone());
        }

        let put = tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(Error::Cancelled),
            res = self.inner.backend.put(&digest, data) => res,
        };
        if let Err(e) = put {
            self.inner.index.write().remove(&digest);
            return Err(e);
        }

        self.inner.counters.record_store(blob.size);
        self.inner.counters.record_put_latency(started.elapsed().as_micros() as u64);
        Ok(digest)
    }

    /// Fetches the blob payload for `digest`. A memory hit bumps the reference count
    /// (the caller has taken a logical reference); a backend fallback re-verifies the
    /// digest and repopulates the memory tier. `ctx` is raced against the backend read.
    pub async fn get(&self, ctx: &CancellationToken, digest: &str) -> Result<Bytes> {
        let started = Instant::now();

        if let Some(blob) = self.inner.index.read().get(digest) {
            blob.touch();
            blob.incr_ref();
            self.inner.counters.record_cache_hit();
            self.inner.counters.record_retrieved();
            self.inner.counters.record_get_latency(started.elapsed().as_micros() as u64);
            return Ok(blob.data.clone());
        }
        self.inner.counters.record_cache_miss();

        let data = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(Error::Cancelled),
            res = self.inner.backend.get(digest) => res?,
        };
        let actual = digest_of(&data);
        if actual != digest {
            return Err(Error::Corruption {
                digest: digest.to_string(),
                expected: digest.to_string(),
                actual,
            });
        }

        let blob = Arc::new(Blob::new(digest.to_string(), data.clone()));
        self.inner.index.write().insert(blob);
        self.inner.counters.record_retrieved();
        self.inner.counters.record_get_latency(started.elapsed().as_micros() as u64);
        Ok(data)
    }

    /// Wraps `get` in a closable, in-memory reader. Close is idempotent.
    pub async fn get_reader(&self, ctx: &CancellationToken, digest: &str) -> Result<BlobReader> {
        let data = self.get(ctx, digest).await?;
        Ok(BlobReader::new(data))
    }

    pub fn exists(&self, digest: &str) -> bool {
        self.inner.index.read().contains(digest)
    }

    /// Decrements the blob's reference count. When it reaches zero or below, the blob
    /// is dropped from the memory tier immediately; the backend delete is best-effort
    /// and logged rather than surfaced on failure.
    pub async fn delete(&self, digest: &str) -> Result<()> {
        let should_remove = {
            let index = self.inner.index.read();
            match index.get(digest) {
                None => return Err(Error::NotFound { digest: digest.to_string() }),
                Some(blob) => blob.decr_ref() <= 0,
            }
        };
        if should_remove {
            let removed = self.inner.index.write().remove(digest);
            if removed.is_some() {
                self.inner.counters.record_deleted();
                if let Err(e) = self.inner.backend.delete(digest).await {
                    warn!("backend delete of {digest} failed: {e}");
                }
            }
        }
        Ok(())
    }

    pub fn metrics(&self) -> CasMetrics {
        self.inner.counters.snapshot()
    }

    /// Drops every blob whose reference count has fallen to zero or below. Takes the
    /// write lock for the whole sweep; O(n) in the number of blobs held.
    fn gc_sweep(&self) {
        let mut index = self.inner.index.write();
        let stale: Vec<String> = index
            .values()
            .filter(|b| b.ref_count() <= 0)
            .map(|b| b.digest.clone())
            .collect();
        for digest in &stale {
            index.remove(digest);
        }
        if !stale.is_empty() {
            debug!("cas gc dropped {} blob(s)", stale.len());
        }
    }

    /// Starts the background GC ticker. Idempotent.
    pub fn start(&self) {
        if self.inner.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return;
        }
        let cas = self.clone();
        let interval = self.inner.config.gc_interval;
        let cancel = self.inner.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        cas.gc_sweep();
                        let m = cas.metrics();
                        info!(
                            "cas gc sweep complete: stored={} retrieved={} deleted={} dedup_hits={}",
                            m.blobs_stored, m.blobs_retrieved, m.blobs_deleted, m.dedup_hits,
                        );
                    }
                }
            }
        });
        self.inner.tasks.lock().gc = Some(handle);
    }

    /// Stops the background GC ticker and waits for it to exit. Idempotent.
    pub async fn stop(&self) {
        if self.inner.running.compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return;
        }
        self.inner.cancel.cancel();
        let handle = self.inner.tasks.lock().gc.take();
        if let Some(h) = handle {
            if let Err(e) = h.await {
                warn!("cas gc task did not shut down cleanly: {e}");
            }
        }
    }
}

/// A closable in-memory view over a fetched blob's payload. Close releases the
/// underlying buffer; calling it twice is a no-op.
pub struct BlobReader {
    cursor: Option<Cursor<Bytes>>,
}

impl BlobReader {
    fn new(data: Bytes) -> Self {
        Self { cursor: Some(Cursor::new(data)) }
    }

    pub fn close(&mut self) {
        self.cursor = None;
    }
}

impl std::io::Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.cursor.as_mut() {
            Some(c) => std::io::Read::read(c, buf),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;

    fn cas() -> Cas {
        Cas::new(Arc::new(NullBackend))
    }

    #[tokio::test]
    async fn store_then_get_roundtrips() {
        let cas = cas();
        let ctx = CancellationToken::new();
        let digest = cas.store(&ctx, Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(digest, digest_of(b"hello"));
        assert_eq!(cas.get(&ctx, &digest).await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn duplicate_store_dedupes() {
        let cas = cas();
        let ctx = CancellationToken::new();
        let d1 = cas.store(&ctx, Bytes::from_static(b"same")).await.unwrap();
        let d2 = cas.store(&ctx, Bytes::from_static(b"same")).await.unwrap();
        assert_eq!(d1, d2);
        assert_eq!(cas.metrics().blobs_stored, 1);
        assert_eq!(cas.metrics().dedup_hits, 1);
        assert_eq!(cas.metrics().dedup_saved_bytes, 4);
    }

    #[tokio::test]
    async fn delete_reduces_ref_count_and_removes_at_zero() {
        let cas = cas();
        let ctx = CancellationToken::new();
        let digest = cas.store(&ctx, Bytes::from_static(b"x")).await.unwrap();
        assert!(cas.exists(&digest));
        cas.delete(&digest).await.unwrap();
        assert!(!cas.exists(&digest));
    }

    #[tokio::test]
    async fn get_on_unknown_digest_is_not_found() {
        let cas = cas();
        let ctx = CancellationToken::new();
        let err = cas.get(&ctx, "sha256:doesnotexist").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn store_fails_when_cancelled() {
        let cas = cas();
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = cas.store(&ctx, Bytes::from_static(b"x")).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cancelled);
        assert!(!cas.exists(&digest_of(b"x")));
    }

    #[tokio::test]
    async fn gc_sweep_drops_zero_ref_blobs() {
        let cas = cas();
        let ctx = CancellationToken::new();
        let digest = cas.store(&ctx, Bytes::from_static(b"x")).await.unwrap();
        cas.delete(&digest).await.unwrap();
        // delete() already removes at ref_count <= 0, but a blob whose count dipped
        // below zero through repeated deletes without going through the store path
        // should still be swept.
        cas.gc_sweep();
        assert!(!cas.exists(&digest));
    }
}
