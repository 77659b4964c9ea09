use std::io::Read as _;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use freightliner_cas::Cas;
use freightliner_registry::{detect_manifest_kind, Descriptor, Reference, RegistryClient};
use log::{info, warn};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::CopyError;
use crate::options::{CopyOptions, CopyResult, CopyStats};
use crate::progress::{CopyProgress, Stage};
use crate::stream::{compress, should_compress, BufferManager, EncryptionAdapter, Identity, LayerReader};

fn repo_host(reference: &Reference) -> String {
    format!("{}/{}", reference.registry, reference.repository)
}

/// Per-image replication pipeline: manifest fetch, destination existence check,
/// per-layer existence check and transfer, manifest push. Stateless beyond its
/// optional components (encryption adapter, buffer manager) and safe for concurrent
/// use — nothing here mutates engine-owned state across calls.
pub struct CopyEngine {
    registry: Arc<dyn RegistryClient>,
    cas: Option<Cas>,
    encryption: Arc<dyn EncryptionAdapter>,
    buffers: Arc<BufferManager>,
}

impl CopyEngine {
    pub fn new(registry: Arc<dyn RegistryClient>) -> Self {
        Self {
            registry,
            cas: None,
            encryption: Arc::new(Identity),
            buffers: BufferManager::new(64 * 1024),
        }
    }

    pub fn with_cas(mut self, cas: Cas) -> Self {
        self.cas = Some(cas);
        self
    }

    pub fn with_encryption(mut self, encryption: Arc<dyn EncryptionAdapter>) -> Self {
        self.encryption = encryption;
        self
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        options: &CopyOptions,
        stage: Stage,
        stats: &CopyStats,
        started_at: Instant,
        bytes_total: u64,
        layers_total: usize,
        layers_completed: usize,
    ) {
        if let Some(reporter) = &options.progress {
            reporter.report_progress(CopyProgress {
                stage,
                bytes_transferred: stats.bytes_transferred,
                bytes_total,
                layers_total,
                layers_completed,
                started_at,
                updated_at: Instant::now(),
            });
        }
    }

    fn fail(&self, options: &CopyOptions, stats: CopyStats, err: CopyError) -> CopyResult {
        if let Some(reporter) = &options.progress {
            reporter.report_error(&err);
        }
        if let Some(metrics) = &options.metrics {
            metrics.replication_failed();
        }
        let result = CopyResult::failed(stats, err);
        if let Some(reporter) = &options.progress {
            reporter.report_completion(&result);
        }
        result
    }

    /// Runs the full state machine: `INIT -> FETCH_SRC -> CHECK_DEST -> COPY_LAYERS ->
    /// PUSH_MANIFEST -> DONE`, with `FETCH_SRC`/`CHECK_DEST` able to divert to `FAILED`.
    pub async fn copy_image(&self, ctx: &CancellationToken, options: CopyOptions) -> CopyResult {
        let start = Instant::now();
        let mut stats = CopyStats::default();

        if let Some(metrics) = &options.metrics {
            metrics.replication_started(&options.source.to_string(), &options.destination.to_string());
        }
        self.report(&options, Stage::Initializing, &stats, start, 0, 0, 0);

        // FETCH_SRC
        self.report(&options, Stage::FetchingSource, &stats, start, 0, 0, 0);
        let manifest = match self.registry.get_descriptor(ctx, &options.source).await {
            Ok(Some(m)) => m,
            Ok(None) => {
                return self.fail(&options, stats, CopyError::SourceDescriptor(freightliner_registry::Error::NotFound(options.source.to_string())));
            }
            Err(e) => return self.fail(&options, stats, CopyError::SourceDescriptor(e)),
        };
        stats.manifest_size = manifest.data.len() as u64;
        stats.layer_count = manifest.layers.len();
        let bytes_total: u64 = manifest.layers.iter().map(|l| l.size).sum();
        let layers_total = manifest.layers.len();

        // CHECK_DEST
        if !options.force_overwrite {
            match self.registry.get_descriptor(ctx, &options.destination).await {
                Ok(Some(_)) => return self.fail(&options, stats, CopyError::AlreadyExists),
                Ok(None) => {}
                Err(e) => return self.fail(&options, stats, CopyError::DestDescriptor(e)),
            }
        }

        // COPY_LAYERS
        if !options.dry_run {
            self.report(&options, Stage::CopyingLayers, &stats, start, bytes_total, layers_total, 0);
            if let Err(err) = self.copy_layers(ctx, &options, &manifest.layers, &mut stats, start, bytes_total).await {
                return self.fail(&options, stats, err);
            }
        }

        // PUSH_MANIFEST
        if !options.dry_run {
            self.report(&options, Stage::PushingManifest, &stats, start, bytes_total, layers_total, layers_total);
            let kind = detect_manifest_kind(&manifest.data);
            let body = match &options.manifest_processor {
                Some(p) => p.process_manifest(manifest.data.clone()),
                None => manifest.data.clone(),
            };
            if let Err(err) = self
                .push_manifest_with_retry(ctx, &options, body, kind.media_type())
                .await
            {
                return self.fail(&options, stats, err);
            }
        }

        // DONE
        stats.push_duration = start.elapsed();
        self.report(&options, Stage::Completed, &stats, start, bytes_total, layers_total, layers_total);
        if let Some(metrics) = &options.metrics {
            metrics.replication_completed(start.elapsed(), stats.layer_count, stats.bytes_transferred);
        }
        let result = CopyResult::ok(stats);
        if let Some(reporter) = &options.progress {
            reporter.report_completion(&result);
        }
        result
    }

    async fn copy_layers(
        &self,
        ctx: &CancellationToken,
        options: &CopyOptions,
        layers: &[Descriptor],
        stats: &mut CopyStats,
        started_at: Instant,
        bytes_total: u64,
    ) -> Result<(), CopyError> {
        let dest_repo = repo_host(&options.destination);
        let source_repo = repo_host(&options.source);
        let layers_total = layers.len();

        for (i, layer) in layers.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(CopyError::Cancelled { stage: "copy_layers" });
            }

            let exists = self
                .registry
                .head_blob(ctx, &dest_repo, &layer.digest)
                .await
                .map_err(|e| CopyError::LayerTransfer { digest: layer.digest.clone(), source: e })?;
            if exists.is_none() {
                self.transfer_layer(ctx, options, &source_repo, &dest_repo, layer, stats).await?;
            }

            self.report(options, Stage::CopyingLayers, stats, started_at, bytes_total, layers_total, i + 1);
        }
        Ok(())
    }

    async fn transfer_layer(
        &self,
        ctx: &CancellationToken,
        options: &CopyOptions,
        source_repo: &str,
        dest_repo: &str,
        layer: &Descriptor,
        stats: &mut CopyStats,
    ) -> Result<(), CopyError> {
        let pull_started = Instant::now();
        let mut attempt = 0;
        let data = loop {
            match self.registry.pull_blob(ctx, source_repo, &layer.digest).await {
                Ok(data) => break data,
                Err(e) if attempt < options.strategy.retry_attempts && e.kind() == freightliner_registry::ErrorKind::TransientNetwork => {
                    attempt += 1;
                    warn!("retrying pull of {} (attempt {attempt}): {e}", layer.digest);
                    sleep(std::time::Duration::from_millis(100 * attempt as u64)).await;
                    continue;
                }
                Err(e) => return Err(CopyError::LayerTransfer { digest: layer.digest.clone(), source: e }),
            }
        };
        stats.pull_duration += pull_started.elapsed();

        // Drain the pulled blob through a pooled slab rather than handing the raw
        // `Bytes` straight to the processing stages; the slab is returned to the
        // manager when the reader closes (or drops).
        let mut reader = LayerReader::new(self.buffers.clone(), data);
        let mut chunk = vec![0u8; options.strategy.chunk_size.max(1)];
        let mut pulled = Vec::with_capacity(layer.size as usize);
        loop {
            let n = reader.read(&mut chunk).map_err(|e| CopyError::LayerTransfer {
                digest: layer.digest.clone(),
                source: freightliner_registry::Error::Internal(format!("layer read failed: {e}")),
            })?;
            if n == 0 {
                break;
            }
            pulled.extend_from_slice(&chunk[..n]);
        }
        reader.close();
        let data = Bytes::from(pulled);

        let processed = match &options.layer_processor {
            Some(p) => p.process_layer(&layer.digest, data),
            None => data,
        };

        let source_url = options.source.blob_url(&layer.digest);
        let dest_url = options.destination.blob_url(&layer.digest);
        let optimized = options
            .transfer_optimizer
            .as_ref()
            .map(|o| o.should_optimize(&source_url, &dest_url))
            .unwrap_or(false);

        let outgoing = if optimized {
            info!("optimized transfer path taken for {} -> {}", source_url, dest_url);
            processed.clone()
        } else if options.strategy.compression_enabled && should_compress(processed.len() as u64) {
            let compressed = compress(&processed).map_err(|e| CopyError::LayerTransfer {
                digest: layer.digest.clone(),
                source: freightliner_registry::Error::Internal(format!("compression failed: {e}")),
            })?;
            stats.compressed_bytes += compressed.len() as u64;
            compressed
        } else {
            processed.clone()
        };
        let outgoing = if optimized { outgoing } else { self.encryption.wrap(outgoing) };

        self.push_layer_with_retry(ctx, options, dest_repo, &layer.digest, outgoing).await?;
        stats.bytes_transferred += processed.len() as u64;

        if let Some(cas) = &self.cas {
            if let Err(e) = cas.store(ctx, processed).await {
                warn!("failed to stage layer {} in local store: {e}", layer.digest);
            }
        }
        Ok(())
    }

    async fn push_layer_with_retry(&self, ctx: &CancellationToken, options: &CopyOptions, dest_repo: &str, digest: &str, data: Bytes) -> Result<(), CopyError> {
        let mut attempt = 0;
        loop {
            match self.registry.push_blob(ctx, dest_repo, digest, data.clone()).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt < options.strategy.retry_attempts && e.kind() == freightliner_registry::ErrorKind::TransientNetwork => {
                    attempt += 1;
                    warn!("retrying push of {digest} (attempt {attempt}): {e}");
                    sleep(std::time::Duration::from_millis(100 * attempt as u64)).await;
                    continue;
                }
                Err(e) => return Err(CopyError::LayerTransfer { digest: digest.to_string(), source: e }),
            }
        }
    }

    /// Manifest push is not retried on 4xx; only on 5xx and transient network errors.
    async fn push_manifest_with_retry(&self, ctx: &CancellationToken, options: &CopyOptions, data: Bytes, media_type: &str) -> Result<(), CopyError> {
        let dest_repo = repo_host(&options.destination);
        let reference = options.destination.manifest_path_segment();
        let mut attempt = 0;
        loop {
            match self.registry.push_manifest(ctx, &dest_repo, reference, data.clone(), media_type).await {
                Ok(digest) => {
                    info!("pushed manifest {digest} to {dest_repo}:{reference}");
                    return Ok(());
                }
                Err(e) if attempt < options.retry_budget && e.kind() == freightliner_registry::ErrorKind::TransientNetwork => {
                    attempt += 1;
                    warn!("retrying manifest push (attempt {attempt}): {e}");
                    sleep(std::time::Duration::from_millis(100 * attempt as u64)).await;
                    continue;
                }
                Err(e) => return Err(CopyError::PushManifest(e)),
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use freightliner_registry::ManifestDescriptor;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MockRegistry {
        manifests: Mutex<HashMap<String, ManifestDescriptor>>,
        dest_manifests: Mutex<HashMap<String, Bytes>>,
        dest_blobs: Mutex<HashMap<String, Bytes>>,
        push_manifest_calls: Mutex<u32>,
        push_blob_calls: Mutex<u32>,
    }

    fn key(repo: &str, reference: &str) -> String {
        format!("{repo}@{reference}")
    }

    #[async_trait]
    impl RegistryClient for MockRegistry {
        async fn get_descriptor(&self, _ctx: &CancellationToken, reference: &Reference) -> freightliner_registry::Result<Option<ManifestDescriptor>> {
            let repo = repo_host(reference);
            if let Some(data) = self.dest_manifests.lock().get(&key(&repo, reference.manifest_path_segment())) {
                return Ok(Some(ManifestDescriptor {
                    descriptor: Descriptor { digest: "sha256:dest".to_string(), media_type: "application/vnd.oci.image.manifest.v1+json".to_string(), size: data.len() as u64 },
                    data: data.clone(),
                    config_digest: None,
                    layers: vec![],
                }));
            }
            Ok(self.manifests.lock().get(&key(&repo, reference.manifest_path_segment())).cloned())
        }

        async fn head_blob(&self, _ctx: &CancellationToken, repo: &str, digest: &str) -> freightliner_registry::Result<Option<Descriptor>> {
            Ok(self.dest_blobs.lock().get(&key(repo, digest)).map(|d| Descriptor { digest: digest.to_string(), media_type: String::new(), size: d.len() as u64 }))
        }

        async fn pull_blob(&self, _ctx: &CancellationToken, _repo: &str, digest: &str) -> freightliner_registry::Result<Bytes> {
            Ok(Bytes::from(format!("layer-data-for-{digest}")))
        }

        async fn push_blob(&self, _ctx: &CancellationToken, repo: &str, digest: &str, data: Bytes) -> freightliner_registry::Result<String> {
            *self.push_blob_calls.lock() += 1;
            self.dest_blobs.lock().insert(key(repo, digest), data);
            Ok(digest.to_string())
        }

        async fn push_manifest(&self, _ctx: &CancellationToken, repo: &str, reference: &str, data: Bytes, _media_type: &str) -> freightliner_registry::Result<String> {
            *self.push_manifest_calls.lock() += 1;
            self.dest_manifests.lock().insert(key(repo, reference), data);
            Ok("sha256:pushed".to_string())
        }
    }

    fn two_layer_manifest() -> ManifestDescriptor {
        let body = br#"{"schemaVersion":2,"mediaType":"application/vnd.docker.distribution.manifest.v2+json","config":{"digest":"sha256:cfg","mediaType":"x","size":1},"layers":[]}"#;
        ManifestDescriptor {
            descriptor: Descriptor { digest: "sha256:manifest".to_string(), media_type: "application/vnd.docker.distribution.manifest.v2+json".to_string(), size: body.len() as u64 },
            data: Bytes::from_static(body),
            config_digest: Some("sha256:cfg".to_string()),
            layers: vec![
                Descriptor { digest: "sha256:layer1".to_string(), media_type: "application/vnd.docker.image.rootfs.diff.tar.gzip".to_string(), size: 1024 },
                Descriptor { digest: "sha256:layer2".to_string(), media_type: "application/vnd.docker.image.rootfs.diff.tar.gzip".to_string(), size: 2048 },
            ],
        }
    }

    fn source() -> Reference {
        Reference::new("registry.example.com", "library/alpine", "latest")
    }

    fn dest() -> Reference {
        Reference::new("dest.example.com", "library/alpine", "latest")
    }

    fn seeded_registry() -> MockRegistry {
        let registry = MockRegistry::default();
        registry.manifests.lock().insert(key(&repo_host(&source()), "latest"), two_layer_manifest());
        registry
    }

    #[tokio::test]
    async fn dry_run_never_transfers_or_pushes() {
        let registry = Arc::new(seeded_registry());
        let engine = CopyEngine::new(registry.clone());
        let mut options = CopyOptions::new(source(), dest());
        options.dry_run = true;
        let ctx = CancellationToken::new();
        let result = engine.copy_image(&ctx, options).await;
        assert!(result.success);
        assert_eq!(result.stats.layer_count, 2);
        assert_eq!(result.stats.bytes_transferred, 0);
        assert_eq!(*registry.push_blob_calls.lock(), 0);
        assert_eq!(*registry.push_manifest_calls.lock(), 0);
    }

    #[tokio::test]
    async fn already_exists_without_force_aborts() {
        let registry = seeded_registry();
        registry.dest_manifests.lock().insert(key(&repo_host(&dest()), "latest"), Bytes::from_static(b"{}"));
        let registry = Arc::new(registry);
        let engine = CopyEngine::new(registry.clone());
        let options = CopyOptions::new(source(), dest());
        let ctx = CancellationToken::new();
        let result = engine.copy_image(&ctx, options).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind(), crate::error::ErrorKind::AlreadyExists);
        assert_eq!(*registry.push_blob_calls.lock(), 0);
    }

    #[tokio::test]
    async fn layer_count_matches_source_manifest() {
        let registry = Arc::new(seeded_registry());
        let engine = CopyEngine::new(registry);
        let options = CopyOptions::new(source(), dest());
        let ctx = CancellationToken::new();
        let result = engine.copy_image(&ctx, options).await;
        assert!(result.success);
        assert_eq!(result.stats.layer_count, 2);
    }

    #[tokio::test]
    async fn bytes_transferred_sums_actually_transferred_layers() {
        let registry = Arc::new(seeded_registry());
        let engine = CopyEngine::new(registry.clone());
        let options = CopyOptions::new(source(), dest());
        let ctx = CancellationToken::new();
        let result = engine.copy_image(&ctx, options).await;
        assert!(result.success);
        let expected: u64 = "layer-data-for-sha256:layer1".len() as u64 + "layer-data-for-sha256:layer2".len() as u64;
        assert_eq!(result.stats.bytes_transferred, expected);
        assert_eq!(*registry.push_blob_calls.lock(), 2);
        assert_eq!(*registry.push_manifest_calls.lock(), 1);
    }

    #[tokio::test]
    async fn existing_dest_blob_is_skipped_without_counting_bytes() {
        let registry = seeded_registry();
        registry
            .dest_blobs
            .lock()
            .insert(key(&repo_host(&dest()), "sha256:layer1"), Bytes::from_static(b"already-there"));
        let registry = Arc::new(registry);
        let engine = CopyEngine::new(registry.clone());
        let options = CopyOptions::new(source(), dest());
        let ctx = CancellationToken::new();
        let result = engine.copy_image(&ctx, options).await;
        assert!(result.success);
        assert_eq!(*registry.push_blob_calls.lock(), 1);
        let expected = "layer-data-for-sha256:layer2".len() as u64;
        assert_eq!(result.stats.bytes_transferred, expected);
    }

    #[tokio::test]
    async fn cancellation_during_copy_layers_yields_cancelled() {
        let registry = Arc::new(seeded_registry());
        let engine = CopyEngine::new(registry);
        let options = CopyOptions::new(source(), dest());
        let ctx = CancellationToken::new();
        ctx.cancel();
        let result = engine.copy_image(&ctx, options).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind(), crate::error::ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn source_not_found_reports_not_found() {
        let registry = Arc::new(MockRegistry::default());
        let engine = CopyEngine::new(registry);
        let options = CopyOptions::new(source(), dest());
        let ctx = CancellationToken::new();
        let result = engine.copy_image(&ctx, options).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind(), crate::error::ErrorKind::NotFound);
    }
}
