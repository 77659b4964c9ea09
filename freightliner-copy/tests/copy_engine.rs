//! Cross-module state-machine coverage: a `CopyEngine` driven by a fake
//! `RegistryClient`, staging transferred layers through a real `Cas` over a
//! `NullBackend`, with a `ProgressReporter` recording the `Stage` sequence.
//! Exercises the INIT -> FETCH_SRC -> CHECK_DEST -> COPY_LAYERS ->
//! PUSH_MANIFEST -> DONE path end to end, which no single crate's own
//! `#[cfg(test)]` module can do on its own.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use freightliner_cas::{Cas, NullBackend};
use freightliner_copy::{CopyEngine, CopyOptions, CopyResult, MetricsSink, ProgressReporter, Stage};
use freightliner_registry::{Descriptor, ManifestDescriptor, Reference, RegistryClient};

fn key(repo: &str, reference: &str) -> String {
    format!("{repo}@{reference}")
}

fn repo_host(reference: &Reference) -> String {
    format!("{}/{}", reference.registry, reference.repository)
}

#[derive(Default)]
struct FakeRegistry {
    manifests: Mutex<HashMap<String, ManifestDescriptor>>,
    dest_manifests: Mutex<HashMap<String, Bytes>>,
    dest_blobs: Mutex<HashMap<String, Bytes>>,
}

#[async_trait]
impl RegistryClient for FakeRegistry {
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
        Ok(Bytes::from(format!("layer-bytes-{digest}")))
    }

    async fn push_blob(&self, _ctx: &CancellationToken, repo: &str, digest: &str, data: Bytes) -> freightliner_registry::Result<String> {
        self.dest_blobs.lock().insert(key(repo, digest), data);
        Ok(digest.to_string())
    }

    async fn push_manifest(&self, _ctx: &CancellationToken, repo: &str, reference: &str, data: Bytes, _media_type: &str) -> freightliner_registry::Result<String> {
        self.dest_manifests.lock().insert(key(repo, reference), data);
        Ok("sha256:pushed".to_string())
    }
}

#[derive(Default)]
struct RecordingReporter {
    stages: Mutex<Vec<Stage>>,
    max_layers_completed: Mutex<usize>,
}

impl ProgressReporter for RecordingReporter {
    fn report_progress(&self, progress: freightliner_copy::CopyProgress) {
        self.stages.lock().push(progress.stage);
        let mut max = self.max_layers_completed.lock();
        if progress.layers_completed > *max {
            *max = progress.layers_completed;
        }
        assert!(progress.updated_at >= progress.started_at);
    }

    fn report_error(&self, _err: &freightliner_copy::CopyError) {}
    fn report_completion(&self, _result: &CopyResult) {}
}

impl MetricsSink for RecordingReporter {
    fn replication_started(&self, _source: &str, _dest: &str) {}
    fn replication_completed(&self, _duration: std::time::Duration, _layer_count: usize, _byte_count: u64) {}
    fn replication_failed(&self) {}
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

#[tokio::test]
async fn full_copy_stages_through_the_state_machine_and_stages_layers_in_cas() {
    let registry = Arc::new(FakeRegistry::default());
    registry.manifests.lock().insert(key(&repo_host(&source()), "latest"), two_layer_manifest());

    let cas = Cas::new(Arc::new(NullBackend));
    let reporter = Arc::new(RecordingReporter::default());

    let engine = CopyEngine::new(registry.clone()).with_cas(cas.clone());
    let mut options = CopyOptions::new(source(), dest());
    options.progress = Some(reporter.clone());
    options.metrics = Some(reporter.clone());

    let ctx = CancellationToken::new();
    let result = engine.copy_image(&ctx, options).await;

    assert!(result.success);
    assert_eq!(result.stats.layer_count, 2);
    assert!(registry.dest_blobs.lock().len() == 2);
    assert!(registry.dest_manifests.lock().len() == 1);

    let stages = reporter.stages.lock().clone();
    assert_eq!(stages.first(), Some(&Stage::Initializing));
    assert_eq!(stages.last(), Some(&Stage::Completed));
    assert!(stages.contains(&Stage::CopyingLayers));
    assert!(stages.contains(&Stage::PushingManifest));
    assert_eq!(*reporter.max_layers_completed.lock(), 2);
}
