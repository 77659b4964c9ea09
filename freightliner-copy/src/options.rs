use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::CopyError;
use crate::progress::{MetricsSink, ProgressReporter};
use freightliner_registry::Reference;

/// Planning input for how layers move: parallelism, whether to compress, the chunk
/// size streamed through the buffer manager, and the retry budget for a single layer.
#[derive(Debug, Clone, Copy)]
pub struct TransferStrategy {
    pub parallelism: usize,
    pub compression_enabled: bool,
    pub chunk_size: usize,
    pub retry_attempts: u32,
}

impl Default for TransferStrategy {
    fn default() -> Self {
        Self {
            parallelism: 1,
            compression_enabled: true,
            chunk_size: 32 * 1024,
            retry_attempts: 3,
        }
    }
}

/// Lets a caller rewrite a layer's bytes in flight (e.g. an external dedup filter)
/// before it reaches the compression/encryption stream stages.
pub trait LayerProcessor: Send + Sync {
    fn process_layer(&self, digest: &str, data: Bytes) -> Bytes;
}

/// Lets a caller rewrite the manifest bytes before they're pushed, e.g. to rewrite
/// embedded image references for the destination registry.
pub trait ManifestProcessor: Send + Sync {
    fn process_manifest(&self, data: Bytes) -> Bytes;
}

/// Lets a caller override how a layer is planned for transfer, e.g. routing same-cloud
/// copies through a bucket-to-bucket API instead of pull-then-push.
pub trait TransferOptimizer: Send + Sync {
    fn should_optimize(&self, source_url: &str, dest_url: &str) -> bool;
}

#[derive(Clone)]
pub struct CopyOptions {
    pub source: Reference,
    pub destination: Reference,
    pub dry_run: bool,
    pub force_overwrite: bool,
    pub retry_budget: u32,
    pub strategy: TransferStrategy,
    pub progress: Option<Arc<dyn ProgressReporter>>,
    pub metrics: Option<Arc<dyn MetricsSink>>,
    pub layer_processor: Option<Arc<dyn LayerProcessor>>,
    pub manifest_processor: Option<Arc<dyn ManifestProcessor>>,
    pub transfer_optimizer: Option<Arc<dyn TransferOptimizer>>,
}

impl CopyOptions {
    pub fn new(source: Reference, destination: Reference) -> Self {
        Self {
            source,
            destination,
            dry_run: false,
            force_overwrite: false,
            retry_budget: 3,
            strategy: TransferStrategy::default(),
            progress: None,
            metrics: None,
            layer_processor: None,
            manifest_processor: None,
            transfer_optimizer: None,
        }
    }
}

/// Best-effort measurements accumulated over one `copyImage` run. Populated even on
/// failure so a failed copy can still be analyzed.
#[derive(Debug, Clone, Default)]
pub struct CopyStats {
    pub bytes_transferred: u64,
    pub compressed_bytes: u64,
    pub pull_duration: Duration,
    pub push_duration: Duration,
    pub layer_count: usize,
    pub manifest_size: u64,
}

#[derive(Debug, Clone)]
pub struct CopyResult {
    pub success: bool,
    pub stats: CopyStats,
    pub error: Option<Arc<CopyError>>,
}

impl CopyResult {
    pub fn ok(stats: CopyStats) -> Self {
        Self { success: true, stats, error: None }
    }

    pub fn failed(stats: CopyStats, error: CopyError) -> Self {
        Self { success: false, stats, error: Some(Arc::new(error)) }
    }
}
