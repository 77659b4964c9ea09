use std::time::Instant;

use crate::error::CopyError;
use crate::options::CopyResult;

/// Where a `copyImage` run currently is. Mirrors the state machine in the engine but is
/// reported to external listeners as a flat enum rather than the richer internal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Initializing,
    FetchingSource,
    CopyingLayers,
    PushingManifest,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct CopyProgress {
    pub stage: Stage,
    pub bytes_transferred: u64,
    pub bytes_total: u64,
    pub layers_total: usize,
    pub layers_completed: usize,
    pub started_at: Instant,
    pub updated_at: Instant,
}

/// Optional sink for per-run progress. Injected through `CopyOptions`; the engine never
/// branches on whether one is configured beyond a `Some`/`None` check.
pub trait ProgressReporter: Send + Sync {
    fn report_progress(&self, progress: CopyProgress);
    fn report_error(&self, err: &CopyError);
    fn report_completion(&self, result: &CopyResult);
}

/// Optional metrics sink for replication-level counters, distinct from the cache's and
/// CAS's own internal metrics: this is the copy engine's view of "did a replication
/// happen, how long did it take, how much moved."
pub trait MetricsSink: Send + Sync {
    fn replication_started(&self, source: &str, dest: &str);
    fn replication_completed(&self, duration: std::time::Duration, layer_count: usize, byte_count: u64);
    fn replication_failed(&self);
}

/// A `ProgressReporter`/`MetricsSink` that discards everything, used when a caller
/// configures neither.
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn report_progress(&self, _progress: CopyProgress) {}
    fn report_error(&self, _err: &CopyError) {}
    fn report_completion(&self, _result: &CopyResult) {}
}

impl MetricsSink for NullReporter {
    fn replication_started(&self, _source: &str, _dest: &str) {}
    fn replication_completed(&self, _duration: std::time::Duration, _layer_count: usize, _byte_count: u64) {}
    fn replication_failed(&self) {}
}
