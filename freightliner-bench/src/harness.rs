use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::info;
use serde::Serialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::histogram::LatencyHistogram;
use crate::targets::IndustryTarget;

#[derive(Debug)]
pub struct BenchError(pub String);

impl fmt::Display for BenchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BenchError {}

/// One unit of benchmarked work, e.g. pulling and pushing a single layer. Returns the
/// number of bytes moved so the harness can derive throughput.
#[async_trait]
pub trait Workload: Send + Sync {
    async fn run_once(&self, ctx: &CancellationToken) -> Result<u64, BenchError>;
}

/// Samples a resource metric (CPU percent) during the measurement phase. Injected so the
/// harness doesn't hardcode a platform-specific sampling mechanism; absence is modeled as
/// `NullCpuSampler`, matching how the copy engine models an absent encryption adapter.
pub trait CpuSampler: Send + Sync {
    fn sample_cpu_pct(&self) -> f64;
}

pub struct NullCpuSampler;

impl CpuSampler for NullCpuSampler {
    fn sample_cpu_pct(&self) -> f64 {
        0.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScenarioConfig {
    pub concurrency: usize,
    pub asset_count: usize,
    pub cooldown: Duration,
}

impl ScenarioConfig {
    pub fn new(concurrency: usize, asset_count: usize, cooldown: Duration) -> Self {
        Self { concurrency, asset_count, cooldown }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub throughput_mbps: f64,
    pub error_rate_pct: f64,
    pub peak_cpu_pct: f64,
    pub throughput_score: f64,
    pub latency_score: f64,
    pub reliability_score: f64,
    pub resource_score: f64,
    pub score: f64,
    pub meets_throughput_target: bool,
    pub meets_latency_target: bool,
}

/// Runs a workload through warmup, measurement, and cooldown phases and scores the
/// measurement phase against a fixed industry target. One harness instance is meant for
/// one scenario run; its counters are not reused across scenarios.
pub struct BenchHarness {
    histogram: LatencyHistogram,
    bytes: AtomicU64,
    errors: AtomicU64,
    operations: AtomicU64,
    cpu_sampler: Box<dyn CpuSampler>,
}

impl Default for BenchHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl BenchHarness {
    pub fn new() -> Self {
        Self::with_cpu_sampler(Box::new(NullCpuSampler))
    }

    pub fn with_cpu_sampler(cpu_sampler: Box<dyn CpuSampler>) -> Self {
        Self {
            histogram: LatencyHistogram::new(),
            bytes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            operations: AtomicU64::new(0),
            cpu_sampler,
        }
    }

    fn reset_counters(&self) {
        self.histogram.reset();
        self.bytes.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.operations.store(0, Ordering::Relaxed);
    }

    async fn execute_phase(&self, ctx: &CancellationToken, workload: &dyn Workload, concurrency: usize, asset_count: usize) {
        stream::iter(0..asset_count)
            .map(|_| async move {
                if ctx.is_cancelled() {
                    return;
                }
                let started = Instant::now();
                match workload.run_once(ctx).await {
                    Ok(byte_count) => {
                        self.histogram.record(started.elapsed());
                        self.bytes.fetch_add(byte_count, Ordering::Relaxed);
                    }
                    Err(_) => {
                        self.histogram.record(started.elapsed());
                        self.errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
                self.operations.fetch_add(1, Ordering::Relaxed);
            })
            .buffer_unordered(concurrency.max(1))
            .collect::<Vec<()>>()
            .await;
    }

    /// Runs warmup (half concurrency, half asset count), then resets metrics and runs the
    /// full measurement phase, then sleeps for `config.cooldown` before finalizing.
    pub async fn run(&self, ctx: &CancellationToken, workload: &dyn Workload, config: ScenarioConfig, target: IndustryTarget) -> BenchmarkReport {
        let warmup_concurrency = (config.concurrency / 2).max(1);
        let warmup_assets = (config.asset_count / 2).max(1);
        self.execute_phase(ctx, workload, warmup_concurrency, warmup_assets).await;

        self.reset_counters();
        let measured_start = Instant::now();
        self.execute_phase(ctx, workload, config.concurrency, config.asset_count).await;
        let measured_elapsed = measured_start.elapsed();

        sleep(config.cooldown).await;

        let report = self.finalize(measured_elapsed, target);
        info!(
            "benchmark against {}: {:.1} MB/s (target {:.1}), p95 {} ms, score {:.1}",
            target.name, report.throughput_mbps, target.throughput_mbps, report.p95_ms, report.score
        );
        report
    }

    fn finalize(&self, measured_elapsed: Duration, target: IndustryTarget) -> BenchmarkReport {
        let total_bytes = self.bytes.load(Ordering::Relaxed);
        let total_errors = self.errors.load(Ordering::Relaxed);
        let total_ops = self.operations.load(Ordering::Relaxed);

        let seconds = measured_elapsed.as_secs_f64().max(f64::EPSILON);
        let throughput_mbps = (total_bytes as f64 / (1024.0 * 1024.0)) / seconds;
        let error_rate_pct = if total_ops == 0 { 0.0 } else { (total_errors as f64 / total_ops as f64) * 100.0 };
        let peak_cpu_pct = self.cpu_sampler.sample_cpu_pct();

        let p50_ms = self.histogram.percentile(50.0);
        let p95_ms = self.histogram.percentile(95.0);
        let p99_ms = self.histogram.percentile(99.0);

        score_report(throughput_mbps, p95_ms as f64, error_rate_pct, peak_cpu_pct, target, p50_ms, p95_ms, p99_ms)
    }
}

/// The scoring formula, exposed standalone so a caller who already has summary numbers
/// (e.g. replayed from a `BenchmarkReport`) can re-score against a different target
/// without re-running the scenario.
#[allow(clippy::too_many_arguments)]
pub fn score_report(
    actual_mbps: f64,
    actual_latency_ms: f64,
    error_rate_pct: f64,
    peak_cpu_pct: f64,
    target: IndustryTarget,
    p50_ms: u64,
    p95_ms: u64,
    p99_ms: u64,
) -> BenchmarkReport {
    let throughput_score = (actual_mbps / target.throughput_mbps * 100.0).min(100.0).max(0.0);
    let latency_score = (100.0 - (actual_latency_ms / target.latency_ms) * 100.0).max(0.0);
    let reliability_score = (100.0 - (error_rate_pct / crate::targets::ERROR_RATE_TARGET_PCT) * 100.0).max(0.0);
    let resource_score = (100.0 - peak_cpu_pct).max(0.0);

    let score = 0.4 * throughput_score + 0.3 * latency_score + 0.2 * reliability_score + 0.1 * resource_score;

    BenchmarkReport {
        p50_ms,
        p95_ms,
        p99_ms,
        throughput_mbps: actual_mbps,
        error_rate_pct,
        peak_cpu_pct,
        throughput_score,
        latency_score,
        reliability_score,
        resource_score,
        score,
        meets_throughput_target: actual_mbps >= target.throughput_mbps,
        meets_latency_target: actual_latency_ms <= target.latency_ms,
    }
}
