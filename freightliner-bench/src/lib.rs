//! A fixed-bucket latency histogram and a three-phase (warmup/measurement/cooldown)
//! benchmark harness that scores a run against fixed industry throughput/latency
//! targets. Neither module depends on how the workload under test is implemented; a
//! caller wires `Workload` over the copy engine, the cache, or the CAS as needed.

mod harness;
mod histogram;
mod targets;

pub use harness::{score_report, BenchError, BenchHarness, BenchmarkReport, CpuSampler, NullCpuSampler, ScenarioConfig, Workload};
pub use histogram::LatencyHistogram;
pub use targets::{IndustryTarget, DOCKER_HUB, ECR, ERROR_RATE_TARGET_PCT, GCR, UPTIME_TARGET_PCT};
