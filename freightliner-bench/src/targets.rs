/// A registry's published throughput/latency envelope, used as the denominator in the
/// harness's scoring formulas.
#[derive(Debug, Clone, Copy)]
pub struct IndustryTarget {
    pub name: &'static str,
    pub throughput_mbps: f64,
    pub latency_ms: f64,
}

pub const DOCKER_HUB: IndustryTarget = IndustryTarget { name: "Docker Hub", throughput_mbps: 150.0, latency_ms: 50.0 };
pub const ECR: IndustryTarget = IndustryTarget { name: "ECR", throughput_mbps: 125.0, latency_ms: 75.0 };
pub const GCR: IndustryTarget = IndustryTarget { name: "GCR", throughput_mbps: 115.0, latency_ms: 85.0 };

pub const UPTIME_TARGET_PCT: f64 = 99.9;
pub const ERROR_RATE_TARGET_PCT: f64 = 0.1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_carry_published_numbers() {
        assert_eq!(DOCKER_HUB.throughput_mbps, 150.0);
        assert_eq!(ECR.latency_ms, 75.0);
        assert_eq!(GCR.name, "GCR");
    }
}
