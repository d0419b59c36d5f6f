//! Composite health scoring.
//!
//! Scores live in `[0, 1]` and are recomputed from fresh metric snapshots at
//! every selection; nothing here is cached.

use std::collections::VecDeque;

use switchyard_store::HealthStatus;

/// Rolling latency samples with on-demand percentiles.
pub struct LatencyTracker {
    samples: VecDeque<u64>,
    cap: usize,
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::with_capacity(100)
    }
}

impl LatencyTracker {
    #[must_use]
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn record(&mut self, latency_ms: u64) {
        if self.samples.len() == self.cap {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Nearest-rank percentile, `p` in `[0, 100]`. Zero when empty.
    #[must_use]
    pub fn percentile(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let rank = ((p / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
        sorted[rank.min(sorted.len() - 1)] as f64
    }

    #[must_use]
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| *s as f64).sum::<f64>() / self.samples.len() as f64
    }
}

/// `max(0, 1 − value/cap)`: full credit at zero latency, none at the cap.
#[must_use]
pub fn latency_component(value_ms: f64, cap_ms: f64) -> f64 {
    (1.0 - value_ms / cap_ms).max(0.0)
}

/// Inputs for the provider-level composite score.
#[derive(Debug, Clone, Copy)]
pub struct ProviderScoreInputs {
    pub success_rate: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub avg_ms: f64,
    pub health: HealthStatus,
    pub uptime_score: f64,
    pub requests_per_second: f64,
    pub utilization: f64,
}

/// Provider composite:
/// `0.25·success + 0.25·latency + 0.15·health + 0.05·uptime + 0.1·throughput
///  + 0.05·capacity + 0.05·consistency`.
#[must_use]
pub fn provider_score(inputs: &ProviderScoreInputs) -> f64 {
    let latency_score = 0.4 * latency_component(inputs.p50_ms, 3000.0)
        + 0.4 * latency_component(inputs.p95_ms, 8000.0)
        + 0.2 * latency_component(inputs.avg_ms, 5000.0);
    let consistency_score = (1.0 - (inputs.p95_ms - inputs.p50_ms).abs() / 1000.0).max(0.0);
    let throughput_score = (inputs.requests_per_second / 100.0).min(1.0);
    let capacity_score = (1.0 - inputs.utilization).max(0.0);

    0.25 * inputs.success_rate
        + 0.25 * latency_score
        + 0.15 * inputs.health.score()
        + 0.05 * inputs.uptime_score
        + 0.1 * throughput_score
        + 0.05 * capacity_score
        + 0.05 * consistency_score
}

/// Inputs for the sub-provider composite score.
#[derive(Debug, Clone, Copy)]
pub struct SubProviderScoreInputs {
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    /// The maintained `health_score` field, not a derived value.
    pub health_score: f64,
    /// 1.0 when the breaker admits traffic, else 0.0.
    pub availability: f64,
    /// Worst-of RPM/TPM/concurrency utilization, estimate included.
    pub utilization: f64,
}

/// Sub-provider composite:
/// `0.25·success + 0.25·latency(avg, 5000) + 0.15·health + 0.15·availability
///  + 0.2·capacity`.
#[must_use]
pub fn sub_provider_score(inputs: &SubProviderScoreInputs) -> f64 {
    let capacity_score = (1.0 - inputs.utilization).max(0.0);
    0.25 * inputs.success_rate
        + 0.25 * latency_component(inputs.avg_latency_ms, 5000.0)
        + 0.15 * inputs.health_score
        + 0.15 * inputs.availability
        + 0.2 * capacity_score
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_percentiles() {
        let mut tracker = LatencyTracker::default();
        for ms in [100, 200, 300, 400, 500, 600, 700, 800, 900, 1000] {
            tracker.record(ms);
        }
        // Nearest rank: 0.5 * 9 = 4.5 rounds to index 5.
        assert!((tracker.percentile(50.0) - 600.0).abs() < 1e-9);
        assert!(tracker.percentile(95.0) >= 900.0);
        assert!((tracker.average() - 550.0).abs() < 1e-9);
    }

    #[test]
    fn tracker_caps_samples() {
        let mut tracker = LatencyTracker::with_capacity(3);
        for ms in [1, 2, 3, 4] {
            tracker.record(ms);
        }
        // Oldest sample evicted.
        assert!((tracker.average() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_tracker_scores_zero() {
        let tracker = LatencyTracker::default();
        assert!((tracker.percentile(95.0)).abs() < f64::EPSILON);
        assert!((tracker.average()).abs() < f64::EPSILON);
    }

    #[test]
    fn latency_component_clamps() {
        assert!((latency_component(0.0, 3000.0) - 1.0).abs() < f64::EPSILON);
        assert!((latency_component(3000.0, 3000.0)).abs() < f64::EPSILON);
        assert!((latency_component(9000.0, 3000.0)).abs() < f64::EPSILON);
        assert!((latency_component(1500.0, 3000.0) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn perfect_provider_scores_near_top() {
        let score = provider_score(&ProviderScoreInputs {
            success_rate: 1.0,
            p50_ms: 0.0,
            p95_ms: 0.0,
            avg_ms: 0.0,
            health: HealthStatus::Healthy,
            uptime_score: 1.0,
            requests_per_second: 100.0,
            utilization: 0.0,
        });
        // Weights sum to 0.9; a perfect provider lands exactly there.
        assert!((score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn unhealthy_provider_loses_health_weight() {
        let base = ProviderScoreInputs {
            success_rate: 1.0,
            p50_ms: 0.0,
            p95_ms: 0.0,
            avg_ms: 0.0,
            health: HealthStatus::Healthy,
            uptime_score: 1.0,
            requests_per_second: 0.0,
            utilization: 0.0,
        };
        let healthy = provider_score(&base);
        let unhealthy = provider_score(&ProviderScoreInputs {
            health: HealthStatus::Unhealthy,
            ..base
        });
        assert!((healthy - unhealthy - 0.15).abs() < 1e-9);
    }

    #[test]
    fn consistency_penalizes_spread() {
        let tight = provider_score(&ProviderScoreInputs {
            success_rate: 0.0,
            p50_ms: 100.0,
            p95_ms: 100.0,
            avg_ms: 100.0,
            health: HealthStatus::Unhealthy,
            uptime_score: 0.0,
            requests_per_second: 0.0,
            utilization: 1.0,
        });
        let wide = provider_score(&ProviderScoreInputs {
            success_rate: 0.0,
            p50_ms: 100.0,
            p95_ms: 1100.0,
            avg_ms: 100.0,
            health: HealthStatus::Unhealthy,
            uptime_score: 0.0,
            requests_per_second: 0.0,
            utilization: 1.0,
        });
        assert!(tight > wide);
    }

    #[test]
    fn sub_score_full_marks() {
        let score = sub_provider_score(&SubProviderScoreInputs {
            success_rate: 1.0,
            avg_latency_ms: 0.0,
            health_score: 1.0,
            availability: 1.0,
            utilization: 0.0,
        });
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sub_score_capacity_weight() {
        let free = sub_provider_score(&SubProviderScoreInputs {
            success_rate: 1.0,
            avg_latency_ms: 0.0,
            health_score: 1.0,
            availability: 1.0,
            utilization: 0.0,
        });
        let saturated = sub_provider_score(&SubProviderScoreInputs {
            success_rate: 1.0,
            avg_latency_ms: 0.0,
            health_score: 1.0,
            availability: 1.0,
            utilization: 1.0,
        });
        assert!((free - saturated - 0.2).abs() < 1e-9);
    }
}
