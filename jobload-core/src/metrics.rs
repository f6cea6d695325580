use jobload_metrics::{CounterHandle, GaugeHandle, RateHandle, Registry, TrendHandle};

use crate::config::{MarkerCondition, StageMarker};
use crate::wire::JobStatusResponse;

pub mod names {
    pub const ITERATIONS_TOTAL: &str = "iterations_total";
    pub const SCAN_REQUESTS_TOTAL: &str = "scan_requests_total";
    pub const SCAN_SUCCESS_TOTAL: &str = "scan_success_total";
    pub const SCAN_FAILED_TOTAL: &str = "scan_failed_total";
    pub const POLL_REQUESTS_TOTAL: &str = "poll_requests_total";
    pub const POLL_ERRORS_TOTAL: &str = "poll_errors_total";
    pub const COMPLETED_JOBS_TOTAL: &str = "completed_jobs_total";
    pub const FAILED_JOBS_TOTAL: &str = "failed_jobs_total";
    pub const POLL_TIMEOUTS_TOTAL: &str = "poll_timeouts_total";
    pub const RESULT_REQUESTS_TOTAL: &str = "result_requests_total";
    pub const REWARDS_RECEIVED_TOTAL: &str = "rewards_received_total";

    pub const SCAN_SUCCESS_RATE: &str = "scan_success_rate";
    pub const COMPLETION_RATE: &str = "completion_rate";
    pub const RESULT_SUCCESS_RATE: &str = "result_success_rate";
    pub const REWARD_RATE: &str = "reward_rate";
    pub const E2E_SUCCESS_RATE: &str = "e2e_success_rate";

    pub const SCAN_LATENCY_MS: &str = "scan_latency_ms";
    pub const POLL_LATENCY_MS: &str = "poll_latency_ms";
    pub const TIME_TO_COMPLETE_MS: &str = "time_to_complete_ms";
    pub const RESULT_LATENCY_MS: &str = "result_latency_ms";
    pub const E2E_LATENCY_MS: &str = "e2e_latency_ms";

    pub const ACTIVE_JOBS: &str = "active_jobs";
    pub const VUS_ACTIVE: &str = "vus_active";
    pub const VUS_ACTIVE_MAX: &str = "vus_active_max";
}

/// Handles for every metric a scenario iteration writes, registered once per
/// run on that run's registry.
#[derive(Debug, Clone)]
pub struct ScenarioMetrics {
    pub iterations: CounterHandle,
    pub scan_requests: CounterHandle,
    pub scan_success: CounterHandle,
    pub scan_failed: CounterHandle,
    pub poll_requests: CounterHandle,
    pub poll_errors: CounterHandle,
    pub completed_jobs: CounterHandle,
    pub failed_jobs: CounterHandle,
    pub poll_timeouts: CounterHandle,
    pub result_requests: CounterHandle,
    pub rewards_received: CounterHandle,

    pub scan_success_rate: RateHandle,
    pub completion_rate: RateHandle,
    pub result_success_rate: RateHandle,
    pub reward_rate: RateHandle,
    pub e2e_success_rate: RateHandle,

    pub scan_latency: TrendHandle,
    pub poll_latency: TrendHandle,
    pub time_to_complete: TrendHandle,
    pub result_latency: TrendHandle,
    pub e2e_latency: TrendHandle,

    pub active_jobs: GaugeHandle,
    pub vus_active: GaugeHandle,
    pub vus_active_max: GaugeHandle,

    stages: Vec<(StageMarker, CounterHandle)>,
}

impl ScenarioMetrics {
    pub fn register(
        registry: &Registry,
        markers: &[StageMarker],
    ) -> jobload_metrics::Result<Self> {
        use names::*;

        let stages = markers
            .iter()
            .map(|m| {
                registry
                    .register_counter(&m.counter_name())
                    .map(|c| (m.clone(), c))
            })
            .collect::<jobload_metrics::Result<Vec<_>>>()?;

        Ok(Self {
            iterations: registry.register_counter(ITERATIONS_TOTAL)?,
            scan_requests: registry.register_counter(SCAN_REQUESTS_TOTAL)?,
            scan_success: registry.register_counter(SCAN_SUCCESS_TOTAL)?,
            scan_failed: registry.register_counter(SCAN_FAILED_TOTAL)?,
            poll_requests: registry.register_counter(POLL_REQUESTS_TOTAL)?,
            poll_errors: registry.register_counter(POLL_ERRORS_TOTAL)?,
            completed_jobs: registry.register_counter(COMPLETED_JOBS_TOTAL)?,
            failed_jobs: registry.register_counter(FAILED_JOBS_TOTAL)?,
            poll_timeouts: registry.register_counter(POLL_TIMEOUTS_TOTAL)?,
            result_requests: registry.register_counter(RESULT_REQUESTS_TOTAL)?,
            rewards_received: registry.register_counter(REWARDS_RECEIVED_TOTAL)?,

            scan_success_rate: registry.register_rate(SCAN_SUCCESS_RATE)?,
            completion_rate: registry.register_rate(COMPLETION_RATE)?,
            result_success_rate: registry.register_rate(RESULT_SUCCESS_RATE)?,
            reward_rate: registry.register_rate(REWARD_RATE)?,
            e2e_success_rate: registry.register_rate(E2E_SUCCESS_RATE)?,

            scan_latency: registry.register_trend(SCAN_LATENCY_MS)?,
            poll_latency: registry.register_trend(POLL_LATENCY_MS)?,
            time_to_complete: registry.register_trend(TIME_TO_COMPLETE_MS)?,
            result_latency: registry.register_trend(RESULT_LATENCY_MS)?,
            e2e_latency: registry.register_trend(E2E_LATENCY_MS)?,

            active_jobs: registry.register_gauge(ACTIVE_JOBS)?,
            vus_active: registry.register_gauge(VUS_ACTIVE)?,
            vus_active_max: registry.register_gauge(VUS_ACTIVE_MAX)?,

            stages,
        })
    }

    /// Credits the stage markers a completed job implies and returns the
    /// names of those that applied.
    pub(crate) fn mark_completed(&self, job: &JobStatusResponse) -> Vec<String> {
        let rewarded = job.reward_name().is_some();
        if rewarded {
            self.rewards_received.incr();
        }

        self.stages
            .iter()
            .filter(|(marker, _)| match marker.condition {
                MarkerCondition::Always => true,
                MarkerCondition::OnReward => rewarded,
            })
            .map(|(marker, counter)| {
                counter.incr();
                marker.name.clone()
            })
            .collect()
    }
}
