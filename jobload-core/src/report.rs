use jobload_metrics::{MetricValue, RegistrySnapshot, rate_of};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use crate::config::RunConfig;
use crate::scheduler::RampOutcome;
use crate::thresholds::ThresholdReport;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub config: ReportConfig,
    pub duration_secs: f64,
    pub aborted: bool,
    pub vus: VuStats,
    /// Every registered metric, including those never observed.
    pub metrics: BTreeMap<String, ReportMetric>,
    /// Stage marker name to the number of completed jobs that passed it.
    pub stages: BTreeMap<String, u64>,
    pub thresholds: Vec<ReportThreshold>,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportConfig {
    pub base_url: String,
    pub image_url: String,
    pub start_vus: u64,
    pub max_vus: u64,
    pub stages: Vec<ReportStage>,
    pub graceful_ramp_down_secs: f64,
    pub poll_max_attempts: u32,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportStage {
    pub duration_secs: f64,
    pub target: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct VuStats {
    pub spawned: u64,
    pub retired: u64,
    pub forced_stops: u64,
    pub peak_active: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportMetric {
    Counter {
        count: u64,
    },
    Rate {
        rate: f64,
        passes: u64,
        fails: u64,
    },
    Trend {
        count: u64,
        min: f64,
        max: f64,
        avg: f64,
        med: f64,
        p90: f64,
        p95: f64,
        p99: f64,
    },
    Gauge {
        value: i64,
    },
}

impl From<&MetricValue> for ReportMetric {
    fn from(value: &MetricValue) -> Self {
        match value {
            MetricValue::Counter(count) => Self::Counter { count: *count },
            MetricValue::Rate { hits, total } => Self::Rate {
                rate: rate_of(*hits, *total),
                passes: *hits,
                fails: total.saturating_sub(*hits),
            },
            MetricValue::Trend(t) => {
                let s = t.summary();
                Self::Trend {
                    count: s.count,
                    min: s.min,
                    max: s.max,
                    avg: s.avg,
                    med: s.med,
                    p90: s.p90,
                    p95: s.p95,
                    p99: s.p99,
                }
            }
            MetricValue::Gauge(value) => Self::Gauge { value: *value },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportThreshold {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
}

pub struct ReportInput<'a> {
    pub started_at: SystemTime,
    pub config: &'a RunConfig,
    pub ramp: RampOutcome,
    pub snapshot: &'a RegistrySnapshot,
    pub thresholds: &'a ThresholdReport,
}

impl RunReport {
    pub fn build(input: ReportInput<'_>) -> Self {
        let cfg = input.config;

        let metrics = input
            .snapshot
            .iter()
            .map(|m| (m.name.clone(), ReportMetric::from(&m.value)))
            .collect();

        let stages = cfg
            .stage_markers
            .iter()
            .map(|marker| {
                let count = input
                    .snapshot
                    .counter(&marker.counter_name())
                    .unwrap_or(0);
                (marker.name.clone(), count)
            })
            .collect();

        let thresholds = input
            .thresholds
            .verdicts
            .iter()
            .map(|v| ReportThreshold {
                metric: v.metric.clone(),
                expression: v.expression.clone(),
                observed: v.observed,
                passed: v.passed,
            })
            .collect();

        Self {
            timestamp: humantime::format_rfc3339_millis(input.started_at).to_string(),
            config: ReportConfig {
                base_url: cfg.target.base_url.clone(),
                image_url: cfg.target.image_url.clone(),
                start_vus: cfg.ramp.start_vus,
                max_vus: cfg.ramp.max_vus(),
                stages: cfg
                    .ramp
                    .stages
                    .iter()
                    .map(|s| ReportStage {
                        duration_secs: s.duration.as_secs_f64(),
                        target: s.target,
                    })
                    .collect(),
                graceful_ramp_down_secs: cfg.ramp.graceful_ramp_down.as_secs_f64(),
                poll_max_attempts: cfg.poll.max_attempts,
                poll_interval_ms: duration_ms(cfg.poll.interval),
            },
            duration_secs: input.ramp.elapsed.as_secs_f64(),
            aborted: input.ramp.aborted,
            vus: VuStats {
                spawned: input.ramp.spawned,
                retired: input.ramp.retired,
                forced_stops: input.ramp.forced_stops,
                peak_active: input.ramp.peak_active,
            },
            metrics,
            stages,
            thresholds,
            passed: input.thresholds.passed(),
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn counter(&self, name: &str) -> Option<u64> {
        match self.metrics.get(name)? {
            ReportMetric::Counter { count } => Some(*count),
            _ => None,
        }
    }

    pub fn rate(&self, name: &str) -> Option<f64> {
        match self.metrics.get(name)? {
            ReportMetric::Rate { rate, .. } => Some(*rate),
            _ => None,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
