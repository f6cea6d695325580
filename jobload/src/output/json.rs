use serde::Serialize;
use std::io::Write as _;
use std::sync::Arc;

use jobload_core::config::RunConfig;
use jobload_core::report::RunReport;

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _config: &RunConfig) {}

    fn progress(&self) -> Option<jobload_core::RunProgressFn> {
        Some(Arc::new(move |u: &jobload_core::RunProgress| {
            emit_json_line(&build_progress_line(u));
        }))
    }

    fn print_summary(&self, report: &RunReport) -> anyhow::Result<()> {
        emit_json_line(&JsonSummaryLine {
            kind: "summary",
            report,
        });
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub elapsed_secs: f64,
    pub total_secs: f64,
    pub stage: Option<usize>,
    pub stages: Option<usize>,
    pub target_vus: u64,
    pub active_vus: u64,
    pub draining_vus: u64,
    pub aborted: bool,

    pub iterations: u64,
    pub completed_jobs: u64,
    pub scan_success_rate: f64,
    pub completion_rate: f64,
    pub active_jobs: i64,
    pub e2e_p95_ms: f64,
}

fn build_progress_line(u: &jobload_core::RunProgress) -> JsonProgressLine {
    let r = &u.ramp;
    JsonProgressLine {
        kind: "progress",
        elapsed_secs: r.elapsed.as_secs_f64(),
        total_secs: r.total.as_secs_f64(),
        stage: r.stage.map(|s| s.index + 1),
        stages: r.stage.map(|s| s.count),
        target_vus: r.target,
        active_vus: r.active,
        draining_vus: r.draining,
        aborted: r.aborted,

        iterations: u.iterations,
        completed_jobs: u.completed_jobs,
        scan_success_rate: u.scan_success_rate,
        completion_rate: u.completion_rate,
        active_jobs: u.active_jobs,
        e2e_p95_ms: u.e2e_p95_ms,
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine<'a> {
    pub kind: &'static str,
    #[serde(flatten)]
    pub report: &'a RunReport,
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = out.write_all(b"\n");
        let _ = out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobload_core::RampProgress;
    use jobload_core::schedule::StageSnapshot;
    use serde_json::Value;
    use std::time::Duration;

    #[test]
    fn progress_line_is_one_based_and_tagged() {
        let u = jobload_core::RunProgress {
            ramp: RampProgress {
                elapsed: Duration::from_millis(1500),
                total: Duration::from_secs(10),
                target: 3,
                active: 3,
                draining: 1,
                stage: Some(StageSnapshot {
                    index: 0,
                    count: 2,
                    stage_elapsed: Duration::from_millis(1500),
                    stage_remaining: Duration::from_millis(3500),
                    start_target: 0,
                    end_target: 10,
                    current_target: 3,
                }),
                aborted: false,
            },
            iterations: 7,
            completed_jobs: 5,
            scan_success_rate: 1.0,
            completion_rate: 0.8,
            active_jobs: 2,
            e2e_p95_ms: 1234.5,
        };

        let v: Value = match serde_json::to_value(build_progress_line(&u)) {
            Ok(v) => v,
            Err(err) => panic!("to_value failed: {err}"),
        };
        assert_eq!(v.get("kind").and_then(Value::as_str), Some("progress"));
        assert_eq!(v.get("stage").and_then(Value::as_u64), Some(1));
        assert_eq!(v.get("stages").and_then(Value::as_u64), Some(2));
        assert_eq!(v.get("elapsed_secs").and_then(Value::as_f64), Some(1.5));
        assert_eq!(v.get("draining_vus").and_then(Value::as_u64), Some(1));
        assert_eq!(v.get("active_jobs").and_then(Value::as_i64), Some(2));
    }
}
