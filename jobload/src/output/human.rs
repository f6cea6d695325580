use std::sync::Arc;

mod format;
mod progress;
mod summary;

use format::{format_ms, format_pct, format_secs};
use jobload_core::config::RunConfig;
use jobload_core::report::RunReport;
use progress::HumanProgress;
use summary::render;

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, config: &RunConfig) {
        println!("target: {}", config.target.base_url);
        let stages = config
            .ramp
            .stages
            .iter()
            .map(|s| format!("{}→{}", format_secs(s.duration.as_secs_f64()), s.target))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "ramp: start={} stages=[{stages}] max_vus={} grace={}",
            config.ramp.start_vus,
            config.ramp.max_vus(),
            format_secs(config.ramp.graceful_ramp_down.as_secs_f64()),
        );
        println!(
            "poll: attempts={} interval={}",
            config.poll.max_attempts,
            format_ms(config.poll.interval.as_secs_f64() * 1000.0)
        );
        println!();
    }

    fn progress(&self) -> Option<jobload_core::RunProgressFn> {
        let progress = self.progress.clone();

        Some(Arc::new(move |u: &jobload_core::RunProgress| {
            let r = &u.ramp;
            let stage = match &r.stage {
                Some(s) => format!("stage={}/{} ", s.index + 1, s.count),
                None => String::new(),
            };
            let aborting = if r.aborted { " aborting" } else { "" };
            let message = format!(
                "{stage}target={} vus={} draining={} iters={} scan_ok={} done={} jobs={} e2e_p95={}{aborting}",
                r.target,
                r.active,
                r.draining,
                u.iterations,
                format_pct(u.scan_success_rate),
                format_pct(u.completion_rate),
                u.active_jobs,
                format_ms(u.e2e_p95_ms),
            );
            progress.update(r.total, r.elapsed, message);
        }))
    }

    fn print_summary(&self, report: &RunReport) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(report));

        let failures: Vec<_> = report.thresholds.iter().filter(|t| !t.passed).collect();
        if !failures.is_empty() {
            eprintln!("thresholds failed:");
            for t in failures {
                match t.observed {
                    Some(obs) => eprintln!("  {}: {} (observed {obs})", t.metric, t.expression),
                    None => eprintln!("  {}: {} (no value)", t.metric, t.expression),
                }
            }
        }

        Ok(())
    }
}
