use anyhow::Context as _;
use std::path::Path;
use std::sync::Arc;

use jobload_core::config::{Credential, Preset, RunConfig};
use jobload_core::config::{DEFAULT_DURATION, DEFAULT_VUS};
use jobload_core::report::RunReport;
use jobload_core::{RunOptions, StopSignal};
use jobload_http::{ClientOptions, HttpClient};

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::plan::{self, RunPlan};
use crate::run_error::RunError;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let plan = match &args.config {
        Some(path) => Some(plan::load(path).await.map_err(RunError::InvalidInput)?),
        None => None,
    };
    let config = build_config(&args, plan);

    let out = output::formatter(args.output);
    out.print_header(&config);

    let abort = Arc::new(StopSignal::new());
    let interrupt = {
        let abort = abort.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; draining virtual users");
                abort.stop();
            }
        })
    };

    let client = HttpClient::new(ClientOptions::default());
    let result = jobload_core::run(
        &config,
        client,
        RunOptions {
            abort,
            progress: out.progress(),
        },
    )
    .await;
    interrupt.abort();
    let report = result?;

    out.print_summary(&report).map_err(RunError::RuntimeError)?;

    if let Some(path) = &args.summary_out {
        write_summary(path, &report)
            .await
            .map_err(RunError::RuntimeError)?;
    }

    Ok(ExitCode::from_thresholds(report.passed))
}

/// preset → plan → flags/env.
fn build_config(args: &RunArgs, plan: Option<RunPlan>) -> RunConfig {
    let preset = args
        .preset
        .map(Preset::from)
        .or_else(|| plan.as_ref().and_then(|p| p.preset).map(Preset::from))
        .unwrap_or(Preset::Load);

    let mut cfg = RunConfig::preset(
        preset,
        args.vus.unwrap_or(DEFAULT_VUS),
        args.duration.unwrap_or(DEFAULT_DURATION),
    );

    if let Some(plan) = plan {
        plan.apply(&mut cfg);
    }

    if let Some(v) = &args.base_url {
        cfg.target.base_url = v.clone();
    }
    if let Some(v) = &args.image_url {
        cfg.target.image_url = v.clone();
    }
    cfg.target.token = args.token.as_deref().map(Credential::new);
    if args.no_health_check {
        cfg.health_check = false;
    }
    cfg
}

async fn write_summary(path: &Path, report: &RunReport) -> anyhow::Result<()> {
    let json = report
        .to_json_pretty()
        .context("failed to encode run report")?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("failed to create summary output dir: {}", parent.display())
        })?;
    }
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("failed to write summary: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser;
    use std::time::Duration;

    fn args(extra: &[&str]) -> RunArgs {
        let argv = ["jobload", "run"].iter().chain(extra).copied();
        match Cli::try_parse_from(argv) {
            Ok(Cli {
                command: Command::Run(args),
            }) => args,
            Err(err) => panic!("failed to parse args: {err}"),
        }
    }

    #[test]
    fn flags_override_plan_which_overrides_preset() {
        let plan = plan::parse(
            "preset: e2e\nbaseUrl: http://plan.test\nhealthCheck: true\nstages: [{ duration: 5s, target: 2 }]",
        )
        .unwrap_or_else(|e| panic!("{e:#}"));

        let cfg = build_config(
            &args(&[
                "--base-url",
                "http://flag.test",
                "--token",
                "t",
                "--no-health-check",
            ]),
            Some(plan),
        );

        assert_eq!(cfg.target.base_url, "http://flag.test");
        assert_eq!(cfg.ramp.stages.len(), 1);
        assert_eq!(cfg.poll.max_attempts, 24);
        assert!(!cfg.health_check);
        assert_eq!(cfg.target.token.as_ref().map(Credential::expose), Some("t"));
    }

    #[test]
    fn vus_and_duration_shape_the_load_preset() {
        let cfg = build_config(
            &args(&["--preset", "load", "--vus", "7", "--duration", "3m"]),
            None,
        );
        assert_eq!(cfg.ramp.max_vus(), 7);
        assert_eq!(cfg.ramp.total_duration(), Duration::from_secs(240));
    }
}
