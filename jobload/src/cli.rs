use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use jobload_core::config::Preset;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    let d = humantime::parse_duration(s)
        .map_err(|e| format!("invalid duration '{s}' (expected e.g. 10s, 250ms, 2m): {e}"))?;
    if d.is_zero() {
        return Err(format!("duration '{s}' must be greater than zero"));
    }
    Ok(d)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar and a human-readable summary.
    HumanReadable,
    /// Emit JSON progress lines (NDJSON) and a final summary line to stdout.
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PresetArg {
    /// Ramp to --vus, hold for --duration, ramp down.
    Load,
    /// Fixed short profile (1 → 5 → 10 → 5 → 0 virtual users).
    E2e,
}

impl From<PresetArg> for Preset {
    fn from(value: PresetArg) -> Self {
        match value {
            PresetArg::Load => Preset::Load,
            PresetArg::E2e => Preset::E2e,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "jobload",
    author,
    version,
    about = "Load tester for asynchronous job APIs",
    long_about = "jobload drives a create → poll → read workload against an asynchronous job API.\n\nVirtual users follow a staged ramp; every iteration submits a job, polls its status until it completes, fails or runs out of attempts, then reads the final result. Latencies, rates and counters are aggregated and checked against thresholds at the end of the run.",
    after_help = "Examples:\n  TOKEN=... jobload run\n  jobload run --preset e2e --base-url http://127.0.0.1:8080 --token dev\n  jobload run --vus 100 --duration 5m --output json --summary-out summary.json\n  jobload run --config plan.yaml"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test
    #[command(
        long_about = "Run a load test.\n\nConfiguration is layered: the preset, then the optional YAML plan, then CLI flags (or their environment variables)."
    )]
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// YAML run plan (stages, poll budget, thresholds, ...)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Built-in profile the plan and flags are layered on (default: load)
    #[arg(long, value_enum)]
    pub preset: Option<PresetArg>,

    /// Base URL of the job API
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// Bearer token sent with every API call
    #[arg(long, env = "TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Image URL submitted in every job creation request
    #[arg(long, env = "IMAGE_URL")]
    pub image_url: Option<String>,

    /// Peak virtual users of the load preset
    #[arg(long, env = "VUS")]
    pub vus: Option<u64>,

    /// Hold duration of the load preset (e.g. 2m, 90s)
    #[arg(long, env = "DURATION", value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,

    /// Also write the JSON report to this file
    #[arg(long, value_name = "PATH")]
    pub summary_out: Option<PathBuf>,

    /// Log filter (e.g. info, debug, jobload_core=debug); overrides RUST_LOG
    #[arg(long)]
    pub log_level: Option<String>,

    /// Skip the startup health check
    #[arg(long)]
    pub no_health_check: bool,
}
