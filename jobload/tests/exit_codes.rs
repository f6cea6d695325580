use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::Context as _;
use jobload_testserver::{JobOutcome, JobServerBehavior, TestServer};

const FAST_PLAN: &str = r#"
startVUs: 1
stages:
  - { duration: 1s, target: 1 }
gracefulRampDown: 5s
poll: { maxAttempts: 10, interval: 10ms }
pacing: { pause: 50ms, jitter: 0s, afterFailure: 0s }
progressInterval: 200ms
"#;

fn status_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn describe(out: &Output) -> String {
    format!(
        "exit code {}\nstdout:\n{}\nstderr:\n{}",
        status_code(out.status),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    )
}

fn write_plan(dir: &Path, thresholds: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join("plan.yaml");
    std::fs::write(&path, format!("{FAST_PLAN}{thresholds}")).context("write plan")?;
    Ok(path)
}

async fn run_jobload(args: Vec<String>, token: Option<&str>) -> anyhow::Result<Output> {
    let exe = env!("CARGO_BIN_EXE_jobload");
    let token = token.map(str::to_string);
    tokio::task::spawn_blocking(move || {
        let mut cmd = Command::new(exe);
        cmd.arg("run").args(&args).env_remove("TOKEN").env("RUST_LOG", "warn");
        if let Some(t) = token {
            cmd.env("TOKEN", t);
        }
        cmd.output()
    })
    .await
    .context("spawn_blocking join")?
    .context("run jobload binary")
}

#[test]
fn invalid_flags_exit_30() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_jobload");

    let out = Command::new(exe)
        .arg("run")
        .arg("--duration")
        .arg("10x")
        .output()
        .context("run jobload binary")?;

    anyhow::ensure!(status_code(out.status) == 30, "{}", describe(&out));
    Ok(())
}

#[tokio::test]
async fn missing_token_exit_30_without_requests() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let args = vec!["--base-url".to_string(), server.base_url().to_string()];

    let out = run_jobload(args, None).await?;
    let requests = server.stats().create_requests() + server.stats().health_requests();
    server.shutdown().await;

    anyhow::ensure!(status_code(out.status) == 30, "{}", describe(&out));
    anyhow::ensure!(
        String::from_utf8_lossy(&out.stderr).contains("TOKEN"),
        "{}",
        describe(&out)
    );
    anyhow::ensure!(requests == 0, "expected no requests, saw {requests}");
    Ok(())
}

#[tokio::test]
async fn passing_run_exit_0_and_writes_summary() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir().context("tempdir")?;
    let plan = write_plan(dir.path(), "thresholds:\n  completion_rate: rate>0.9\n")?;
    let summary = dir.path().join("out/summary.json");

    let args = vec![
        "--config".to_string(),
        plan.display().to_string(),
        "--base-url".to_string(),
        server.base_url().to_string(),
        "--output".to_string(),
        "json".to_string(),
        "--summary-out".to_string(),
        summary.display().to_string(),
    ];
    let out = run_jobload(args, Some("secret-token")).await?;
    server.shutdown().await;

    anyhow::ensure!(status_code(out.status) == 0, "{}", describe(&out));

    let stdout = String::from_utf8_lossy(&out.stdout);
    let last = stdout.lines().last().context("no stdout lines")?;
    let line: serde_json::Value = serde_json::from_str(last).context("summary line")?;
    anyhow::ensure!(line["kind"] == "summary", "last line: {last}");
    anyhow::ensure!(line["passed"] == true, "last line: {last}");

    let written = std::fs::read_to_string(&summary).context("read summary")?;
    anyhow::ensure!(!written.contains("secret-token"), "credential leaked");
    let report: serde_json::Value = serde_json::from_str(&written).context("parse summary")?;
    anyhow::ensure!(report["metrics"]["completed_jobs_total"]["count"].as_u64() > Some(0));
    anyhow::ensure!(report["stages"]["reward"] == report["metrics"]["completed_jobs_total"]["count"]);
    Ok(())
}

#[tokio::test]
async fn thresholds_failed_exit_11() -> anyhow::Result<()> {
    let server = TestServer::start_with(JobServerBehavior {
        outcome: JobOutcome::Fail,
        ..JobServerBehavior::default()
    })
    .await
    .context("start test server")?;
    let dir = tempfile::tempdir().context("tempdir")?;
    let plan = write_plan(dir.path(), "thresholds:\n  completion_rate: rate>0.5\n")?;

    let args = vec![
        "--config".to_string(),
        plan.display().to_string(),
        "--base-url".to_string(),
        server.base_url().to_string(),
    ];
    let out = run_jobload(args, Some("t")).await?;
    server.shutdown().await;

    anyhow::ensure!(status_code(out.status) == 11, "{}", describe(&out));
    anyhow::ensure!(
        String::from_utf8_lossy(&out.stderr).contains("completion_rate: rate>0.5"),
        "{}",
        describe(&out)
    );
    Ok(())
}
