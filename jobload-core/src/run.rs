use jobload_metrics::{Registry, rate_of};
use std::sync::Arc;
use std::time::SystemTime;

use crate::config::{IterationPacing, RunConfig};
use crate::metrics::ScenarioMetrics;
use crate::report::{ReportInput, RunReport};
use crate::scenario::ScenarioExecutor;
use crate::scheduler::{RampProgress, RampScheduler, VuContext, VuGauges};
use crate::signal::StopSignal;
use crate::thresholds::evaluate_thresholds;
use crate::transport::{JobApi, Transport};
use crate::Result;

const DEBUG_SAMPLE_EVERY: u64 = 10;

/// Ramp state plus a few live counters, emitted at the configured interval.
#[derive(Debug, Clone)]
pub struct RunProgress {
    pub ramp: RampProgress,
    pub iterations: u64,
    pub completed_jobs: u64,
    pub scan_success_rate: f64,
    pub completion_rate: f64,
    pub active_jobs: i64,
    pub e2e_p95_ms: f64,
}

pub type RunProgressFn = Arc<dyn Fn(&RunProgress) + Send + Sync + 'static>;

#[derive(Clone, Default)]
pub struct RunOptions {
    /// Raised externally (e.g. on Ctrl-C) to drain early.
    pub abort: Arc<StopSignal>,
    pub progress: Option<RunProgressFn>,
}

/// Executes one complete run: validate, setup, ramp, evaluate, report.
///
/// Returns `Err` only for problems detected before any virtual user starts.
/// Failed thresholds are reported through [`RunReport::passed`].
pub async fn run<T: Transport>(
    config: &RunConfig,
    transport: T,
    opts: RunOptions,
) -> Result<RunReport> {
    let rules = config.validate()?;
    let api = Arc::new(JobApi::new(transport, &config.target, config.timeouts)?);

    tracing::info!(
        base_url = %config.target.base_url,
        max_vus = config.ramp.max_vus(),
        duration_ms = config.ramp.total_duration().as_millis() as u64,
        poll_max_attempts = config.poll.max_attempts,
        poll_interval_ms = config.poll.interval.as_millis() as u64,
        "starting run"
    );

    if config.health_check {
        check_health(&api).await;
    }

    let registry = Registry::new();
    let metrics = ScenarioMetrics::register(&registry, &config.stage_markers)?;
    let gauges = VuGauges {
        active: metrics.vus_active.clone(),
        peak: metrics.vus_active_max.clone(),
    };

    let mut scheduler = RampScheduler::new(&config.ramp, opts.abort.clone()).with_gauges(gauges);
    if let Some(progress) = opts.progress.clone() {
        let live = metrics.clone();
        scheduler = scheduler.with_progress(
            config.progress_interval,
            Arc::new(move |ramp: &RampProgress| progress(&live_progress(ramp, &live))),
        );
    }

    let executor = Arc::new(ScenarioExecutor::new(api, config.poll, config.accounting, metrics));
    let pacing = config.pacing;
    let started_at = SystemTime::now();

    let ramp = scheduler
        .run(move |ctx| vu_loop(executor.clone(), ctx, pacing))
        .await;

    let snapshot = registry.snapshot();
    let thresholds = evaluate_thresholds(&snapshot, &rules);

    tracing::info!(
        elapsed_ms = ramp.elapsed.as_millis() as u64,
        aborted = ramp.aborted,
        spawned = ramp.spawned,
        forced_stops = ramp.forced_stops,
        thresholds_failed = thresholds.failures().count(),
        passed = thresholds.passed(),
        "run finished"
    );

    Ok(RunReport::build(ReportInput {
        started_at,
        config,
        ramp,
        snapshot: &snapshot,
        thresholds: &thresholds,
    }))
}

async fn check_health<T: Transport>(api: &JobApi<T>) {
    let outcome = api.health().await;
    match &outcome.result {
        Ok(res) if res.is_success() => {
            tracing::info!(elapsed_ms = outcome.elapsed_ms(), "target is healthy");
        }
        Ok(res) => {
            tracing::warn!(status = res.status, "health check returned non-success status");
        }
        Err(err) => {
            tracing::warn!(error = %err, "health check failed");
        }
    }
}

fn live_progress(ramp: &RampProgress, m: &ScenarioMetrics) -> RunProgress {
    let (scan_hits, scan_total) = m.scan_success_rate.get();
    let (done_hits, done_total) = m.completion_rate.get();
    RunProgress {
        ramp: ramp.clone(),
        iterations: m.iterations.get(),
        completed_jobs: m.completed_jobs.get(),
        scan_success_rate: rate_of(scan_hits, scan_total),
        completion_rate: rate_of(done_hits, done_total),
        active_jobs: m.active_jobs.get(),
        e2e_p95_ms: m.e2e_latency.percentile(95.0),
    }
}

async fn vu_loop<T: Transport>(
    executor: Arc<ScenarioExecutor<T>>,
    ctx: VuContext,
    pacing: IterationPacing,
) {
    let mut iteration = 0u64;
    while !ctx.should_stop() {
        iteration += 1;
        let outcome = executor.run_iteration(ctx.vu_id).await;

        if iteration % DEBUG_SAMPLE_EVERY == 1 {
            tracing::debug!(
                vu = ctx.vu_id,
                iteration,
                job_id = outcome.job_id.as_deref().unwrap_or("-"),
                success = outcome.is_success(),
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "iteration finished"
            );
        }

        let creation_failed = outcome.job_id.is_none();
        let pause = pacing.next_pause(&mut rand::thread_rng(), creation_failed);
        if pause.is_zero() {
            // Keeps a context that never awaits on I/O from starving the runtime.
            tokio::task::yield_now().await;
            continue;
        }
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = ctx.stop.wait() => break,
        }
    }
}
