use jobload_metrics::GaugeHandle;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::RampConfig;
use crate::schedule::{RampSchedule, StageSnapshot};
use crate::signal::StopSignal;

const DEFAULT_TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct VuContext {
    pub vu_id: u64,
    /// Raised when the scheduler retires this context. Advisory: the
    /// context is expected to finish its current iteration and return.
    pub stop: Arc<StopSignal>,
}

impl VuContext {
    pub fn should_stop(&self) -> bool {
        self.stop.is_stopped()
    }
}

#[derive(Debug, Clone)]
pub struct RampProgress {
    pub elapsed: Duration,
    pub total: Duration,
    pub target: u64,
    pub active: u64,
    pub draining: u64,
    pub stage: Option<StageSnapshot>,
    pub aborted: bool,
}

pub type RampProgressFn = Arc<dyn Fn(&RampProgress) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RampOutcome {
    pub spawned: u64,
    pub retired: u64,
    /// Contexts abandoned because they outlived the grace period.
    pub forced_stops: u64,
    pub peak_active: u64,
    pub elapsed: Duration,
    pub aborted: bool,
}

#[derive(Debug, Clone)]
pub struct VuGauges {
    pub active: GaugeHandle,
    pub peak: GaugeHandle,
}

struct Running {
    id: u64,
    stop: Arc<StopSignal>,
    handle: JoinHandle<()>,
}

struct Draining {
    running: Running,
    deadline: Instant,
}

/// Keeps the number of live virtual users on the interpolated target.
///
/// Each tick spawns contexts while the target rises and signals the newest
/// ones to stop while it falls. A stopped context that is still running
/// after the grace period is aborted. When the stages are exhausted, or the
/// abort signal is raised, the target becomes zero and the same drain
/// applies before [`RampScheduler::run`] returns.
pub struct RampScheduler {
    schedule: RampSchedule,
    grace: Duration,
    tick: Duration,
    abort: Arc<StopSignal>,
    progress: Option<(Duration, RampProgressFn)>,
    gauges: Option<VuGauges>,
}

impl RampScheduler {
    pub fn new(ramp: &RampConfig, abort: Arc<StopSignal>) -> Self {
        Self {
            schedule: RampSchedule::new(ramp.start_vus, ramp.stages.clone()),
            grace: ramp.graceful_ramp_down,
            tick: DEFAULT_TICK,
            abort,
            progress: None,
            gauges: None,
        }
    }

    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    #[must_use]
    pub fn with_progress(mut self, every: Duration, f: RampProgressFn) -> Self {
        self.progress = Some((every, f));
        self
    }

    #[must_use]
    pub fn with_gauges(mut self, gauges: VuGauges) -> Self {
        self.gauges = Some(gauges);
        self
    }

    fn spawn<F, Fut>(&self, id: u64, vu: &F) -> Running
    where
        F: Fn(VuContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let stop = Arc::new(StopSignal::new());
        let fut = vu(VuContext {
            vu_id: id,
            stop: stop.clone(),
        });
        let gauges = self.gauges.clone();

        let handle = tokio::spawn(async move {
            let _active = gauges.as_ref().map(|g| {
                let guard = g.active.enter();
                g.peak.raise_to(guard.level());
                guard
            });
            fut.await;
        });

        Running { id, stop, handle }
    }

    pub async fn run<F, Fut>(&self, vu: F) -> RampOutcome
    where
        F: Fn(VuContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let started = Instant::now();
        let total = self.schedule.total_duration();

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut active: Vec<Running> = Vec::new();
        let mut draining: Vec<Draining> = Vec::new();
        let mut abandoned: Vec<JoinHandle<()>> = Vec::new();
        let mut outcome = RampOutcome::default();
        let mut last_progress: Option<Instant> = None;
        let mut next_id = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.abort.wait(), if !outcome.aborted => {}
            }

            let now = Instant::now();
            let elapsed = now.saturating_duration_since(started);

            if !outcome.aborted && self.abort.is_stopped() {
                outcome.aborted = true;
                tracing::info!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    active = active.len(),
                    "abort requested; draining virtual users"
                );
            }

            let finished = outcome.aborted || self.schedule.is_done(elapsed);
            let target = if finished {
                0
            } else {
                self.schedule.target_at(elapsed)
            };

            active.retain(|r| {
                let exited = r.handle.is_finished();
                if exited {
                    tracing::warn!(vu = r.id, "virtual user exited before being retired");
                }
                !exited
            });

            while (active.len() as u64) < target {
                next_id += 1;
                active.push(self.spawn(next_id, &vu));
                outcome.spawned += 1;
            }

            while (active.len() as u64) > target {
                let Some(running) = active.pop() else { break };
                running.stop.stop();
                draining.push(Draining {
                    running,
                    deadline: now + self.grace,
                });
                outcome.retired += 1;
            }

            let mut still_draining = Vec::with_capacity(draining.len());
            for d in draining.drain(..) {
                if d.running.handle.is_finished() {
                    continue;
                }
                if now < d.deadline {
                    still_draining.push(d);
                    continue;
                }
                tracing::warn!(
                    vu = d.running.id,
                    grace_ms = self.grace.as_millis() as u64,
                    "virtual user exceeded ramp-down grace period; aborting"
                );
                d.running.handle.abort();
                outcome.forced_stops += 1;
                abandoned.push(d.running.handle);
            }
            draining = still_draining;

            outcome.peak_active = outcome.peak_active.max(active.len() as u64);

            if let Some((every, report)) = &self.progress
                && last_progress.is_none_or(|t| now.saturating_duration_since(t) >= *every)
            {
                last_progress = Some(now);
                report(&RampProgress {
                    elapsed,
                    total,
                    target,
                    active: active.len() as u64,
                    draining: draining.len() as u64,
                    stage: self.schedule.stage_at(elapsed),
                    aborted: outcome.aborted,
                });
            }

            if finished && active.is_empty() && draining.is_empty() {
                break;
            }
        }

        // Aborted tasks drop their futures at the next await point.
        for handle in abandoned {
            let _ = handle.await;
        }

        outcome.elapsed = started.elapsed();
        outcome
    }
}
