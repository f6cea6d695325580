use jobload_http::HttpTransportErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::{IterationAccounting, PollConfig};
use crate::metrics::ScenarioMetrics;
use crate::poll::{JobPoller, PollOutcome, PollState};
use crate::transport::{CallKind, CallOutcome, JobApi, Transport};
use crate::wire::{JobStatus, ProtocolError, parse_created, parse_status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum IterationFailure {
    Creation,
    JobFailed,
    PollTimedOut,
    FinalRead,
}

#[derive(Debug, Clone)]
pub struct IterationOutcome {
    pub job_id: Option<String>,
    pub poll: Option<PollOutcome>,
    pub failure: Option<IterationFailure>,
    pub elapsed: Duration,
}

impl IterationOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn rewarded(&self) -> bool {
        self.poll.as_ref().is_some_and(|p| p.reward_name().is_some())
    }
}

#[derive(Debug, thiserror::Error)]
enum CallError {
    #[error("transport error: {0}")]
    Transport(HttpTransportErrorKind),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub fn idempotency_key(vu: u64) -> String {
    format!("jobload-{vu}-{}", Uuid::new_v4())
}

/// Runs one create → poll → read iteration and records it.
///
/// Holds no state between iterations; every outcome, including transport and
/// protocol failures, ends up as metric observations.
pub struct ScenarioExecutor<T> {
    api: Arc<JobApi<T>>,
    poll: PollConfig,
    accounting: IterationAccounting,
    metrics: ScenarioMetrics,
}

impl<T: Transport> ScenarioExecutor<T> {
    pub fn new(
        api: Arc<JobApi<T>>,
        poll: PollConfig,
        accounting: IterationAccounting,
        metrics: ScenarioMetrics,
    ) -> Self {
        Self {
            api,
            poll,
            accounting,
            metrics,
        }
    }

    pub fn metrics(&self) -> &ScenarioMetrics {
        &self.metrics
    }

    pub async fn run_iteration(&self, vu: u64) -> IterationOutcome {
        let m = &self.metrics;
        let started = Instant::now();
        m.iterations.incr();

        m.scan_requests.incr();
        let call = self.api.create_job(&idempotency_key(vu)).await;
        m.scan_latency.observe_duration(call.elapsed);

        let created = match &call.result {
            Ok(res) => parse_created(res).map_err(CallError::from),
            Err(e) => Err(CallError::Transport(e.transport_error_kind())),
        };
        m.scan_success_rate.observe(created.is_ok());

        let job_id = match created {
            Ok(created) => created.job_id,
            Err(cause) => {
                m.scan_failed.incr();
                m.e2e_success_rate.observe(false);
                if self.accounting.creation_failure_counts_as_incomplete {
                    m.completion_rate.observe(false);
                }
                tracing::warn!(
                    vu,
                    call = %CallKind::Create,
                    status = ?call.status(),
                    %cause,
                    body = %body_excerpt(&call),
                    "job creation failed"
                );
                return IterationOutcome {
                    job_id: None,
                    poll: None,
                    failure: Some(IterationFailure::Creation),
                    elapsed: started.elapsed(),
                };
            }
        };
        m.scan_success.incr();

        let poll = {
            let _active = m.active_jobs.enter();
            JobPoller::new(&self.api, self.poll, m, vu)
                .run(&job_id, started)
                .await
        };
        m.time_to_complete.observe_duration(poll.elapsed);
        m.completion_rate.observe(poll.is_success());
        m.reward_rate.observe(poll.reward_name().is_some());

        let poll_failure = match poll.state {
            PollState::TerminalSuccess => None,
            PollState::TerminalFailure => Some(IterationFailure::JobFailed),
            PollState::TimedOut | PollState::Awaiting => Some(IterationFailure::PollTimedOut),
        };
        if poll_failure.is_some() {
            if self.accounting.e2e_latency_for_every_job {
                m.e2e_latency.observe_duration(started.elapsed());
            }
            m.e2e_success_rate.observe(false);
            return IterationOutcome {
                job_id: Some(job_id),
                poll: Some(poll),
                failure: poll_failure,
                elapsed: started.elapsed(),
            };
        }

        m.result_requests.incr();
        let call = self.api.job_status(&job_id, CallKind::Result).await;
        m.result_latency.observe_duration(call.elapsed);

        let read = match &call.result {
            Ok(res) => parse_status(res).map_err(CallError::from),
            Err(e) => Err(CallError::Transport(e.transport_error_kind())),
        };
        let result_ok = matches!(&read, Ok(job) if job.status == JobStatus::Completed);
        m.result_success_rate.observe(result_ok);
        if !result_ok {
            tracing::warn!(
                vu,
                call = %CallKind::Result,
                job_id = %job_id,
                status = ?call.status(),
                cause = ?read.as_ref().err(),
                "final read did not confirm completion"
            );
        }

        let elapsed = started.elapsed();
        m.e2e_latency.observe_duration(elapsed);
        m.e2e_success_rate.observe(result_ok);

        IterationOutcome {
            job_id: Some(job_id),
            poll: Some(poll),
            failure: (!result_ok).then_some(IterationFailure::FinalRead),
            elapsed,
        }
    }
}

const BODY_EXCERPT_CHARS: usize = 200;

fn body_excerpt(call: &CallOutcome) -> String {
    call.result
        .as_ref()
        .ok()
        .map(|res| {
            String::from_utf8_lossy(&res.body)
                .chars()
                .take(BODY_EXCERPT_CHARS)
                .collect()
        })
        .unwrap_or_default()
}
