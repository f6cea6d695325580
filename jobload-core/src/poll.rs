use jobload_http::HttpTransportErrorKind;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::PollConfig;
use crate::metrics::ScenarioMetrics;
use crate::transport::{CallKind, CallOutcome, JobApi, Transport};
use crate::wire::{JobStatus, JobStatusResponse, ProtocolError, parse_status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PollState {
    Awaiting,
    TerminalSuccess,
    TerminalFailure,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub state: PollState,
    pub attempts: u32,
    /// Measured from the timestamp handed to [`JobPoller::run`].
    pub elapsed: Duration,
    /// Last terminal snapshot, if one was seen.
    pub job: Option<JobStatusResponse>,
    pub observed_markers: Vec<String>,
}

impl PollOutcome {
    pub fn is_success(&self) -> bool {
        self.state == PollState::TerminalSuccess
    }

    pub fn reward_name(&self) -> Option<&str> {
        self.job.as_ref().and_then(|j| j.reward_name())
    }
}

/// Why an attempt left the job in `awaiting`.
#[derive(Debug, thiserror::Error)]
enum Pending {
    #[error("job not found yet")]
    NotFound,
    #[error("not ready (status {0})")]
    NotReady(u16),
    #[error("job still {0}")]
    InProgress(JobStatus),
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),
    #[error("transport error: {0}")]
    Transport(HttpTransportErrorKind),
}

impl Pending {
    /// Whether the attempt itself misbehaved, as opposed to the job simply
    /// not being done yet.
    fn is_error(&self) -> bool {
        match self {
            Self::NotFound | Self::InProgress(_) => false,
            Self::NotReady(status) => *status >= 500,
            Self::Protocol(_) | Self::Transport(_) => true,
        }
    }
}

enum Attempt {
    Completed(JobStatusResponse),
    Failed(JobStatusResponse),
    Pending(Pending),
}

fn classify(call: &CallOutcome) -> Attempt {
    let res = match &call.result {
        Ok(res) => res,
        Err(e) => return Attempt::Pending(Pending::Transport(e.transport_error_kind())),
    };

    match res.status {
        200 => match parse_status(res) {
            Ok(job) if job.status == JobStatus::Completed => Attempt::Completed(job),
            Ok(job) if job.status == JobStatus::Failed => Attempt::Failed(job),
            Ok(job) => Attempt::Pending(Pending::InProgress(job.status)),
            Err(e) => Attempt::Pending(Pending::Protocol(e)),
        },
        404 => Attempt::Pending(Pending::NotFound),
        other => Attempt::Pending(Pending::NotReady(other)),
    }
}

/// Bounded status polling for one job.
///
/// Every attempt is an idempotent read, so a failed attempt (transport error,
/// unexpected status, unparseable body) only consumes budget. A job id that
/// never resolves (404 on every attempt) ends as [`PollState::TimedOut`].
pub struct JobPoller<'a, T> {
    api: &'a JobApi<T>,
    config: PollConfig,
    metrics: &'a ScenarioMetrics,
    vu: u64,
}

impl<'a, T: Transport> JobPoller<'a, T> {
    pub fn new(api: &'a JobApi<T>, config: PollConfig, metrics: &'a ScenarioMetrics, vu: u64) -> Self {
        Self {
            api,
            config,
            metrics,
            vu,
        }
    }

    pub async fn run(&self, job_id: &str, started: Instant) -> PollOutcome {
        let mut state = PollState::Awaiting;
        let mut attempts = 0;
        let mut job = None;
        let mut observed_markers = Vec::new();

        while attempts < self.config.max_attempts {
            if attempts > 0 {
                tokio::time::sleep(self.config.interval).await;
            }
            attempts += 1;

            let call = self.api.job_status(job_id, CallKind::Poll).await;
            self.metrics.poll_requests.incr();
            self.metrics.poll_latency.observe_duration(call.elapsed);

            match classify(&call) {
                Attempt::Completed(snapshot) => {
                    self.metrics.completed_jobs.incr();
                    observed_markers = self.metrics.mark_completed(&snapshot);
                    job = Some(snapshot);
                    state = PollState::TerminalSuccess;
                    break;
                }
                Attempt::Failed(snapshot) => {
                    self.metrics.failed_jobs.incr();
                    tracing::warn!(vu = self.vu, call = "poll", job_id, attempts, "job failed");
                    job = Some(snapshot);
                    state = PollState::TerminalFailure;
                    break;
                }
                Attempt::Pending(reason) => {
                    if reason.is_error() {
                        self.metrics.poll_errors.incr();
                        tracing::warn!(
                            vu = self.vu,
                            call = "poll",
                            job_id,
                            attempt = attempts,
                            status = ?call.status(),
                            %reason,
                            "poll attempt failed; retrying"
                        );
                    } else {
                        tracing::trace!(
                            vu = self.vu,
                            job_id,
                            attempt = attempts,
                            %reason,
                            "job not done"
                        );
                    }
                }
            }
        }

        if state == PollState::Awaiting {
            state = PollState::TimedOut;
            self.metrics.poll_timeouts.incr();
            tracing::warn!(
                vu = self.vu,
                call = "poll",
                job_id,
                attempts,
                "job did not reach a terminal state"
            );
        }

        PollOutcome {
            state,
            attempts,
            elapsed: started.elapsed(),
            job,
            observed_markers,
        }
    }
}
