use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub const PATH_CREATE: &str = "/api/v1/scan";
pub const PATH_RESULT: &str = "/api/v1/scan/result/{job_id}";
pub const PATH_HEALTH: &str = "/health";

pub const HEADER_IDEMPOTENCY_KEY: &str = "x-idempotency-key";

/// How a created job ends once its pending polls are used up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Complete { reward: Option<String> },
    Fail,
    /// Every status read answers 202 forever.
    NeverResolve,
    /// Status reads answer 404 as if the job id was never issued.
    Vanish,
}

#[derive(Debug, Clone)]
pub struct JobServerBehavior {
    /// Status reads answering 202 before the job reaches its outcome.
    pub polls_before_complete: u32,
    pub outcome: JobOutcome,
    /// Status answered by the creation endpoint. Anything other than 200/202
    /// carries an error body instead of a job id.
    pub create_status: u16,
    /// When set, requests must carry exactly `Bearer <token>`.
    pub token: Option<String>,
}

impl Default for JobServerBehavior {
    fn default() -> Self {
        Self {
            polls_before_complete: 2,
            outcome: JobOutcome::Complete {
                reward: Some("gold".to_string()),
            },
            create_status: 202,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    create_requests: Arc<AtomicU64>,
    status_requests: Arc<AtomicU64>,
    health_requests: Arc<AtomicU64>,
    unauthorized: Arc<AtomicU64>,
    missing_idempotency_key: Arc<AtomicU64>,
    duplicate_idempotency_key: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn create_requests(&self) -> u64 {
        self.create_requests.load(Ordering::Relaxed)
    }

    pub fn status_requests(&self) -> u64 {
        self.status_requests.load(Ordering::Relaxed)
    }

    pub fn health_requests(&self) -> u64 {
        self.health_requests.load(Ordering::Relaxed)
    }

    pub fn unauthorized(&self) -> u64 {
        self.unauthorized.load(Ordering::Relaxed)
    }

    pub fn missing_idempotency_key(&self) -> u64 {
        self.missing_idempotency_key.load(Ordering::Relaxed)
    }

    pub fn duplicate_idempotency_key(&self) -> u64 {
        self.duplicate_idempotency_key.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct Jobs {
    next_id: u64,
    /// Job id to the number of status reads served so far.
    polls: HashMap<String, u32>,
    seen_keys: HashSet<String>,
}

#[derive(Debug, Clone)]
struct AppState {
    behavior: Arc<JobServerBehavior>,
    stats: TestServerStats,
    jobs: Arc<Mutex<Jobs>>,
}

impl AppState {
    fn jobs(&self) -> MutexGuard<'_, Jobs> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) else {
            return false;
        };
        let Some(presented) = value.strip_prefix("Bearer ") else {
            return false;
        };
        match &self.behavior.token {
            Some(expected) => presented == expected,
            None => !presented.trim().is_empty(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateRequest {
    image_url: String,
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [("content-type", "application/json")],
        body.to_string(),
    )
        .into_response()
}

async fn handle_create(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    TestServerStats::inc(&state.stats.create_requests);

    if !state.authorized(&headers) {
        TestServerStats::inc(&state.stats.unauthorized);
        return json_response(StatusCode::UNAUTHORIZED, json!({"error": "unauthorized"}));
    }

    let Some(key) = headers
        .get(HEADER_IDEMPOTENCY_KEY)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    else {
        TestServerStats::inc(&state.stats.missing_idempotency_key);
        return json_response(
            StatusCode::BAD_REQUEST,
            json!({"error": "missing idempotency key"}),
        );
    };

    match serde_json::from_slice::<CreateRequest>(&body) {
        Ok(req) if !req.image_url.is_empty() => {}
        _ => return json_response(StatusCode::BAD_REQUEST, json!({"error": "bad payload"})),
    }

    let status = StatusCode::from_u16(state.behavior.create_status)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status != StatusCode::OK && status != StatusCode::ACCEPTED {
        return json_response(status, json!({"error": "injected failure"}));
    }

    let job_id = {
        let mut jobs = state.jobs();
        if !jobs.seen_keys.insert(key.to_string()) {
            TestServerStats::inc(&state.stats.duplicate_idempotency_key);
        }
        jobs.next_id += 1;
        let id = format!("job-{:06}", jobs.next_id);
        jobs.polls.insert(id.clone(), 0);
        id
    };

    json_response(status, json!({"job_id": job_id}))
}

async fn handle_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    TestServerStats::inc(&state.stats.status_requests);

    if !state.authorized(&headers) {
        TestServerStats::inc(&state.stats.unauthorized);
        return json_response(StatusCode::UNAUTHORIZED, json!({"error": "unauthorized"}));
    }

    let served = {
        let mut jobs = state.jobs();
        match jobs.polls.get_mut(&job_id) {
            Some(n) => {
                *n = n.saturating_add(1);
                *n
            }
            None => return json_response(StatusCode::NOT_FOUND, json!({"error": "not found"})),
        }
    };

    let behavior = &state.behavior;
    if matches!(behavior.outcome, JobOutcome::Vanish) {
        return json_response(StatusCode::NOT_FOUND, json!({"error": "not found"}));
    }
    if served <= behavior.polls_before_complete || behavior.outcome == JobOutcome::NeverResolve {
        return json_response(StatusCode::ACCEPTED, json!({"status": "processing"}));
    }

    match &behavior.outcome {
        JobOutcome::Complete { reward: Some(name) } => json_response(
            StatusCode::OK,
            json!({"status": "completed", "reward": {"name": name}}),
        ),
        JobOutcome::Complete { reward: None } => {
            json_response(StatusCode::OK, json!({"status": "completed", "reward": null}))
        }
        _ => json_response(StatusCode::OK, json!({"status": "failed"})),
    }
}

async fn handle_health(State(state): State<AppState>) -> Response {
    TestServerStats::inc(&state.stats.health_requests);
    json_response(StatusCode::OK, json!({"status": "ok"}))
}

pub fn router(behavior: JobServerBehavior, stats: TestServerStats) -> Router {
    let state = AppState {
        behavior: Arc::new(behavior),
        stats,
        jobs: Arc::new(Mutex::new(Jobs::default())),
    };
    Router::new()
        .route(PATH_CREATE, post(handle_create))
        .route(PATH_RESULT, get(handle_result))
        .route(PATH_HEALTH, get(handle_health))
        .with_state(state)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(JobServerBehavior::default()).await
    }

    pub async fn start_with(behavior: JobServerBehavior) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(behavior, stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
