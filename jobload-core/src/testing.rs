use jobload_http::{HttpRequest, HttpResponse};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use crate::transport::Transport;

#[derive(Debug, Clone)]
enum Scripted {
    Respond(u16, String),
    Timeout,
}

impl Scripted {
    fn into_result(self, req: &HttpRequest) -> jobload_http::Result<HttpResponse> {
        match self {
            Self::Respond(status, body) => Ok(HttpResponse::new(status, body)),
            Self::Timeout => Err(jobload_http::Error::Timeout(
                req.timeout.unwrap_or(Duration::from_secs(1)),
            )),
        }
    }
}

/// Replays canned responses: POSTs draw from the create queue, health checks
/// always answer 200, every other GET draws from the read queue and falls
/// back to `read_fallback` once it is empty.
#[derive(Debug)]
pub(crate) struct ScriptedTransport {
    creates: Mutex<VecDeque<Scripted>>,
    reads: Mutex<VecDeque<Scripted>>,
    read_fallback: Mutex<Scripted>,
    sent: Mutex<Vec<HttpRequest>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self {
            creates: Mutex::new(VecDeque::new()),
            reads: Mutex::new(VecDeque::new()),
            read_fallback: Mutex::new(Scripted::Respond(404, String::new())),
            sent: Mutex::new(Vec::new()),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedTransport {
    pub(crate) fn push_create(&self, status: u16, body: &str) {
        lock(&self.creates).push_back(Scripted::Respond(status, body.to_string()));
    }

    pub(crate) fn push_read(&self, status: u16, body: &str) {
        lock(&self.reads).push_back(Scripted::Respond(status, body.to_string()));
    }

    pub(crate) fn push_read_timeout(&self) {
        lock(&self.reads).push_back(Scripted::Timeout);
    }

    pub(crate) fn set_read_fallback(&self, status: u16, body: &str) {
        *lock(&self.read_fallback) = Scripted::Respond(status, body.to_string());
    }

    pub(crate) fn sent(&self) -> Vec<HttpRequest> {
        lock(&self.sent).clone()
    }

    pub(crate) fn reads_sent(&self) -> usize {
        lock(&self.sent)
            .iter()
            .filter(|r| r.method.as_str() == "GET" && !r.url.ends_with("/health"))
            .count()
    }

    fn next(&self, req: &HttpRequest) -> Scripted {
        if req.method.as_str() == "POST" {
            return lock(&self.creates)
                .pop_front()
                .unwrap_or(Scripted::Respond(500, String::new()));
        }
        if req.url.ends_with("/health") {
            return Scripted::Respond(200, "ok".to_string());
        }
        let next = lock(&self.reads).pop_front();
        next.unwrap_or_else(|| lock(&self.read_fallback).clone())
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        req: HttpRequest,
    ) -> impl Future<Output = jobload_http::Result<HttpResponse>> + Send {
        let result = self.next(&req).into_result(&req);
        lock(&self.sent).push(req);
        std::future::ready(result)
    }
}
