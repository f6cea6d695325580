use bytes::Bytes;
use jobload_http::{HttpClient, HttpRequest, HttpResponse};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::config::{CallTimeouts, Credential, TargetConfig};
use crate::wire::CreateJobRequest;
use crate::{Error, Result};

/// The HTTP capability the run consumes.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        req: HttpRequest,
    ) -> impl Future<Output = jobload_http::Result<HttpResponse>> + Send;
}

impl Transport for HttpClient {
    fn send(
        &self,
        req: HttpRequest,
    ) -> impl Future<Output = jobload_http::Result<HttpResponse>> + Send {
        self.request(req)
    }
}

impl<T: Transport> Transport for Arc<T> {
    fn send(
        &self,
        req: HttpRequest,
    ) -> impl Future<Output = jobload_http::Result<HttpResponse>> + Send {
        (**self).send(req)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum CallKind {
    Create,
    Poll,
    Result,
    Health,
}

#[derive(Debug)]
pub struct CallOutcome {
    pub kind: CallKind,
    pub elapsed: Duration,
    pub result: jobload_http::Result<HttpResponse>,
}

impl CallOutcome {
    pub fn status(&self) -> Option<u16> {
        self.result.as_ref().ok().map(|r| r.status)
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}

/// Request shapes of the job API on top of a [`Transport`].
#[derive(Debug)]
pub struct JobApi<T> {
    transport: T,
    token: Credential,
    create_url: String,
    create_body: Bytes,
    status_base: Url,
    health_url: String,
    timeouts: CallTimeouts,
}

impl<T: Transport> JobApi<T> {
    pub fn new(transport: T, target: &TargetConfig, timeouts: CallTimeouts) -> Result<Self> {
        let token = target.token.clone().ok_or(Error::MissingCredential)?;

        let invalid = |reason: String| Error::InvalidBaseUrl {
            url: target.base_url.clone(),
            reason,
        };
        let base = Url::parse(&target.base_url).map_err(|e| invalid(e.to_string()))?;
        let join = |path: &str| base.join(path).map_err(|e| invalid(e.to_string()));

        let status_base = join(&target.paths.status)?;
        if status_base.cannot_be_a_base() {
            return Err(invalid("status path cannot carry a job id".to_string()));
        }

        let create_body = serde_json::to_vec(&CreateJobRequest {
            image_url: &target.image_url,
        })
        .map_err(|e| Error::InvalidConfig(format!("create payload: {e}")))?;

        Ok(Self {
            transport,
            token,
            create_url: join(&target.paths.create)?.into(),
            create_body: Bytes::from(create_body),
            status_base,
            health_url: join(&target.paths.health)?.into(),
            timeouts,
        })
    }

    pub fn status_url(&self, job_id: &str) -> String {
        let mut url = self.status_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(job_id);
        }
        url.into()
    }

    async fn call(&self, kind: CallKind, req: HttpRequest) -> CallOutcome {
        let started = Instant::now();
        let result = self.transport.send(req).await;
        CallOutcome {
            kind,
            elapsed: started.elapsed(),
            result,
        }
    }

    pub async fn create_job(&self, idempotency_key: &str) -> CallOutcome {
        let req = HttpRequest::post(self.create_url.as_str(), self.create_body.clone())
            .json()
            .bearer(self.token.expose())
            .header("x-idempotency-key", idempotency_key)
            .timeout(self.timeouts.create);
        self.call(CallKind::Create, req).await
    }

    /// `kind` selects the timeout budget: [`CallKind::Result`] for the final
    /// read, anything else is treated as a poll.
    pub async fn job_status(&self, job_id: &str, kind: CallKind) -> CallOutcome {
        let timeout = match kind {
            CallKind::Result => self.timeouts.result,
            _ => self.timeouts.poll,
        };
        let req = HttpRequest::get(self.status_url(job_id))
            .json()
            .bearer(self.token.expose())
            .timeout(timeout);
        self.call(kind, req).await
    }

    pub async fn health(&self) -> CallOutcome {
        let req = HttpRequest::get(self.health_url.as_str()).timeout(self.timeouts.health);
        self.call(CallKind::Health, req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;

    fn target(base: &str) -> TargetConfig {
        TargetConfig {
            base_url: base.to_string(),
            token: Some(Credential::new("tok")),
            ..TargetConfig::default()
        }
    }

    #[test]
    fn builds_urls_from_base_and_paths() {
        let api = JobApi::new(
            ScriptedTransport::default(),
            &target("http://localhost:8080"),
            CallTimeouts::default(),
        )
        .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(api.create_url, "http://localhost:8080/api/v1/scan");
        assert_eq!(api.health_url, "http://localhost:8080/health");
        assert_eq!(
            api.status_url("abc123"),
            "http://localhost:8080/api/v1/scan/result/abc123"
        );
        assert_eq!(
            api.status_url("a/b c"),
            "http://localhost:8080/api/v1/scan/result/a%2Fb%20c"
        );
    }

    #[test]
    fn requires_credential() {
        let mut t = target("http://localhost");
        t.token = None;
        assert!(matches!(
            JobApi::new(ScriptedTransport::default(), &t, CallTimeouts::default()),
            Err(Error::MissingCredential)
        ));
    }

    #[tokio::test]
    async fn create_sends_payload_auth_and_idempotency_key() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_create(202, r#"{"job_id":"j1"}"#);

        let api = JobApi::new(
            transport.clone(),
            &target("http://localhost"),
            CallTimeouts::default(),
        )
        .unwrap_or_else(|e| panic!("{e}"));

        let outcome = api.create_job("key-1").await;
        assert_eq!(outcome.kind, CallKind::Create);
        assert_eq!(outcome.status(), Some(202));

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        let req = &sent[0];
        assert_eq!(req.method.as_str(), "POST");
        assert_eq!(req.header_value("authorization"), Some("Bearer tok"));
        assert_eq!(req.header_value("x-idempotency-key"), Some("key-1"));
        assert_eq!(req.timeout, Some(Duration::from_secs(30)));
        let body: serde_json::Value =
            serde_json::from_slice(&req.body).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(body["image_url"], crate::config::DEFAULT_IMAGE_URL);
    }
}
