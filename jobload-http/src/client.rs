use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{Error, HttpRequest, HttpResponse, Result};

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// The OS-level TCP connect timeout can run for tens of seconds against an
    /// unreachable host; this surfaces failed connects promptly.
    pub connect_timeout: Option<Duration>,
    /// Applied when a request carries no timeout of its own.
    pub default_timeout: Duration,
    pub user_agent: String,
    pub pool_idle_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(3)),
            default_timeout: Duration::from_secs(30),
            user_agent: concat!("jobload/", env!("CARGO_PKG_VERSION")).to_string(),
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Shared keep-alive client. Cloning is cheap; clones share the pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    default_timeout: Duration,
    user_agent: http::HeaderValue,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(ClientOptions::default())
    }
}

impl HttpClient {
    #[must_use]
    pub fn new(opts: ClientOptions) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(opts.connect_timeout);
        http_connector.set_nodelay(true);

        let https_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let inner = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(opts.pool_idle_timeout)
            .build(https_connector);

        let user_agent = http::HeaderValue::from_str(&opts.user_agent)
            .unwrap_or_else(|_| http::HeaderValue::from_static("jobload"));

        Self {
            inner,
            default_timeout: opts.default_timeout,
            user_agent,
        }
    }

    /// Sends `req` and reads the full body. Connection failures, timeouts and
    /// body read failures all surface as `Err`; any HTTP status is `Ok`.
    pub async fn request(&self, req: HttpRequest) -> Result<HttpResponse> {
        let timeout = req.timeout.unwrap_or(self.default_timeout);
        match tokio::time::timeout(timeout, self.exchange(req)).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    async fn exchange(&self, req: HttpRequest) -> Result<HttpResponse> {
        let parsed = url::Url::parse(&req.url).map_err(|_| Error::InvalidUrl(req.url.clone()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(Error::UnsupportedScheme(req.url));
        }

        let uri: hyper::Uri = req
            .url
            .parse()
            .map_err(|_| Error::InvalidUrl(req.url.clone()))?;

        let mut builder = Request::builder().method(req.method).uri(uri);
        let mut has_user_agent = false;
        for (k, v) in &req.headers {
            let name = http::header::HeaderName::from_bytes(k.as_bytes())?;
            let value =
                http::HeaderValue::from_str(v).map_err(|_| Error::HeaderValue(k.clone()))?;
            has_user_agent |= name == http::header::USER_AGENT;
            builder = builder.header(name, value);
        }
        if !has_user_agent {
            builder = builder.header(http::header::USER_AGENT, self.user_agent.clone());
        }
        if !req.body.is_empty() {
            builder = builder.header(http::header::CONTENT_LENGTH, req.body.len());
        }

        let request: Request<Full<Bytes>> = builder.body(Full::new(req.body))?;
        let res = self.inner.request(request).await?;

        let (parts, body) = res.into_parts();
        let status = parts.status.as_u16();

        let mut merged: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in parts.headers.iter() {
            let v = String::from_utf8_lossy(value.as_bytes()).into_owned();
            merged
                .entry(name.as_str().to_ascii_lowercase())
                .and_modify(|cur| {
                    cur.push_str(", ");
                    cur.push_str(&v);
                })
                .or_insert(v);
        }

        let body = body.collect().await?.to_bytes();

        Ok(HttpResponse {
            status,
            headers: merged.into_iter().collect(),
            body,
        })
    }
}
