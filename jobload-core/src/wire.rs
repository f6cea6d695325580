//! Response schemas of the job API, validated once at the boundary.

use jobload_http::HttpResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct CreateJobRequest<'a> {
    pub image_url: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateJobResponse {
    pub job_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Only `status` is required. The reward payload is kept as raw JSON so an
/// unexpected shape never changes how the job is classified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    #[serde(default)]
    pub reward: Option<Value>,
}

impl JobStatusResponse {
    /// A reward counts only when it is an object with a non-empty string name.
    pub fn reward_name(&self) -> Option<&str> {
        self.reward
            .as_ref()
            .and_then(|r| r.get("name"))
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),

    #[error("malformed body: {0}")]
    MalformedBody(String),

    #[error("response has no job id")]
    MissingJobId,
}

/// Accepts `200` (immediate) and `202` (queued) with a `job_id`.
///
/// The id is opaque: a non-blank string or an integer. Anything else
/// (null, blank, floats, objects, arrays) counts as missing.
pub fn parse_created(res: &HttpResponse) -> Result<CreateJobResponse, ProtocolError> {
    if res.status != 200 && res.status != 202 {
        return Err(ProtocolError::UnexpectedStatus(res.status));
    }
    #[derive(Deserialize)]
    struct Raw {
        #[serde(default)]
        job_id: Option<Value>,
    }

    let raw: Raw = serde_json::from_slice(&res.body)
        .map_err(|e| ProtocolError::MalformedBody(e.to_string()))?;
    let job_id = match raw.job_id {
        Some(Value::String(id)) if !id.trim().is_empty() => id,
        Some(Value::Number(n)) if n.is_u64() || n.is_i64() => n.to_string(),
        _ => return Err(ProtocolError::MissingJobId),
    };
    Ok(CreateJobResponse { job_id })
}

/// Parses a `200` status body. Other statuses are the caller's concern.
pub fn parse_status(res: &HttpResponse) -> Result<JobStatusResponse, ProtocolError> {
    if res.status != 200 {
        return Err(ProtocolError::UnexpectedStatus(res.status));
    }
    serde_json::from_slice(&res.body).map_err(|e| ProtocolError::MalformedBody(e.to_string()))
}
