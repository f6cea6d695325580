pub type Result<T> = std::result::Result<T, Error>;

/// Errors that stop a run before any virtual user starts.
///
/// Failures inside an iteration are never surfaced as `Error`; they are
/// recorded as metric observations instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing bearer credential (set TOKEN)")]
    MissingCredential,

    #[error("invalid base url `{url}`: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid ramp: {0}")]
    InvalidRamp(String),

    #[error("invalid poll settings: {0}")]
    InvalidPoll(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid threshold expression for metric `{metric}`: {error}")]
    InvalidThreshold { metric: String, error: String },

    #[error(transparent)]
    Metrics(#[from] jobload_metrics::Error),
}
