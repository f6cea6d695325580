use crate::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("metric `{name}` is already registered as {kind}")]
    AlreadyRegistered { name: String, kind: MetricKind },

    #[error("unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("metric `{name}` is a {actual}, not a {expected}")]
    KindMismatch {
        name: String,
        expected: MetricKind,
        actual: MetricKind,
    },

    #[error("invalid trend sample {value} for `{name}`")]
    InvalidSample { name: String, value: f64 },
}
