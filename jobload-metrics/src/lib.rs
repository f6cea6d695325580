//! Concurrent metric aggregation for load runs.
//!
//! A [`Registry`] owns every metric of a run. Writers either go through the
//! by-name operations on the registry or hold a typed handle obtained at
//! registration time; both paths update the same storage without any
//! caller-visible locking. [`Registry::snapshot`] returns a point-in-time view
//! from which summaries and arbitrary percentiles can be derived.

mod error;
mod handle;
mod registry;
mod snapshot;

pub use error::{Error, Result};
pub use handle::{ActiveGaugeGuard, CounterHandle, GaugeHandle, RateHandle, TrendHandle};
pub use registry::{MetricKind, Registry};
pub use snapshot::{
    MetricSnapshot, MetricValue, RegistrySnapshot, TrendSnapshot, TrendSummary, rate_of,
};
