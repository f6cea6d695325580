use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::handle::MetricStorage;
use crate::snapshot::{MetricSnapshot, MetricValue, RegistrySnapshot, TrendSnapshot};
use crate::{CounterHandle, Error, GaugeHandle, RateHandle, Result, TrendHandle};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Rate,
    Trend,
    Gauge,
}

/// Owner of all metric state for one run.
///
/// Every name is registered exactly once; registering it again fails, as does
/// writing to a name that was never registered or through the wrong kind.
#[derive(Debug, Default)]
pub struct Registry {
    metrics: DashMap<Arc<str>, MetricStorage>,
    order: RwLock<Vec<Arc<str>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, kind: MetricKind) -> Result<()> {
        self.insert(name, kind).map(|_| ())
    }

    pub fn register_counter(&self, name: &str) -> Result<CounterHandle> {
        match self.insert(name, MetricKind::Counter)? {
            MetricStorage::Counter(c) => Ok(CounterHandle(c)),
            other => Err(mismatch(name, MetricKind::Counter, &other)),
        }
    }

    pub fn register_rate(&self, name: &str) -> Result<RateHandle> {
        match self.insert(name, MetricKind::Rate)? {
            MetricStorage::Rate(r) => Ok(RateHandle(r)),
            other => Err(mismatch(name, MetricKind::Rate, &other)),
        }
    }

    pub fn register_trend(&self, name: &str) -> Result<TrendHandle> {
        match self.insert(name, MetricKind::Trend)? {
            MetricStorage::Trend(hist) => Ok(TrendHandle {
                name: Arc::from(name),
                hist,
            }),
            other => Err(mismatch(name, MetricKind::Trend, &other)),
        }
    }

    pub fn register_gauge(&self, name: &str) -> Result<GaugeHandle> {
        match self.insert(name, MetricKind::Gauge)? {
            MetricStorage::Gauge(g) => Ok(GaugeHandle(g)),
            other => Err(mismatch(name, MetricKind::Gauge, &other)),
        }
    }

    fn insert(&self, name: &str, kind: MetricKind) -> Result<MetricStorage> {
        let key: Arc<str> = Arc::from(name);
        let storage = match self.metrics.entry(key.clone()) {
            Entry::Occupied(existing) => {
                return Err(Error::AlreadyRegistered {
                    name: name.to_string(),
                    kind: existing.get().kind(),
                });
            }
            Entry::Vacant(slot) => slot.insert(MetricStorage::new(kind)).clone(),
        };
        // The shard lock is released before touching `order`; snapshot takes
        // them in the opposite order.
        self.order.write().push(key);
        Ok(storage)
    }

    fn lookup(&self, name: &str) -> Result<MetricStorage> {
        self.metrics
            .get(name)
            .map(|s| s.value().clone())
            .ok_or_else(|| Error::UnknownMetric(name.to_string()))
    }

    pub fn counter(&self, name: &str) -> Result<CounterHandle> {
        match self.lookup(name)? {
            MetricStorage::Counter(c) => Ok(CounterHandle(c)),
            other => Err(mismatch(name, MetricKind::Counter, &other)),
        }
    }

    pub fn increment_counter(&self, name: &str, amount: u64) -> Result<()> {
        self.counter(name)?.increment(amount);
        Ok(())
    }

    pub fn observe_rate(&self, name: &str, value: bool) -> Result<()> {
        match self.lookup(name)? {
            MetricStorage::Rate(r) => {
                RateHandle(r).observe(value);
                Ok(())
            }
            other => Err(mismatch(name, MetricKind::Rate, &other)),
        }
    }

    pub fn observe_trend(&self, name: &str, ms: f64) -> Result<()> {
        match self.lookup(name)? {
            MetricStorage::Trend(hist) => TrendHandle {
                name: Arc::from(name),
                hist,
            }
            .observe(ms),
            other => Err(mismatch(name, MetricKind::Trend, &other)),
        }
    }

    pub fn set_gauge(&self, name: &str, value: i64) -> Result<()> {
        self.gauge(name)?.set(value);
        Ok(())
    }

    pub fn adjust_gauge(&self, name: &str, delta: i64) -> Result<()> {
        self.gauge(name)?.adjust(delta);
        Ok(())
    }

    fn gauge(&self, name: &str) -> Result<GaugeHandle> {
        match self.lookup(name)? {
            MetricStorage::Gauge(g) => Ok(GaugeHandle(g)),
            other => Err(mismatch(name, MetricKind::Gauge, &other)),
        }
    }

    /// Point-in-time view of every registered metric, in registration order.
    ///
    /// Each metric is read atomically on its own; metrics written while the
    /// snapshot is being taken may reflect slightly different instants.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let names = self.order.read().clone();

        let metrics = names
            .into_iter()
            .filter_map(|name| {
                let storage = self.metrics.get(&name)?.value().clone();
                let value = match storage {
                    MetricStorage::Counter(c) => MetricValue::Counter(c.load(Ordering::Relaxed)),
                    MetricStorage::Gauge(g) => MetricValue::Gauge(g.load(Ordering::Relaxed)),
                    MetricStorage::Rate(r) => {
                        let (hits, total) = r.load();
                        MetricValue::Rate { hits, total }
                    }
                    MetricStorage::Trend(h) => {
                        MetricValue::Trend(TrendSnapshot::new(h.lock().clone()))
                    }
                };
                Some(MetricSnapshot {
                    name: name.to_string(),
                    value,
                })
            })
            .collect();

        RegistrySnapshot::new(metrics)
    }
}

fn mismatch(name: &str, expected: MetricKind, actual: &MetricStorage) -> Error {
    Error::KindMismatch {
        name: name.to_string(),
        expected,
        actual: actual.kind(),
    }
}
