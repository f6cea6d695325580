use hdrhistogram::Histogram;

use crate::MetricKind;

#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    metrics: Vec<MetricSnapshot>,
}

#[derive(Debug, Clone)]
pub struct MetricSnapshot {
    pub name: String,
    pub value: MetricValue,
}

impl MetricSnapshot {
    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }
}

#[derive(Debug, Clone)]
pub enum MetricValue {
    Counter(u64),
    Rate { hits: u64, total: u64 },
    Trend(TrendSnapshot),
    Gauge(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Rate { .. } => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
            Self::Gauge(_) => MetricKind::Gauge,
        }
    }
}

/// `hits / total`, or `0.0` when nothing was observed.
pub fn rate_of(hits: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

impl RegistrySnapshot {
    pub(crate) fn new(metrics: Vec<MetricSnapshot>) -> Self {
        Self { metrics }
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricSnapshot> {
        self.metrics.iter()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&MetricSnapshot> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn counter(&self, name: &str) -> Option<u64> {
        match self.get(name)?.value {
            MetricValue::Counter(v) => Some(v),
            _ => None,
        }
    }

    pub fn gauge(&self, name: &str) -> Option<i64> {
        match self.get(name)?.value {
            MetricValue::Gauge(v) => Some(v),
            _ => None,
        }
    }

    /// `(hits, total)` of a rate metric.
    pub fn rate_counts(&self, name: &str) -> Option<(u64, u64)> {
        match self.get(name)?.value {
            MetricValue::Rate { hits, total } => Some((hits, total)),
            _ => None,
        }
    }

    /// A rate with zero observations reads as `0.0`.
    pub fn rate(&self, name: &str) -> Option<f64> {
        self.rate_counts(name)
            .map(|(hits, total)| rate_of(hits, total))
    }

    pub fn trend(&self, name: &str) -> Option<&TrendSnapshot> {
        match &self.get(name)?.value {
            MetricValue::Trend(t) => Some(t),
            _ => None,
        }
    }
}

/// Frozen copy of a trend histogram. Values are reported in milliseconds; an
/// empty trend reports zero for every statistic.
#[derive(Debug, Clone)]
pub struct TrendSnapshot {
    hist: Histogram<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub med: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

const US_PER_MS: f64 = 1000.0;

impl TrendSnapshot {
    pub(crate) fn new(hist: Histogram<u64>) -> Self {
        Self { hist }
    }

    pub fn count(&self) -> u64 {
        self.hist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hist.is_empty()
    }

    pub fn min(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.hist.min() as f64 / US_PER_MS
    }

    pub fn max(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.hist.max() as f64 / US_PER_MS
    }

    pub fn mean(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.hist.mean() / US_PER_MS
    }

    /// `p` in `[0, 100]`; out-of-range values are clamped.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let q = (p / 100.0).clamp(0.0, 1.0);
        self.hist.value_at_quantile(q) as f64 / US_PER_MS
    }

    pub fn median(&self) -> f64 {
        self.percentile(50.0)
    }

    pub fn summary(&self) -> TrendSummary {
        TrendSummary {
            count: self.count(),
            min: self.min(),
            max: self.max(),
            avg: self.mean(),
            med: self.median(),
            p90: self.percentile(90.0),
            p95: self.percentile(95.0),
            p99: self.percentile(99.0),
        }
    }
}
