use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use crate::{Error, MetricKind, Result};

/// Upper bound: 1 hour in microseconds.
const TREND_MAX_US: u64 = 3_600_000_000;

/// Three significant figures: any recorded sample is reproduced within 0.1%.
const TREND_SIGFIG: u8 = 3;

pub(crate) fn new_trend_histogram() -> Histogram<u64> {
    match Histogram::<u64>::new_with_bounds(1, TREND_MAX_US, TREND_SIGFIG) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

fn ms_to_us(ms: f64) -> Option<u64> {
    if !ms.is_finite() || ms < 0.0 {
        return None;
    }
    // Float to int `as` saturates.
    Some((ms * 1000.0).round() as u64)
}

#[derive(Debug, Default)]
pub(crate) struct RateCell {
    total: AtomicU64,
    hits: AtomicU64,
}

impl RateCell {
    // `total` is bumped before `hits` and read after it, so a concurrent reader
    // never observes more hits than observations.
    fn observe(&self, value: bool) {
        self.total.fetch_add(1, Ordering::SeqCst);
        if value {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn load(&self) -> (u64, u64) {
        let hits = self.hits.load(Ordering::SeqCst);
        let total = self.total.load(Ordering::SeqCst);
        (hits, total)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum MetricStorage {
    Counter(Arc<AtomicU64>),
    Rate(Arc<RateCell>),
    Trend(Arc<Mutex<Histogram<u64>>>),
    Gauge(Arc<AtomicI64>),
}

impl MetricStorage {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(Arc::new(AtomicU64::new(0))),
            MetricKind::Rate => Self::Rate(Arc::new(RateCell::default())),
            MetricKind::Trend => Self::Trend(Arc::new(Mutex::new(new_trend_histogram()))),
            MetricKind::Gauge => Self::Gauge(Arc::new(AtomicI64::new(0))),
        }
    }

    pub(crate) fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Rate(_) => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
            Self::Gauge(_) => MetricKind::Gauge,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CounterHandle(pub(crate) Arc<AtomicU64>);

impl CounterHandle {
    #[inline]
    pub fn increment(&self, amount: u64) {
        self.0.fetch_add(amount, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr(&self) {
        self.increment(1);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct RateHandle(pub(crate) Arc<RateCell>);

impl RateHandle {
    #[inline]
    pub fn observe(&self, value: bool) {
        self.0.observe(value);
    }

    /// `(hits, total)`.
    pub fn get(&self) -> (u64, u64) {
        self.0.load()
    }
}

/// Latency samples in milliseconds.
#[derive(Debug, Clone)]
pub struct TrendHandle {
    pub(crate) name: Arc<str>,
    pub(crate) hist: Arc<Mutex<Histogram<u64>>>,
}

impl TrendHandle {
    /// Rejects negative and non-finite samples. Samples above one hour are
    /// clamped to the histogram ceiling.
    pub fn observe(&self, ms: f64) -> Result<()> {
        let us = ms_to_us(ms).ok_or_else(|| Error::InvalidSample {
            name: self.name.to_string(),
            value: ms,
        })?;
        self.hist.lock().saturating_record(us);
        Ok(())
    }

    #[inline]
    pub fn observe_duration(&self, d: Duration) {
        let us = u64::try_from(d.as_micros()).unwrap_or(u64::MAX);
        self.hist.lock().saturating_record(us);
    }

    pub fn count(&self) -> u64 {
        self.hist.lock().len()
    }

    /// Live percentile in milliseconds without cloning the histogram; 0 when
    /// empty.
    pub fn percentile(&self, p: f64) -> f64 {
        let hist = self.hist.lock();
        if hist.is_empty() {
            return 0.0;
        }
        let q = (p / 100.0).clamp(0.0, 1.0);
        hist.value_at_quantile(q) as f64 / 1000.0
    }
}

#[derive(Debug, Clone)]
pub struct GaugeHandle(pub(crate) Arc<AtomicI64>);

impl GaugeHandle {
    #[inline]
    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn adjust(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    /// Raises the gauge to `value` if it is currently lower.
    #[inline]
    pub fn raise_to(&self, value: i64) {
        self.0.fetch_max(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Increments now and decrements when the guard is dropped, including
    /// when the owning future is cancelled.
    pub fn enter(&self) -> ActiveGaugeGuard {
        let now = self.0.fetch_add(1, Ordering::Relaxed) + 1;
        ActiveGaugeGuard {
            gauge: self.clone(),
            level: now,
        }
    }
}

#[derive(Debug)]
pub struct ActiveGaugeGuard {
    gauge: GaugeHandle,
    level: i64,
}

impl ActiveGaugeGuard {
    /// Gauge value right after this guard entered.
    pub fn level(&self) -> i64 {
        self.level
    }
}

impl Drop for ActiveGaugeGuard {
    fn drop(&mut self) {
        self.gauge.adjust(-1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trend_rejects_negative_and_nan() {
        let t = TrendHandle {
            name: Arc::from("lat"),
            hist: Arc::new(Mutex::new(new_trend_histogram())),
        };
        assert!(t.observe(-1.0).is_err());
        assert!(t.observe(f64::NAN).is_err());
        assert!(t.observe(f64::INFINITY).is_err());
        assert_eq!(t.count(), 0);

        t.observe(0.0).unwrap_or_else(|e| panic!("{e}"));
        t.observe(12.5).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(t.count(), 2);
    }

    #[test]
    fn trend_clamps_samples_above_ceiling() {
        let t = TrendHandle {
            name: Arc::from("lat"),
            hist: Arc::new(Mutex::new(new_trend_histogram())),
        };
        t.observe(10.0 * 3_600_000.0)
            .unwrap_or_else(|e| panic!("{e}"));
        t.observe_duration(Duration::from_secs(7200));
        assert_eq!(t.count(), 2);
    }

    #[test]
    fn trend_live_percentile_reads_milliseconds() {
        let t = TrendHandle {
            name: Arc::from("lat"),
            hist: Arc::new(Mutex::new(new_trend_histogram())),
        };
        assert_eq!(t.percentile(95.0), 0.0);
        for ms in 1..=100 {
            t.observe(f64::from(ms)).unwrap_or_else(|e| panic!("{e}"));
        }
        let p95 = t.percentile(95.0);
        assert!((p95 - 95.0).abs() <= 0.1, "p95={p95}");
    }

    #[test]
    fn gauge_guard_restores_level_on_drop() {
        let g = GaugeHandle(Arc::new(AtomicI64::new(0)));
        {
            let a = g.enter();
            let b = g.enter();
            assert_eq!(a.level(), 1);
            assert_eq!(b.level(), 2);
            assert_eq!(g.get(), 2);
        }
        assert_eq!(g.get(), 0);
    }

    #[test]
    fn gauge_raise_to_keeps_peak() {
        let g = GaugeHandle(Arc::new(AtomicI64::new(0)));
        g.raise_to(5);
        g.raise_to(3);
        assert_eq!(g.get(), 5);
        g.set(1);
        g.adjust(-3);
        assert_eq!(g.get(), -2);
    }

    #[test]
    fn rate_counts_hits_and_total() {
        let r = RateHandle(Arc::new(RateCell::default()));
        r.observe(true);
        r.observe(false);
        r.observe(true);
        assert_eq!(r.get(), (2, 3));
    }
}
