use std::sync::Arc;
use std::thread;

use jobload_metrics::{MetricKind, Registry};

const WRITERS: usize = 8;
const OPS_PER_WRITER: u64 = 5_000;

#[test]
fn concurrent_writers_lose_no_observations() {
    let registry = Arc::new(Registry::new());
    let requests = registry
        .register_counter("requests_total")
        .unwrap_or_else(|e| panic!("{e}"));
    registry
        .register("ok_rate", MetricKind::Rate)
        .unwrap_or_else(|e| panic!("{e}"));
    registry
        .register("latency_ms", MetricKind::Trend)
        .unwrap_or_else(|e| panic!("{e}"));
    let in_flight = registry
        .register_gauge("in_flight")
        .unwrap_or_else(|e| panic!("{e}"));

    thread::scope(|s| {
        for w in 0..WRITERS {
            let registry = registry.clone();
            let requests = requests.clone();
            let in_flight = in_flight.clone();
            s.spawn(move || {
                for i in 0..OPS_PER_WRITER {
                    let _guard = in_flight.enter();
                    requests.incr();
                    registry
                        .increment_counter("requests_total", 1)
                        .unwrap_or_else(|e| panic!("{e}"));
                    registry
                        .observe_rate("ok_rate", i % 4 != 0)
                        .unwrap_or_else(|e| panic!("{e}"));
                    registry
                        .observe_trend("latency_ms", (w as u64 * 10 + i % 10) as f64)
                        .unwrap_or_else(|e| panic!("{e}"));
                }
            });
        }
    });

    let total = WRITERS as u64 * OPS_PER_WRITER;
    let snap = registry.snapshot();

    assert_eq!(snap.counter("requests_total"), Some(2 * total));
    assert_eq!(snap.rate_counts("ok_rate"), Some((total * 3 / 4, total)));
    assert_eq!(snap.rate("ok_rate"), Some(0.75));
    assert_eq!(snap.trend("latency_ms").map(|t| t.count()), Some(total));
    assert_eq!(snap.gauge("in_flight"), Some(0));
}

#[test]
fn independent_registries_do_not_share_state() {
    let a = Registry::new();
    let b = Registry::new();
    let ca = a.register_counter("n").unwrap_or_else(|e| panic!("{e}"));
    let cb = b.register_counter("n").unwrap_or_else(|e| panic!("{e}"));

    ca.increment(3);
    cb.increment(1);

    assert_eq!(a.snapshot().counter("n"), Some(3));
    assert_eq!(b.snapshot().counter("n"), Some(1));
}
