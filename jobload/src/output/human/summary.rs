use std::fmt::Write as _;

use jobload_core::report::{ReportMetric, RunReport};

use super::format::*;

pub(crate) fn render(report: &RunReport) -> String {
    let mut out = String::new();

    out.push_str("summary\n");
    writeln!(
        out,
        "  duration: {}{}",
        format_secs(report.duration_secs),
        if report.aborted { " (aborted)" } else { "" }
    )
    .ok();
    writeln!(
        out,
        "  vus: spawned={} retired={} forced_stops={} peak={}",
        report.vus.spawned, report.vus.retired, report.vus.forced_stops, report.vus.peak_active
    )
    .ok();

    let width = report.metrics.keys().map(String::len).max().unwrap_or(0);

    let mut counters = String::new();
    let mut rates = String::new();
    let mut trends = String::new();
    let mut gauges = String::new();

    for (name, metric) in &report.metrics {
        match metric {
            ReportMetric::Counter { count } => {
                writeln!(counters, "  {name:<width$}  {count}").ok();
            }
            ReportMetric::Rate {
                rate,
                passes,
                fails,
            } => {
                writeln!(
                    rates,
                    "  {name:<width$}  {} ✓ {passes} ✗ {fails}",
                    format_pct(*rate)
                )
                .ok();
            }
            ReportMetric::Trend {
                count,
                min,
                max,
                avg,
                med,
                p90,
                p95,
                p99,
            } => {
                writeln!(
                    trends,
                    "  {name:<width$}  avg={} min={} med={} max={} p(90)={} p(95)={} p(99)={} (n={count})",
                    format_ms(*avg),
                    format_ms(*min),
                    format_ms(*med),
                    format_ms(*max),
                    format_ms(*p90),
                    format_ms(*p95),
                    format_ms(*p99),
                )
                .ok();
            }
            ReportMetric::Gauge { value } => {
                writeln!(gauges, "  {name:<width$}  {value}").ok();
            }
        }
    }

    for (title, body) in [
        ("counters", counters),
        ("rates", rates),
        ("trends", trends),
        ("gauges", gauges),
    ] {
        if !body.is_empty() {
            writeln!(out, "\n{title}").ok();
            out.push_str(&body);
        }
    }

    if !report.stages.is_empty() {
        out.push_str("\nstages\n");
        for (name, count) in &report.stages {
            writeln!(out, "  {name:<width$}  {count}").ok();
        }
    }

    if !report.thresholds.is_empty() {
        out.push_str("\nthresholds\n");
        for t in &report.thresholds {
            let mark = if t.passed { "✓" } else { "✗" };
            let observed = t.observed.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"));
            writeln!(
                out,
                "  {mark} {}: {} (observed {observed})",
                t.metric, t.expression
            )
            .ok();
        }
    }

    writeln!(
        out,
        "\nresult: {}",
        if report.passed { "passed" } else { "failed" }
    )
    .ok();

    out
}
