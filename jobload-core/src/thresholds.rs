use jobload_metrics::{MetricValue, RegistrySnapshot, rate_of};

use crate::{Error, Result};

/// Expressions attached to one metric, as configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdSet {
    pub metric: String,
    pub expressions: Vec<String>,
}

impl ThresholdSet {
    pub fn new<I, S>(metric: impl Into<String>, expressions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            metric: metric.into(),
            expressions: expressions.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    Value,
    P(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

/// One parsed expression bound to its metric.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRule {
    pub metric: String,
    pub expression: String,
    pub expr: ThresholdExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdVerdict {
    pub metric: String,
    pub expression: String,
    /// `None` when the metric is missing or cannot be aggregated this way.
    pub observed: Option<f64>,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ThresholdReport {
    pub verdicts: Vec<ThresholdVerdict>,
}

impl ThresholdReport {
    pub fn passed(&self) -> bool {
        self.verdicts.iter().all(|v| v.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ThresholdVerdict> {
        self.verdicts.iter().filter(|v| !v.passed)
    }
}

pub fn parse_threshold_expr(raw: &str) -> std::result::Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("invalid threshold (missing operator): {raw}"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(format!("invalid threshold: {raw}"));
    }

    let agg = match left.to_ascii_lowercase().as_str() {
        "avg" => ThresholdAgg::Avg,
        "min" => ThresholdAgg::Min,
        "max" => ThresholdAgg::Max,
        "med" => ThresholdAgg::Med,
        "count" => ThresholdAgg::Count,
        "rate" => ThresholdAgg::Rate,
        "value" => ThresholdAgg::Value,
        other => {
            let inner = other
                .strip_prefix("p(")
                .and_then(|v| v.strip_suffix(')'))
                .ok_or_else(|| format!("unknown aggregation `{left}` in threshold: {raw}"))?;
            let p: f64 = inner
                .parse()
                .map_err(|_| format!("invalid percentile in threshold: {raw}"))?;
            if !(p > 0.0 && p <= 100.0) {
                return Err(format!("percentile out of range in threshold: {raw}"));
            }
            ThresholdAgg::P(p)
        }
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value in threshold: {raw}"))?;
    if !value.is_finite() {
        return Err(format!("invalid numeric value in threshold: {raw}"));
    }

    Ok(ThresholdExpr { agg, op, value })
}

pub fn compile_thresholds(sets: &[ThresholdSet]) -> Result<Vec<ThresholdRule>> {
    let mut rules = Vec::new();
    for set in sets {
        for raw in &set.expressions {
            let expr = parse_threshold_expr(raw).map_err(|error| Error::InvalidThreshold {
                metric: set.metric.clone(),
                error,
            })?;
            rules.push(ThresholdRule {
                metric: set.metric.clone(),
                expression: raw.clone(),
                expr,
            });
        }
    }
    Ok(rules)
}

/// Judges every rule against `snapshot`. A failing rule never prevents the
/// remaining rules from being evaluated.
pub fn evaluate_thresholds(snapshot: &RegistrySnapshot, rules: &[ThresholdRule]) -> ThresholdReport {
    let verdicts = rules
        .iter()
        .map(|rule| {
            let observed = snapshot
                .get(&rule.metric)
                .and_then(|m| observed_value(&m.value, rule.expr.agg));
            ThresholdVerdict {
                metric: rule.metric.clone(),
                expression: rule.expression.clone(),
                observed,
                passed: observed.is_some_and(|v| compare(v, rule.expr.op, rule.expr.value)),
            }
        })
        .collect();

    ThresholdReport { verdicts }
}

fn observed_value(value: &MetricValue, agg: ThresholdAgg) -> Option<f64> {
    match (value, agg) {
        (MetricValue::Counter(n), ThresholdAgg::Count | ThresholdAgg::Value) => Some(*n as f64),

        (MetricValue::Gauge(v), ThresholdAgg::Value | ThresholdAgg::Min | ThresholdAgg::Max) => {
            Some(*v as f64)
        }

        (MetricValue::Rate { hits, total }, ThresholdAgg::Rate) => Some(rate_of(*hits, *total)),
        (MetricValue::Rate { total, .. }, ThresholdAgg::Count) => Some(*total as f64),

        (MetricValue::Trend(t), agg) => match agg {
            ThresholdAgg::Avg => Some(t.mean()),
            ThresholdAgg::Min => Some(t.min()),
            ThresholdAgg::Max => Some(t.max()),
            ThresholdAgg::Med => Some(t.median()),
            ThresholdAgg::Count => Some(t.count() as f64),
            ThresholdAgg::P(p) => Some(t.percentile(p)),
            ThresholdAgg::Rate | ThresholdAgg::Value => None,
        },

        _ => None,
    }
}

fn compare(observed: f64, op: ThresholdOp, expected: f64) -> bool {
    match op {
        ThresholdOp::Lt => observed < expected,
        ThresholdOp::Lte => observed <= expected,
        ThresholdOp::Gt => observed > expected,
        ThresholdOp::Gte => observed >= expected,
        ThresholdOp::Eq => observed == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobload_metrics::Registry;

    fn rules(sets: &[ThresholdSet]) -> Vec<ThresholdRule> {
        compile_thresholds(sets).unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn parse_threshold_expr_trims_whitespace() {
        let expr = parse_threshold_expr("  avg  <=  123  ").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(expr.agg, ThresholdAgg::Avg);
        assert_eq!(expr.op, ThresholdOp::Lte);
        assert_eq!(expr.value, 123.0);
    }

    #[test]
    fn parse_threshold_expr_accepts_fractional_percentiles() {
        let expr = parse_threshold_expr("p(99.9)<250").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(expr.agg, ThresholdAgg::P(99.9));
        assert_eq!(expr.op, ThresholdOp::Lt);
    }

    #[test]
    fn parse_threshold_expr_rejects_garbage() {
        for raw in ["", "p(101)<1", "p(0)<1", "avg", "avg<", "<5", "mode<3", "rate>abc"] {
            assert!(parse_threshold_expr(raw).is_err(), "`{raw}` should not parse");
        }
    }

    #[test]
    fn compile_reports_offending_metric() {
        let err = compile_thresholds(&[ThresholdSet::new("lat", ["p(95)<1", "bogus"])]);
        match err {
            Err(Error::InvalidThreshold { metric, .. }) => assert_eq!(metric, "lat"),
            other => panic!("expected InvalidThreshold, got {other:?}"),
        }
    }

    #[test]
    fn failing_rate_rule_leaves_other_verdicts_untouched() {
        let registry = Registry::new();
        let scan = registry
            .register_rate("scan_success_rate")
            .unwrap_or_else(|e| panic!("{e}"));
        let lat = registry
            .register_trend("scan_latency_ms")
            .unwrap_or_else(|e| panic!("{e}"));
        for i in 0..100 {
            scan.observe(i < 80);
            lat.observe(100.0).unwrap_or_else(|e| panic!("{e}"));
        }

        let report = evaluate_thresholds(
            &registry.snapshot(),
            &rules(&[
                ThresholdSet::new("scan_success_rate", ["rate>0.95", "rate>0.5"]),
                ThresholdSet::new("scan_latency_ms", ["p(95)<2000"]),
            ]),
        );

        assert_eq!(report.verdicts.len(), 3);
        assert!(!report.verdicts[0].passed);
        assert_eq!(report.verdicts[0].observed, Some(0.8));
        assert!(report.verdicts[1].passed);
        assert!(report.verdicts[2].passed);
        assert!(!report.passed());
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn missing_metric_and_unsupported_aggregation_fail_without_value() {
        let registry = Registry::new();
        registry
            .register_counter("jobs_total")
            .unwrap_or_else(|e| panic!("{e}"));

        let report = evaluate_thresholds(
            &registry.snapshot(),
            &rules(&[
                ThresholdSet::new("nope", ["count>0"]),
                ThresholdSet::new("jobs_total", ["p(95)<1", "count==0"]),
            ]),
        );

        assert_eq!(report.verdicts[0].observed, None);
        assert!(!report.verdicts[0].passed);
        assert_eq!(report.verdicts[1].observed, None);
        assert!(!report.verdicts[1].passed);
        assert!(report.verdicts[2].passed);
    }

    #[test]
    fn empty_rate_reads_as_zero() {
        let registry = Registry::new();
        registry
            .register_rate("r")
            .unwrap_or_else(|e| panic!("{e}"));

        let report = evaluate_thresholds(
            &registry.snapshot(),
            &rules(&[ThresholdSet::new("r", ["rate>0.5", "rate<0.5"])]),
        );
        assert_eq!(report.verdicts[0].observed, Some(0.0));
        assert!(!report.verdicts[0].passed);
        assert!(report.verdicts[1].passed);
    }
}
