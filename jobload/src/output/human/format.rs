/// Milliseconds rendered with one unit: `us`, `ms` or `s`.
pub(crate) fn format_ms(ms: f64) -> String {
    if !ms.is_finite() || ms <= 0.0 {
        return "0ms".to_string();
    }
    if ms >= 1000.0 {
        return format!("{:.2}s", ms / 1000.0);
    }
    if ms >= 1.0 {
        return format!("{ms:.1}ms");
    }
    format!("{:.0}us", ms * 1000.0)
}

pub(crate) fn format_pct(rate: f64) -> String {
    if rate.is_finite() {
        format!("{:.2}%", rate * 100.0)
    } else {
        "0.00%".to_string()
    }
}

pub(crate) fn format_secs(secs: f64) -> String {
    if !secs.is_finite() || secs <= 0.0 {
        return "0s".to_string();
    }
    let whole = secs.round() as u64;
    let (h, m, s) = (whole / 3600, (whole % 3600) / 60, whole % 60);
    match (h, m) {
        (0, 0) => format!("{secs:.1}s"),
        (0, _) => format!("{m}m{s:02}s"),
        _ => format!("{h}h{m:02}m{s:02}s"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_ms_picks_a_single_unit() {
        assert_eq!(format_ms(0.0), "0ms");
        assert_eq!(format_ms(0.25), "250us");
        assert_eq!(format_ms(12.34), "12.3ms");
        assert_eq!(format_ms(2500.0), "2.50s");
        assert_eq!(format_ms(f64::NAN), "0ms");
    }

    #[test]
    fn format_pct_and_secs() {
        assert_eq!(format_pct(0.9512), "95.12%");
        assert_eq!(format_secs(4.26), "4.3s");
        assert_eq!(format_secs(150.0), "2m30s");
        assert_eq!(format_secs(3725.0), "1h02m05s");
    }
}
