use std::time::Duration;

pub(crate) fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.0}")
    } else {
        "0".to_string()
    }
}

/// Renders a millisecond value with a unit that keeps it short (`850us`, `12.34ms`, `1.20s`).
pub(crate) fn format_ms(ms: f64) -> String {
    if !ms.is_finite() {
        return "-".to_string();
    }
    if ms >= 1_000.0 {
        format!("{:.2}s", ms / 1_000.0)
    } else if ms >= 1.0 {
        format!("{ms:.2}ms")
    } else {
        format!("{:.0}us", ms * 1_000.0)
    }
}

pub(crate) fn format_ms_opt(ms: Option<f64>) -> String {
    ms.map_or_else(|| "-".to_string(), format_ms)
}

pub(crate) fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ms", d.as_millis())
    }
}

pub(crate) fn format_percent(rate: Option<f64>) -> String {
    rate.map_or_else(|| "-".to_string(), |r| format!("{:.2}%", r * 100.0))
}
