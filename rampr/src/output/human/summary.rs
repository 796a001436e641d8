use std::fmt::Write as _;

use rampr_core::metrics::Statistics;
use rampr_core::{RuleStatus, RunReport};

use super::format::*;

pub(crate) fn render(report: &RunReport) -> String {
    let mut out = String::new();

    out.push_str("summary\n");
    writeln!(
        &mut out,
        "  duration: {} (stop: {}) peak_vus: {}",
        format_duration(report.duration),
        report.stop_reason,
        report.peak_vus
    )
    .ok();
    out.push('\n');

    out.push_str("metrics\n");
    let width = report
        .verdict
        .per_metric
        .keys()
        .map(String::len)
        .max()
        .unwrap_or(0);
    for (name, stats) in &report.verdict.per_metric {
        writeln!(&mut out, "  {name:<width$}  {}", render_stats(stats)).ok();
    }

    if !report.errors.is_empty() {
        out.push_str("\nerrors\n");
        let mut errors: Vec<_> = report.errors.iter().collect();
        errors.sort_by(|(a_msg, a_count), (b_msg, b_count)| {
            b_count.cmp(a_count).then_with(|| a_msg.cmp(b_msg))
        });
        for (msg, count) in errors {
            writeln!(&mut out, "  {msg}: {count}").ok();
        }
    }

    if !report.verdict.per_rule.is_empty() {
        out.push_str("\nthresholds\n");
        for (id, rule) in &report.verdict.per_rule {
            let mark = match rule.status {
                RuleStatus::Pass => "ok  ",
                RuleStatus::Fail => "FAIL",
                RuleStatus::Undetermined => "??  ",
            };
            let observed = rule
                .observed
                .map_or_else(|| "no data".to_string(), |v| format!("observed {v:.4}"));
            writeln!(&mut out, "  {mark} {id} ({observed})").ok();
        }
    }

    writeln!(
        &mut out,
        "\nverdict: {}",
        report.verdict.overall.to_string().to_ascii_uppercase()
    )
    .ok();
    out
}

fn render_stats(stats: &Statistics) -> String {
    match stats {
        Statistics::Trend(t) => {
            let mut line = format!(
                "avg={} min={} med={} max={}",
                format_ms_opt(t.avg),
                format_ms_opt(t.min),
                format_ms_opt(t.med),
                format_ms_opt(t.max)
            );
            for (p, v) in &t.percentiles {
                write!(&mut line, " {p}={}", format_ms(*v)).ok();
            }
            write!(&mut line, " (n={})", t.count).ok();
            line
        }
        Statistics::Rate(r) => format!(
            "{} ({}/{})",
            format_percent(r.rate()),
            r.passes,
            r.total
        ),
        Statistics::Counter(c) => match c.per_second {
            Some(rate) => format!("{} ({}/s)", c.count, format_rate(rate)),
            None => c.count.to_string(),
        },
    }
}
