use anyhow::Context as _;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use rampr_core::metrics::Statistics;

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _config_path: &Path, _plan: &rampr_core::RunPlan) {}

    fn progress(&self) -> Option<rampr_core::ProgressFn> {
        Some(Arc::new(move |u| {
            let mut stdout = std::io::stdout().lock();
            if let Err(err) = write_json_line(&mut stdout, &build_progress_line(&u)) {
                tracing::debug!(error = %err, "dropped progress line");
            }
        }))
    }

    fn print_summary(&self, report: &rampr_core::RunReport) -> anyhow::Result<()> {
        let mut stdout = std::io::stdout().lock();
        write_json_line(&mut stdout, &build_summary_line(report))
            .context("failed to write summary")
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub phase: String,
    pub elapsed_secs: f64,
    pub total_secs: f64,
    pub stage: usize,
    pub stages: usize,
    pub target_vus: u64,
    pub live_vus: u64,
    pub iterations_total: u64,
    pub failed_total: u64,
    pub iterations_per_sec: f64,
}

fn build_progress_line(u: &rampr_core::ProgressUpdate) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        phase: u.phase.to_string(),
        elapsed_secs: u.elapsed.as_secs_f64(),
        total_secs: u.total_duration.as_secs_f64(),
        stage: u.stage.stage,
        stages: u.stage.stages,
        target_vus: u.stage.current_target,
        live_vus: u.live_vus,
        iterations_total: u.iterations_total,
        failed_total: u.failed_total,
        iterations_per_sec: finite_or_zero(u.iterations_per_sec_now),
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub verdict: String,
    pub stop_reason: String,
    pub duration_secs: f64,
    pub iterations: u64,
    pub peak_vus: u64,
    pub thresholds: BTreeMap<String, JsonRuleResult>,
    pub metrics: BTreeMap<String, JsonMetric>,
    pub errors: BTreeMap<String, u64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonRuleResult {
    pub metric: String,
    pub expression: String,
    pub status: String,
    pub observed: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum JsonMetric {
    Trend {
        count: u64,
        avg: Option<f64>,
        min: Option<f64>,
        max: Option<f64>,
        med: Option<f64>,
        percentiles: BTreeMap<String, f64>,
    },
    Rate {
        total: u64,
        passes: u64,
        rate: Option<f64>,
    },
    Counter {
        count: u64,
        per_second: Option<f64>,
    },
}

impl From<&Statistics> for JsonMetric {
    fn from(stats: &Statistics) -> Self {
        match stats {
            Statistics::Trend(t) => Self::Trend {
                count: t.count,
                avg: t.avg,
                min: t.min,
                max: t.max,
                med: t.med,
                percentiles: t
                    .percentiles
                    .iter()
                    .map(|(p, v)| (p.to_string(), *v))
                    .collect(),
            },
            Statistics::Rate(r) => Self::Rate {
                total: r.total,
                passes: r.passes,
                rate: r.rate(),
            },
            Statistics::Counter(c) => Self::Counter {
                count: c.count,
                per_second: c.per_second,
            },
        }
    }
}

fn build_summary_line(report: &rampr_core::RunReport) -> JsonSummaryLine {
    JsonSummaryLine {
        kind: "summary",
        verdict: report.verdict.overall.to_string(),
        stop_reason: report.stop_reason.to_string(),
        duration_secs: report.duration.as_secs_f64(),
        iterations: report.iterations,
        peak_vus: report.peak_vus,
        thresholds: report
            .verdict
            .per_rule
            .iter()
            .map(|(id, r)| {
                (
                    id.clone(),
                    JsonRuleResult {
                        metric: r.metric.clone(),
                        expression: r.expression.clone(),
                        status: r.status.to_string(),
                        observed: r.observed,
                    },
                )
            })
            .collect(),
        metrics: report
            .verdict
            .per_metric
            .iter()
            .map(|(name, stats)| (name.clone(), JsonMetric::from(stats)))
            .collect(),
        errors: report.errors.clone(),
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

fn write_json_line<W: Write, T: Serialize>(out: &mut W, line: &T) -> anyhow::Result<()> {
    serde_json::to_writer(&mut *out, line)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampr_core::metrics::RateStats;
    use rampr_core::{Overall, StopReason, Verdict};
    use std::time::Duration;

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }
    }

    fn report() -> rampr_core::RunReport {
        rampr_core::RunReport {
            verdict: Verdict {
                overall: Overall::Pass,
                per_rule: BTreeMap::new(),
                per_metric: BTreeMap::from([(
                    "http_req_failed".to_string(),
                    Statistics::Rate(RateStats {
                        total: 4,
                        passes: 0,
                    }),
                )]),
            },
            stop_reason: StopReason::Aborted,
            duration: Duration::from_millis(1500),
            iterations: 4,
            peak_vus: 1,
            errors: BTreeMap::new(),
        }
    }

    #[test]
    fn json_lines_end_with_a_newline() {
        let mut out = Vec::new();
        write_json_line(&mut out, &build_summary_line(&report()))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(out.last(), Some(&b'\n'));
        assert_eq!(out.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[test]
    fn write_errors_are_reported() {
        assert!(write_json_line(&mut ClosedPipe, &build_summary_line(&report())).is_err());
    }

    #[test]
    fn summary_line_serializes_verdict_and_metrics() {
        let report = report();
        let value = serde_json::to_value(build_summary_line(&report))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(value["kind"], "summary");
        assert_eq!(value["verdict"], "pass");
        assert_eq!(value["stop_reason"], "aborted");
        assert_eq!(value["duration_secs"], 1.5);
        assert_eq!(value["metrics"]["http_req_failed"]["type"], "rate");
        assert_eq!(value["metrics"]["http_req_failed"]["rate"], 0.0);
    }
}
