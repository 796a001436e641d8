use std::collections::BTreeMap;

use rampr_metrics::{MetricKind, Percentile, Statistics};

use crate::config::ThresholdSet;
use crate::error::ConfigError;
use crate::workload::DeclaredMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ThresholdOp {
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Lte,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Gte,
    #[strum(serialize = "==")]
    Eq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    P(Percentile),
}

impl std::fmt::Display for ThresholdAgg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Med => f.write_str("med"),
            Self::Count => f.write_str("count"),
            Self::Rate => f.write_str("rate"),
            Self::P(p) => write!(f, "{p}"),
        }
    }
}

/// Unit attached to a threshold literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdUnit {
    /// A time unit; the literal has been normalized to milliseconds.
    Time(&'static str),
    /// `%`; the literal has been normalized to a fraction.
    Percent,
}

impl std::fmt::Display for ThresholdUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Time(u) => f.write_str(u),
            Self::Percent => f.write_str("%"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    /// Normalized literal (milliseconds for time units, a fraction for `%`).
    pub value: f64,
    pub unit: Option<ThresholdUnit>,
}

pub fn parse_threshold_expr(raw: &str) -> Result<ThresholdExpr, String> {
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

    let agg = if left.eq_ignore_ascii_case("avg") {
        ThresholdAgg::Avg
    } else if left.eq_ignore_ascii_case("min") {
        ThresholdAgg::Min
    } else if left.eq_ignore_ascii_case("max") {
        ThresholdAgg::Max
    } else if left.eq_ignore_ascii_case("med") {
        ThresholdAgg::Med
    } else if left.eq_ignore_ascii_case("count") {
        ThresholdAgg::Count
    } else if left.eq_ignore_ascii_case("rate") {
        ThresholdAgg::Rate
    } else if let Some(inner) = left.strip_prefix("p(").and_then(|v| v.strip_suffix(')')) {
        let p: Percentile = inner
            .parse()
            .map_err(|_| format!("percentile out of range in threshold: {raw}"))?;
        ThresholdAgg::P(p)
    } else {
        return Err(format!("unknown aggregation `{left}` in threshold: {raw}"));
    };

    let split = right
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+')))
        .unwrap_or(right.len());
    let (number, suffix) = right.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid numeric value in threshold: {raw}"))?;
    if !value.is_finite() {
        return Err(format!("invalid numeric value in threshold: {raw}"));
    }

    let (value, unit) = match suffix {
        "" => (value, None),
        "%" => (value / 100.0, Some(ThresholdUnit::Percent)),
        "ns" => (value / 1_000_000.0, Some(ThresholdUnit::Time("ns"))),
        "us" | "µs" => (value / 1_000.0, Some(ThresholdUnit::Time("us"))),
        "ms" => (value, Some(ThresholdUnit::Time("ms"))),
        "s" => (value * 1_000.0, Some(ThresholdUnit::Time("s"))),
        "m" => (value * 60_000.0, Some(ThresholdUnit::Time("m"))),
        "h" => (value * 3_600_000.0, Some(ThresholdUnit::Time("h"))),
        other => return Err(format!("unknown unit `{other}` in threshold: {raw}")),
    };

    Ok(ThresholdExpr {
        agg,
        op,
        value,
        unit,
    })
}

/// A validated threshold: one expression on one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRule {
    /// `"<metric>: <expression>"`.
    pub id: String,
    pub metric: String,
    pub kind: MetricKind,
    pub expression: String,
    pub expr: ThresholdExpr,
    pub abort_on_fail: bool,
}

impl ThresholdRule {
    pub fn percentile(&self) -> Option<Percentile> {
        match self.expr.agg {
            ThresholdAgg::P(p) => Some(p),
            _ => None,
        }
    }
}

fn metric_kind(metric: &str, declared: &DeclaredMetrics) -> Option<MetricKind> {
    if let Some(check) = metric
        .strip_prefix("checks{check:")
        .and_then(|v| v.strip_suffix('}'))
    {
        return declared
            .checks
            .iter()
            .any(|c| c == check)
            .then_some(MetricKind::Rate);
    }

    MetricKind::of_builtin(metric).or_else(|| {
        declared
            .trends
            .iter()
            .any(|t| t == metric)
            .then_some(MetricKind::Trend)
    })
}

fn selector_allowed(kind: MetricKind, agg: ThresholdAgg) -> bool {
    match kind {
        MetricKind::Trend => !matches!(agg, ThresholdAgg::Rate),
        MetricKind::Rate => matches!(agg, ThresholdAgg::Rate | ThresholdAgg::Count),
        MetricKind::Counter => matches!(agg, ThresholdAgg::Count | ThresholdAgg::Rate),
    }
}

fn unit_allowed(kind: MetricKind, agg: ThresholdAgg, unit: ThresholdUnit) -> bool {
    match unit {
        ThresholdUnit::Time(_) => kind == MetricKind::Trend && agg != ThresholdAgg::Count,
        ThresholdUnit::Percent => kind == MetricKind::Rate && agg == ThresholdAgg::Rate,
    }
}

/// Parses and validates threshold declarations against the metrics a run can produce.
pub fn compile_thresholds(
    sets: &[ThresholdSet],
    declared: &DeclaredMetrics,
) -> Result<Vec<ThresholdRule>, ConfigError> {
    let mut out = Vec::new();

    for set in sets {
        let kind = metric_kind(&set.metric, declared)
            .ok_or_else(|| ConfigError::UnknownMetric(set.metric.clone()))?;

        for decl in &set.expressions {
            let expr = parse_threshold_expr(&decl.expression).map_err(|reason| {
                ConfigError::InvalidThreshold {
                    metric: set.metric.clone(),
                    expression: decl.expression.clone(),
                    reason,
                }
            })?;

            if !selector_allowed(kind, expr.agg) {
                return Err(ConfigError::SelectorMismatch {
                    metric: set.metric.clone(),
                    selector: expr.agg.to_string(),
                    kind,
                });
            }
            if let Some(unit) = expr.unit
                && !unit_allowed(kind, expr.agg, unit)
            {
                return Err(ConfigError::UnitMismatch {
                    metric: set.metric.clone(),
                    selector: expr.agg.to_string(),
                    unit: unit.to_string(),
                    kind,
                });
            }

            let expression = decl.expression.trim().to_string();
            out.push(ThresholdRule {
                id: format!("{}: {expression}", set.metric),
                metric: set.metric.clone(),
                kind,
                expression,
                expr,
                abort_on_fail: decl.abort_on_fail,
            });
        }
    }

    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum RuleStatus {
    Pass,
    Fail,
    /// The metric had no data to judge.
    Undetermined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Overall {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleResult {
    pub metric: String,
    pub expression: String,
    pub status: RuleStatus,
    pub observed: Option<f64>,
    pub abort_on_fail: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub per_rule: BTreeMap<String, RuleResult>,
    pub overall: Overall,
}

impl Evaluation {
    pub fn with_status(&self, status: RuleStatus) -> impl Iterator<Item = (&str, &RuleResult)> {
        self.per_rule
            .iter()
            .filter(move |(_, r)| r.status == status)
            .map(|(id, r)| (id.as_str(), r))
    }

    /// A failing rule asked for the run to stop.
    pub fn should_abort(&self) -> bool {
        self.per_rule
            .values()
            .any(|r| r.abort_on_fail && r.status == RuleStatus::Fail)
    }
}

/// Judges every rule against aggregated statistics. Pure: the same input yields the same
/// evaluation.
pub fn evaluate(
    rules: &[ThresholdRule],
    stats: &BTreeMap<String, Statistics>,
    fail_on_undetermined: bool,
) -> Evaluation {
    let mut per_rule = BTreeMap::new();
    let mut failed = false;
    let mut undetermined = false;

    for rule in rules {
        let observed = stats
            .get(&rule.metric)
            .and_then(|s| observed_value(s, rule.expr.agg));

        let status = match observed {
            None => {
                undetermined = true;
                RuleStatus::Undetermined
            }
            Some(v) if compare(v, rule.expr.op, rule.expr.value) => RuleStatus::Pass,
            Some(_) => {
                failed = true;
                RuleStatus::Fail
            }
        };

        per_rule.insert(
            rule.id.clone(),
            RuleResult {
                metric: rule.metric.clone(),
                expression: rule.expression.clone(),
                status,
                observed,
                abort_on_fail: rule.abort_on_fail,
            },
        );
    }

    let overall = if failed || (undetermined && fail_on_undetermined) {
        Overall::Fail
    } else {
        Overall::Pass
    };

    Evaluation { per_rule, overall }
}

fn compare(left: f64, op: ThresholdOp, right: f64) -> bool {
    match op {
        ThresholdOp::Lt => left < right,
        ThresholdOp::Lte => left <= right,
        ThresholdOp::Gt => left > right,
        ThresholdOp::Gte => left >= right,
        ThresholdOp::Eq => left == right,
    }
}

fn observed_value(stats: &Statistics, agg: ThresholdAgg) -> Option<f64> {
    match (stats, agg) {
        (Statistics::Trend(t), ThresholdAgg::Avg) => t.avg,
        (Statistics::Trend(t), ThresholdAgg::Min) => t.min,
        (Statistics::Trend(t), ThresholdAgg::Max) => t.max,
        (Statistics::Trend(t), ThresholdAgg::Med) => t.med,
        (Statistics::Trend(t), ThresholdAgg::P(p)) => t.percentile(p),
        (Statistics::Trend(t), ThresholdAgg::Count) => Some(t.count as f64),

        (Statistics::Rate(r), ThresholdAgg::Rate) => r.rate(),
        (Statistics::Rate(r), ThresholdAgg::Count) => Some(r.total as f64),

        (Statistics::Counter(c), ThresholdAgg::Count) => Some(c.count as f64),
        (Statistics::Counter(c), ThresholdAgg::Rate) => c.per_second,

        // Rejected at validation time.
        (_, _) => None,
    }
}
