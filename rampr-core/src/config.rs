use std::time::Duration;

use rampr_metrics::{AggregateOptions, Percentile, PercentileMode};

use crate::error::ConfigError;
use crate::schedule::StageSchedule;
use crate::thresholds::{ThresholdRule, compile_thresholds};
use crate::workload::DeclaredMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// One threshold expression plus whether a mid-run failure should stop the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdDecl {
    pub expression: String,
    pub abort_on_fail: bool,
}

impl From<&str> for ThresholdDecl {
    fn from(expression: &str) -> Self {
        Self {
            expression: expression.to_string(),
            abort_on_fail: false,
        }
    }
}

impl From<String> for ThresholdDecl {
    fn from(expression: String) -> Self {
        Self {
            expression,
            abort_on_fail: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdSet {
    pub metric: String,
    pub expressions: Vec<ThresholdDecl>,
}

impl ThresholdSet {
    pub fn new<I, E>(metric: impl Into<String>, expressions: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<ThresholdDecl>,
    {
        Self {
            metric: metric.into(),
            expressions: expressions.into_iter().map(Into::into).collect(),
        }
    }
}

/// Declarative run configuration, as handed to the controller at `Idle`.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub start_vus: u64,
    pub stages: Vec<Stage>,
    pub thresholds: Vec<ThresholdSet>,

    /// How often the pool is reconciled against the schedule.
    pub poll_interval: Duration,

    /// Idle time between iterations unless the workload overrides it.
    pub think_time: Duration,

    pub progress_interval: Duration,

    /// Mid-run threshold evaluation. Required for `abort_on_fail` to take effect.
    pub evaluation_interval: Option<Duration>,

    pub percentile_mode: PercentileMode,
    pub summary_percentiles: Vec<Percentile>,

    /// Treat rules without data as failures.
    pub fail_on_undetermined: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            start_vus: 0,
            stages: Vec::new(),
            thresholds: Vec::new(),
            poll_interval: Duration::from_millis(100),
            think_time: Duration::from_secs(1),
            progress_interval: Duration::from_secs(1),
            evaluation_interval: None,
            percentile_mode: PercentileMode::Exact,
            summary_percentiles: Percentile::defaults(),
            fail_on_undetermined: false,
        }
    }
}

impl RunConfig {
    /// Validates the configuration against the metrics a workload can produce.
    pub fn validate(&self, declared: &DeclaredMetrics) -> Result<RunPlan, ConfigError> {
        let schedule = StageSchedule::new(self.start_vus, self.stages.clone())?;
        if schedule.peak_target() == 0 {
            return Err(ConfigError::NoVus);
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("poll_interval"));
        }
        if self.progress_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("progress_interval"));
        }
        if self.evaluation_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::ZeroInterval("evaluation_interval"));
        }

        let rules = compile_thresholds(&self.thresholds, declared)?;

        let mut percentiles = self.summary_percentiles.clone();
        percentiles.extend(rules.iter().filter_map(ThresholdRule::percentile));
        percentiles.sort_unstable();
        percentiles.dedup();

        Ok(RunPlan {
            schedule,
            rules,
            poll_interval: self.poll_interval,
            think_time: self.think_time,
            progress_interval: self.progress_interval,
            evaluation_interval: self.evaluation_interval,
            aggregate: AggregateOptions {
                percentiles,
                mode: self.percentile_mode,
                elapsed: None,
                checks: declared.checks.clone(),
                trends: declared.trends.clone(),
            },
            fail_on_undetermined: self.fail_on_undetermined,
        })
    }
}

/// Validated, immutable form of a [`RunConfig`].
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub schedule: StageSchedule,
    pub rules: Vec<ThresholdRule>,
    pub poll_interval: Duration,
    pub think_time: Duration,
    pub progress_interval: Duration,
    pub evaluation_interval: Option<Duration>,
    pub aggregate: AggregateOptions,
    pub fail_on_undetermined: bool,
}
