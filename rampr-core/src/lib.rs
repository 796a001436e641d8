mod config;
mod error;
mod pool;
mod progress;
mod run;
mod schedule;
mod thresholds;
mod vu;
mod workload;

pub use config::{RunConfig, RunPlan, Stage, ThresholdDecl, ThresholdSet};
pub use error::{ConfigError, Error, Result};
pub use pool::VuPool;
pub use progress::{ProgressFn, ProgressUpdate, StageProgress};
pub use run::{AbortHandle, Phase, RunController, RunReport, StopReason, Verdict};
pub use schedule::{ScheduleTarget, StageSchedule, StageSnapshot};
pub use thresholds::{
    Evaluation, Overall, RuleResult, RuleStatus, ThresholdAgg, ThresholdExpr, ThresholdOp,
    ThresholdRule, ThresholdUnit, compile_thresholds, evaluate, parse_threshold_expr,
};
pub use workload::{
    DeclaredMetrics, IterationContext, Outcome, Workload, WorkloadError, WorkloadFn, workload_fn,
};

pub use rampr_metrics as metrics;
