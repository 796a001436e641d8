use rampr_metrics::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Internal inconsistency while driving the pool. The run is drained and no verdict is
    /// produced.
    #[error("scheduler fault: {0}")]
    SchedulerFault(String),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Rejected declarations. Always raised before a run leaves `Idle`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("`stages` must be a non-empty array of {{ duration, target }}")]
    EmptyStages,

    #[error("stage {index} must have a positive duration")]
    ZeroStageDuration { index: usize },

    #[error("stages never schedule a virtual user (every target is 0)")]
    NoVus,

    #[error("`{0}` must be a positive duration")]
    ZeroInterval(&'static str),

    #[error("invalid threshold `{expression}` on `{metric}`: {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },

    #[error("threshold references unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("`{selector}` cannot be applied to {kind} metric `{metric}`")]
    SelectorMismatch {
        metric: String,
        selector: String,
        kind: MetricKind,
    },

    #[error("unit `{unit}` cannot be applied to `{selector}` on {kind} metric `{metric}`")]
    UnitMismatch {
        metric: String,
        selector: String,
        unit: String,
        kind: MetricKind,
    },

    #[error(transparent)]
    Percentile(#[from] rampr_metrics::Error),
}
