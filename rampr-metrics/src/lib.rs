pub mod aggregate;
pub mod metrics;
pub mod recorder;
pub mod sample;

pub use aggregate::{AggregateOptions, PercentileMode, aggregate, percentile_of_sorted};
pub use metrics::{
    CounterStats, Error, MetricKind, Percentile, RateStats, Statistics, TrendStats,
    check_series_name, names,
};
pub use recorder::{OutcomeRecorder, RecorderShard, Snapshot};
pub use sample::{Check, RequestTiming, Sample, TrendValue};
