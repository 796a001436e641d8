use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Duration;

/// Result of one named check evaluated by a workload iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: Arc<str>,
    pub passed: bool,
}

impl Check {
    pub fn new(name: impl Into<Arc<str>>, passed: bool) -> Self {
        Self {
            name: name.into(),
            passed,
        }
    }
}

/// A value for a custom trend metric declared by the workload.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendValue {
    pub name: Arc<str>,
    pub value: f64,
}

/// One request issued during an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTiming {
    pub latency: Duration,
    pub failed: bool,
}

/// One observation emitted after a workload invocation.
///
/// Samples are immutable once handed to the recorder; the aggregator only reads them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sample {
    /// Offset from the start of the run.
    pub timestamp: Duration,
    pub vu: u64,
    /// Latency reported by the workload (request time).
    pub latency: Duration,
    /// Wall time of the whole iteration as measured by the VU.
    pub iteration_duration: Duration,
    pub success: bool,
    pub checks: SmallVec<[Check; 4]>,
    pub values: SmallVec<[TrendValue; 2]>,
    /// Requests of the iteration. Empty means the sample counts as a single request with
    /// `latency` and `success`.
    pub requests: SmallVec<[RequestTiming; 4]>,
    pub error: Option<Arc<str>>,
}
