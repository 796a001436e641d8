use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rampr_metrics::{Check, RequestTiming, TrendValue};
use smallvec::SmallVec;

/// Failure that prevented an iteration from being measured.
///
/// Recorded as a failed sample; it never stops the run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct WorkloadError {
    message: String,
}

impl WorkloadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for WorkloadError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for WorkloadError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationContext {
    /// 1-based VU id, unique within a run.
    pub vu: u64,
    /// 0-based iteration counter of this VU.
    pub iteration: u64,
    /// Offset of the iteration start from the run start.
    pub elapsed: Duration,
}

/// What one workload invocation observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub latency: Duration,
    pub failed: bool,
    pub checks: SmallVec<[Check; 4]>,
    pub values: SmallVec<[TrendValue; 2]>,
    /// Individual requests, when the iteration issued more than one.
    pub requests: SmallVec<[RequestTiming; 4]>,
    /// Overrides the configured think-time for this iteration.
    pub think_time: Option<Duration>,
}

impl Outcome {
    pub fn success(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn failure(latency: Duration) -> Self {
        Self {
            latency,
            failed: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_check(mut self, name: impl Into<Arc<str>>, passed: bool) -> Self {
        self.checks.push(Check::new(name, passed));
        self
    }

    #[must_use]
    pub fn with_value(mut self, name: impl Into<Arc<str>>, value: f64) -> Self {
        self.values.push(TrendValue {
            name: name.into(),
            value,
        });
        self
    }

    #[must_use]
    pub fn with_request(mut self, latency: Duration, failed: bool) -> Self {
        self.requests.push(RequestTiming { latency, failed });
        self
    }

    #[must_use]
    pub fn with_think_time(mut self, think_time: Duration) -> Self {
        self.think_time = Some(think_time);
        self
    }
}

/// Check and custom trend names a workload can emit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredMetrics {
    pub checks: Vec<String>,
    pub trends: Vec<String>,
}

/// Caller-supplied per-iteration work.
///
/// The pool imposes no timeout on `invoke`; an implementation that can stall must bound its
/// own calls, otherwise draining waits for it.
pub trait Workload: Send + Sync + 'static {
    fn invoke(
        &self,
        ctx: &IterationContext,
    ) -> impl Future<Output = Result<Outcome, WorkloadError>> + Send;

    fn declared_metrics(&self) -> DeclaredMetrics {
        DeclaredMetrics::default()
    }
}

/// Adapter returned by [`workload_fn`].
#[derive(Debug, Clone)]
pub struct WorkloadFn<F> {
    f: F,
    declared: DeclaredMetrics,
}

/// Builds a [`Workload`] from an async closure.
pub fn workload_fn<F, Fut>(f: F) -> WorkloadFn<F>
where
    F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome, WorkloadError>> + Send,
{
    WorkloadFn {
        f,
        declared: DeclaredMetrics::default(),
    }
}

impl<F> WorkloadFn<F> {
    #[must_use]
    pub fn with_declared(mut self, declared: DeclaredMetrics) -> Self {
        self.declared = declared;
        self
    }
}

impl<F, Fut> Workload for WorkloadFn<F>
where
    F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome, WorkloadError>> + Send,
{
    fn invoke(
        &self,
        ctx: &IterationContext,
    ) -> impl Future<Output = Result<Outcome, WorkloadError>> + Send {
        (self.f)(*ctx)
    }

    fn declared_metrics(&self) -> DeclaredMetrics {
        self.declared.clone()
    }
}
