use std::time::Duration;

use crate::run::Phase;
use crate::schedule::StageSnapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageProgress {
    /// 1-based stage index.
    pub stage: usize,
    pub stages: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

impl From<StageSnapshot> for StageProgress {
    fn from(st: StageSnapshot) -> Self {
        Self {
            stage: st.index + 1,
            stages: st.count,
            stage_elapsed: st.stage_elapsed,
            stage_remaining: st.stage_remaining,
            start_target: st.start_target,
            end_target: st.end_target,
            current_target: st.current_target,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based) for progress emissions.
    pub tick: u64,
    pub elapsed: Duration,
    pub total_duration: Duration,
    pub phase: Phase,
    pub stage: StageProgress,
    pub live_vus: u64,
    pub iterations_total: u64,
    pub failed_total: u64,
    /// Iterations/sec observed during the last progress interval.
    pub iterations_per_sec_now: f64,
}

pub type ProgressFn = std::sync::Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;
