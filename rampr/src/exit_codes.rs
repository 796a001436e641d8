use rampr_core::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more thresholds failed (or were undetermined with `failOnUndetermined`).
    ThresholdsFailed = 11,

    /// Invalid CLI flags or configuration (bad durations, stages, thresholds, fixtures, ...).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, scheduler faults).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_verdict(verdict: &Verdict) -> Self {
        if verdict.is_pass() {
            Self::Success
        } else {
            Self::ThresholdsFailed
        }
    }
}
