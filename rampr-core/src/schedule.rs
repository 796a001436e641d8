use std::time::Duration;

use crate::config::Stage;
use crate::error::ConfigError;

/// Scheduler output for one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleTarget {
    Active(u64),
    /// Elapsed time is past the end of the last stage.
    Completed,
}

impl ScheduleTarget {
    pub fn active(self) -> Option<u64> {
        match self {
            Self::Active(v) => Some(v),
            Self::Completed => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    index: usize,
    start: Duration,
    end: Duration,
    from: u64,
    to: u64,
}

impl Segment {
    fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }

    fn value_at(&self, elapsed: Duration) -> u64 {
        let den = self.duration().as_nanos() as i128;
        if den == 0 {
            return self.to;
        }

        let num = elapsed.saturating_sub(self.start).as_nanos().min(den as u128) as i128;
        let from = self.from as i128;
        let delta = self.to as i128 - from;

        // Integer division truncates toward zero, i.e. toward the stage's start value.
        let cur = from + delta.saturating_mul(num) / den;
        cur.clamp(0, u64::MAX as i128) as u64
    }
}

/// Piecewise-linear VU target curve built from ordered stages.
#[derive(Debug, Clone)]
pub struct StageSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl StageSchedule {
    pub fn new(start_vus: u64, stages: Vec<Stage>) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::EmptyStages);
        }
        if let Some(index) = stages.iter().position(|s| s.duration.is_zero()) {
            return Err(ConfigError::ZeroStageDuration { index });
        }

        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Ok(Self {
            start: start_vus,
            stages,
            cumulative_ends,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn start_vus(&self) -> u64 {
        self.start
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Highest target the curve ever reaches.
    pub fn peak_target(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .max()
            .unwrap_or(0)
            .max(self.start)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed > self.total_duration()
    }

    pub fn target_at(&self, elapsed: Duration) -> ScheduleTarget {
        if elapsed.is_zero() {
            return ScheduleTarget::Active(self.start);
        }
        if self.is_done(elapsed) {
            return ScheduleTarget::Completed;
        }

        ScheduleTarget::Active(self.segment(elapsed).value_at(elapsed))
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> StageSnapshot {
        let clamped = elapsed.min(self.total_duration());
        let seg = self.segment(clamped);

        let stage_elapsed = clamped.saturating_sub(seg.start);
        StageSnapshot {
            index: seg.index,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: seg.duration().saturating_sub(stage_elapsed),
            start_target: seg.from,
            end_target: seg.to,
            current_target: if clamped.is_zero() {
                self.start
            } else {
                seg.value_at(clamped)
            },
        }
    }

    /// Largest change of the target that can happen within one `poll` window.
    ///
    /// Reconciling every `poll` keeps the live pool within this many VUs of the curve.
    pub fn max_step_per(&self, poll: Duration) -> u64 {
        let poll_ns = poll.as_nanos();
        (0..self.stages.len())
            .map(|idx| {
                let seg = self.segment_at(idx);
                let delta = u128::from(seg.from.abs_diff(seg.to));
                let dur_ns = seg.duration().as_nanos().max(1);
                let step = delta.saturating_mul(poll_ns).div_ceil(dur_ns).min(delta);
                step.min(u128::from(u64::MAX)) as u64
            })
            .max()
            .unwrap_or(0)
    }

    fn segment(&self, elapsed: Duration) -> Segment {
        let idx = match self
            .cumulative_ends
            .binary_search_by(|end| end.cmp(&elapsed))
        {
            Ok(i) => i,
            Err(i) => i,
        };
        self.segment_at(idx.min(self.stages.len().saturating_sub(1)))
    }

    fn segment_at(&self, idx: usize) -> Segment {
        let start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };
        let from = if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        };

        Segment {
            index: idx,
            start,
            end: self.cumulative_ends[idx],
            from,
            to: self.stages[idx].target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn load_profile() -> StageSchedule {
        StageSchedule::new(
            0,
            vec![
                Stage::new(secs(30), 20),
                Stage::new(secs(60), 20),
                Stage::new(secs(30), 0),
            ],
        )
        .unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn boundaries_hit_declared_targets() {
        let s = load_profile();
        assert_eq!(s.target_at(Duration::ZERO), ScheduleTarget::Active(0));
        assert_eq!(s.target_at(secs(30)), ScheduleTarget::Active(20));
        assert_eq!(s.target_at(secs(90)), ScheduleTarget::Active(20));
        assert_eq!(s.target_at(secs(120)), ScheduleTarget::Active(0));
        assert_eq!(
            s.target_at(secs(120) + Duration::from_nanos(1)),
            ScheduleTarget::Completed
        );
        assert!(s.is_done(secs(121)));
    }

    #[test]
    fn ramp_is_linear_and_truncates_toward_start() {
        let s = load_profile();

        // 0 -> 20 over 30s.
        for ms in (0..=30_000u64).step_by(250) {
            let expected = 20 * ms / 30_000;
            assert_eq!(
                s.target_at(Duration::from_millis(ms)),
                ScheduleTarget::Active(expected),
                "at {ms}ms"
            );
        }

        // Hold.
        assert_eq!(s.target_at(secs(45)), ScheduleTarget::Active(20));

        // 20 -> 0 over 30s: truncation keeps the value at the start side.
        assert_eq!(s.target_at(secs(91)), ScheduleTarget::Active(20));
        assert_eq!(s.target_at(secs(105)), ScheduleTarget::Active(10));
        assert_eq!(
            s.target_at(Duration::from_millis(119_999)),
            ScheduleTarget::Active(1)
        );
    }

    #[test]
    fn start_vus_is_the_first_ramp_origin() {
        let s = StageSchedule::new(5, vec![Stage::new(secs(10), 15)])
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(s.target_at(Duration::ZERO), ScheduleTarget::Active(5));
        assert_eq!(s.target_at(secs(5)), ScheduleTarget::Active(10));
        assert_eq!(s.peak_target(), 15);
    }

    #[test]
    fn rejects_empty_and_zero_duration_stages() {
        assert_eq!(
            StageSchedule::new(0, Vec::new()).err(),
            Some(ConfigError::EmptyStages)
        );
        assert_eq!(
            StageSchedule::new(
                0,
                vec![Stage::new(secs(1), 1), Stage::new(Duration::ZERO, 2)]
            )
            .err(),
            Some(ConfigError::ZeroStageDuration { index: 1 })
        );
    }

    #[test]
    fn snapshot_reports_stage_progress() {
        let s = load_profile();
        let snap = s.stage_snapshot_at(secs(40));
        assert_eq!(snap.index, 1);
        assert_eq!(snap.count, 3);
        assert_eq!(snap.stage_elapsed, secs(10));
        assert_eq!(snap.stage_remaining, secs(50));
        assert_eq!((snap.start_target, snap.end_target), (20, 20));
        assert_eq!(snap.current_target, 20);

        let end = s.stage_snapshot_at(secs(500));
        assert_eq!(end.index, 2);
        assert_eq!(end.stage_remaining, Duration::ZERO);
        assert_eq!(end.current_target, 0);
    }

    #[test]
    fn max_step_bounds_tracking_error() {
        let s = load_profile();
        assert_eq!(s.max_step_per(Duration::from_millis(100)), 1);
        assert_eq!(s.max_step_per(secs(3)), 2);
        assert_eq!(s.max_step_per(secs(300)), 20);

        let steep = StageSchedule::new(0, vec![Stage::new(secs(1), 100)])
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(steep.max_step_per(Duration::from_millis(100)), 10);
    }
}
