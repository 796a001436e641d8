use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rampr_metrics::{AggregateOptions, OutcomeRecorder, Snapshot, Statistics, aggregate};
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config::{RunConfig, RunPlan};
use crate::error::Result;
use crate::pool::VuPool;
use crate::progress::{ProgressFn, ProgressUpdate};
use crate::thresholds::{Evaluation, Overall, RuleResult, RuleStatus, evaluate};
use crate::vu::raised;
use crate::workload::Workload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Phase {
    Idle,
    Running,
    Draining,
    Completed,
    /// A scheduler fault stopped the run; no verdict exists.
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum StopReason {
    /// The last stage ended.
    ScheduleCompleted,
    /// External abort through an [`AbortHandle`].
    Aborted,
    /// A failing `abort_on_fail` threshold during mid-run evaluation.
    ThresholdAbort,
}

/// Cloneable handle that requests a graceful stop of a running controller.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    /// Idempotent; the run drains and still produces a verdict.
    pub fn abort(&self) {
        if !self.tx.send_replace(true) {
            tracing::info!("abort requested");
        }
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub overall: Overall,
    pub per_rule: BTreeMap<String, RuleResult>,
    pub per_metric: BTreeMap<String, Statistics>,
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        self.overall == Overall::Pass
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub verdict: Verdict,
    pub stop_reason: StopReason,
    pub duration: Duration,
    pub iterations: u64,
    pub peak_vus: u64,
    /// Workload error messages and how often each occurred.
    pub errors: BTreeMap<String, u64>,
}

/// Owns one run: `Idle -> Running -> Draining -> Completed` (or `Faulted`).
pub struct RunController<W> {
    plan: RunPlan,
    workload: Arc<W>,
    recorder: Arc<OutcomeRecorder>,
    phase: watch::Sender<Phase>,
    abort: Arc<watch::Sender<bool>>,
    progress: Option<ProgressFn>,
}

impl<W: Workload> RunController<W> {
    /// Validates `config` against the workload's declared metrics. Nothing runs on error.
    pub fn new(config: RunConfig, workload: W) -> Result<Self> {
        let plan = config.validate(&workload.declared_metrics())?;

        let step = plan.schedule.max_step_per(plan.poll_interval);
        if step > 1 {
            tracing::warn!(
                max_step = step,
                poll_interval = ?plan.poll_interval,
                "poll interval is coarse for the steepest ramp; the pool may trail the target by more than one VU"
            );
        }

        let (phase, _) = watch::channel(Phase::Idle);
        let (abort, _) = watch::channel(false);
        Ok(Self {
            plan,
            workload: Arc::new(workload),
            recorder: Arc::new(OutcomeRecorder::new()),
            phase,
            abort: Arc::new(abort),
            progress: None,
        })
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    pub fn recorder(&self) -> &Arc<OutcomeRecorder> {
        &self.recorder
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            tx: self.abort.clone(),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Receiver that observes phase transitions, including after the run returns.
    pub fn phase_watch(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub async fn run(self) -> Result<RunReport> {
        let started = Instant::now();
        let schedule = &self.plan.schedule;
        let mut pool = VuPool::new(
            self.workload.clone(),
            self.recorder.clone(),
            self.plan.think_time,
            started,
        );

        self.set_phase(Phase::Running);
        tracing::info!(
            stages = schedule.stages().len(),
            duration = ?schedule.total_duration(),
            peak_vus = schedule.peak_target(),
            "run started"
        );

        let mut poll = tokio::time::interval(self.plan.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut progress = interval_after(started, self.plan.progress_interval);
        let mut evaluation = self
            .plan
            .evaluation_interval
            .map(|every| interval_after(started, every));
        let mut abort_rx = self.abort.subscribe();

        let mut progress_tick: u64 = 0;
        let mut last_progress = (started, 0u64);
        let mut pool_started = false;

        let stopped: Result<StopReason> = loop {
            tokio::select! {
                _ = poll.tick() => {
                    let Some(target) = schedule.target_at(started.elapsed()).active() else {
                        break Ok(StopReason::ScheduleCompleted);
                    };
                    if let Err(err) = pool.reconcile(target) {
                        break Err(err);
                    }
                    if !pool_started {
                        pool.start();
                        pool_started = true;
                    }
                }
                _ = progress.tick(), if self.progress.is_some() => {
                    progress_tick = progress_tick.saturating_add(1);
                    self.emit_progress(&pool, started, progress_tick, &mut last_progress);
                }
                _ = tick_opt(&mut evaluation) => {
                    let eval = self.evaluate_now(started.elapsed());
                    for (id, rule) in eval.with_status(RuleStatus::Fail) {
                        tracing::warn!(rule = id, observed = ?rule.observed, "threshold failing mid-run");
                    }
                    if eval.should_abort() {
                        break Ok(StopReason::ThresholdAbort);
                    }
                }
                _ = raised(&mut abort_rx) => break Ok(StopReason::Aborted),
            }
        };

        let stop_reason = match stopped {
            Ok(reason) => reason,
            Err(err) => {
                self.set_phase(Phase::Draining);
                if let Err(drain_err) = pool.drain().await {
                    tracing::error!(error = %drain_err, "draining after a fault failed");
                }
                self.set_phase(Phase::Faulted);
                tracing::error!(error = %err, "run faulted");
                return Err(err);
            }
        };

        self.set_phase(Phase::Draining);
        tracing::info!(reason = %stop_reason, running = pool.running(), "draining");
        if let Err(err) = pool.drain().await {
            self.set_phase(Phase::Faulted);
            tracing::error!(error = %err, "run faulted while draining");
            return Err(err);
        }
        let duration = started.elapsed();
        self.set_phase(Phase::Completed);

        let snapshot = self.recorder.snapshot();
        let per_metric = aggregate(&snapshot, &self.aggregate_options(duration));
        let eval = evaluate(
            &self.plan.rules,
            &per_metric,
            self.plan.fail_on_undetermined,
        );
        for (id, _) in eval.with_status(RuleStatus::Undetermined) {
            tracing::warn!(rule = id, "threshold undetermined: metric has no samples");
        }

        let report = RunReport {
            verdict: Verdict {
                overall: eval.overall,
                per_rule: eval.per_rule,
                per_metric,
            },
            stop_reason,
            duration,
            iterations: snapshot.len() as u64,
            peak_vus: pool.peak(),
            errors: error_counts(&snapshot),
        };
        tracing::info!(
            verdict = %report.verdict.overall,
            iterations = report.iterations,
            duration = ?report.duration,
            "run completed"
        );

        Ok(report)
    }

    fn set_phase(&self, phase: Phase) {
        let prev = self.phase.send_replace(phase);
        tracing::debug!(from = %prev, to = %phase, "phase transition");
    }

    fn aggregate_options(&self, elapsed: Duration) -> AggregateOptions {
        AggregateOptions {
            elapsed: Some(elapsed),
            ..self.plan.aggregate.clone()
        }
    }

    fn evaluate_now(&self, elapsed: Duration) -> Evaluation {
        let snapshot = self.recorder.snapshot();
        let stats = aggregate(&snapshot, &self.aggregate_options(elapsed));
        evaluate(&self.plan.rules, &stats, self.plan.fail_on_undetermined)
    }

    fn emit_progress(
        &self,
        pool: &VuPool<W>,
        started: Instant,
        tick: u64,
        last: &mut (Instant, u64),
    ) {
        let Some(progress) = &self.progress else {
            return;
        };

        let now = Instant::now();
        let iterations_total = self.recorder.recorded();
        let dt = now.saturating_duration_since(last.0).as_secs_f64().max(1e-9);
        let iterations_per_sec_now = iterations_total.saturating_sub(last.1) as f64 / dt;
        *last = (now, iterations_total);

        let elapsed = now.saturating_duration_since(started);
        (progress)(ProgressUpdate {
            tick,
            elapsed,
            total_duration: self.plan.schedule.total_duration(),
            phase: self.phase(),
            stage: self.plan.schedule.stage_snapshot_at(elapsed).into(),
            live_vus: pool.live(),
            iterations_total,
            failed_total: self.recorder.failed(),
            iterations_per_sec_now,
        });
    }
}

fn interval_after(started: Instant, period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(started + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick_opt(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn error_counts(snapshot: &Snapshot) -> BTreeMap<String, u64> {
    let mut out: BTreeMap<String, u64> = BTreeMap::new();
    for err in snapshot.samples().iter().filter_map(|s| s.error.as_deref()) {
        *out.entry(err.to_string()).or_default() += 1;
    }
    out
}
