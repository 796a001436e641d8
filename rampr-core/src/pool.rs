use std::sync::Arc;
use std::time::Duration;

use rampr_metrics::OutcomeRecorder;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::vu::{StartSignal, VuContext, run_vu};
use crate::workload::Workload;

#[derive(Debug)]
struct Unit {
    id: u64,
    retire: watch::Sender<bool>,
}

/// Live set of virtual users.
///
/// Only the owner (the run controller's reconcile loop) changes the unit count. Units
/// themselves only read the stop and retire flags.
pub struct VuPool<W> {
    workload: Arc<W>,
    recorder: Arc<OutcomeRecorder>,
    think_time: Duration,
    run_started: Instant,
    start: Arc<StartSignal>,
    stop: watch::Sender<bool>,
    live: Vec<Unit>,
    tasks: JoinSet<()>,
    next_id: u64,
    peak: u64,
}

impl<W: Workload> VuPool<W> {
    pub fn new(
        workload: Arc<W>,
        recorder: Arc<OutcomeRecorder>,
        think_time: Duration,
        run_started: Instant,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            workload,
            recorder,
            think_time,
            run_started,
            start: Arc::new(StartSignal::new()),
            stop,
            live: Vec::new(),
            tasks: JoinSet::new(),
            next_id: 1,
            peak: 0,
        }
    }

    /// Units that have not been asked to retire.
    pub fn live(&self) -> u64 {
        self.live.len() as u64
    }

    /// Highest live count reached so far.
    pub fn peak(&self) -> u64 {
        self.peak
    }

    /// Units still running, including retiring ones finishing their last iteration.
    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    /// Releases every unit spawned so far; later units start right away.
    pub fn start(&self) {
        self.start.start();
    }

    /// Moves the live count to `target`.
    ///
    /// Growing spawns new units. Shrinking retires the most recently spawned ones; they finish
    /// their in-flight iteration before exiting. Units that already exited are reaped without
    /// waiting on the others.
    pub fn reconcile(&mut self, target: u64) -> Result<()> {
        self.reap()?;
        if *self.stop.borrow() {
            return Ok(());
        }

        let live = self.live();
        if target > live {
            for _ in live..target {
                self.spawn_unit();
            }
            tracing::debug!(from = live, to = target, "spawned virtual users");
        } else if target < live {
            let keep = usize::try_from(target).unwrap_or(usize::MAX);
            for unit in self.live.drain(keep..) {
                unit.retire.send_replace(true);
                tracing::trace!(vu = unit.id, "retiring virtual user");
            }
            tracing::debug!(from = live, to = target, "retired virtual users");
        }

        self.peak = self.peak.max(self.live());
        Ok(())
    }

    /// Broadcasts the run-wide stop. Idempotent.
    pub fn stop(&self) {
        self.stop.send_replace(true);
        self.start.start();
    }

    /// Stops the pool and waits for every unit to finish its current iteration.
    pub async fn drain(&mut self) -> Result<()> {
        self.stop();
        self.live.clear();

        let mut fault = None;
        while let Some(res) = self.tasks.join_next().await {
            if let Err(err) = res
                && fault.is_none()
            {
                fault = Some(unit_fault(err));
            }
        }

        fault.map_or(Ok(()), Err)
    }

    fn spawn_unit(&mut self) {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);

        let (retire, retire_rx) = watch::channel(false);
        let ctx = VuContext {
            vu: id,
            workload: self.workload.clone(),
            shard: self.recorder.shard(),
            run_started: self.run_started,
            think_time: self.think_time,
            start: self.start.clone(),
            stop: self.stop.subscribe(),
            retire: retire_rx,
        };

        self.tasks.spawn(run_vu(ctx));
        self.live.push(Unit { id, retire });
    }

    fn reap(&mut self) -> Result<()> {
        while let Some(res) = self.tasks.try_join_next() {
            res.map_err(unit_fault)?;
        }

        let running = self.tasks.len();
        if running < self.live.len() {
            return Err(Error::SchedulerFault(format!(
                "{} live virtual users but only {running} running",
                self.live.len()
            )));
        }
        Ok(())
    }
}

fn unit_fault(err: JoinError) -> Error {
    if err.is_panic() {
        Error::SchedulerFault(format!("virtual user panicked: {err}"))
    } else {
        Error::Join(err)
    }
}
