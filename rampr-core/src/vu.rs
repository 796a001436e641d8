use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rampr_metrics::{RecorderShard, Sample};
use tokio::sync::{Notify, watch};
use tokio::time::Instant;

use crate::workload::{IterationContext, Workload};

#[derive(Debug, Default)]
pub struct StartSignal {
    started: AtomicBool,
    notify: Notify,
}

impl StartSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        self.started.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_started() {
                return;
            }
            notified.await;
        }
    }
}

/// Resolves once the flag is raised (or its sender is gone).
pub(crate) async fn raised(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

pub(crate) struct VuContext<W> {
    pub vu: u64,
    pub workload: Arc<W>,
    pub shard: RecorderShard,
    pub run_started: Instant,
    pub think_time: Duration,
    pub start: Arc<StartSignal>,
    /// Run-wide stop.
    pub stop: watch::Receiver<bool>,
    /// Set when the pool shrinks past this unit.
    pub retire: watch::Receiver<bool>,
}

impl<W> VuContext<W> {
    fn should_exit(&self) -> bool {
        *self.stop.borrow() || *self.retire.borrow()
    }
}

/// Unit loop: invoke, record, think, check for stop.
///
/// Stop and retire are only observed between iterations, so an in-flight invocation always
/// completes and is recorded.
pub(crate) async fn run_vu<W: Workload>(mut ctx: VuContext<W>) {
    ctx.start.wait().await;

    let mut iteration: u64 = 0;
    while !ctx.should_exit() {
        let started = Instant::now();
        let ictx = IterationContext {
            vu: ctx.vu,
            iteration,
            elapsed: started.saturating_duration_since(ctx.run_started),
        };

        let result = ctx.workload.invoke(&ictx).await;
        let iteration_duration = started.elapsed();

        let mut sample = Sample {
            timestamp: ictx.elapsed,
            vu: ctx.vu,
            iteration_duration,
            ..Sample::default()
        };
        let think = match result {
            Ok(outcome) => {
                sample.latency = outcome.latency;
                sample.success = !outcome.failed;
                sample.checks = outcome.checks;
                sample.values = outcome.values;
                sample.requests = outcome.requests;
                outcome.think_time.unwrap_or(ctx.think_time)
            }
            Err(err) => {
                sample.latency = iteration_duration;
                sample.success = false;
                sample.error = Some(Arc::from(err.message()));
                ctx.think_time
            }
        };
        ctx.shard.record(sample);
        iteration = iteration.saturating_add(1);

        if ctx.should_exit() {
            break;
        }

        if think.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = tokio::time::sleep(think) => {}
                _ = raised(&mut ctx.stop) => {}
                _ = raised(&mut ctx.retire) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_signal_releases_waiters() {
        let signal = Arc::new(StartSignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        signal.start();
        waiter.await.unwrap_or_else(|e| panic!("{e}"));

        // Late waiters return immediately.
        signal.wait().await;
    }

    #[tokio::test]
    async fn raised_observes_current_and_future_values() {
        let (tx, mut rx) = watch::channel(false);
        tx.send_replace(true);
        raised(&mut rx).await;

        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        raised(&mut rx).await;
    }
}
