use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::sample::Sample;

#[derive(Debug, Default)]
struct Shard {
    samples: Mutex<Vec<Sample>>,
}

#[derive(Debug, Default)]
struct Totals {
    recorded: AtomicU64,
    failed: AtomicU64,
}

impl Totals {
    fn observe(&self, sample: &Sample) {
        self.recorded.fetch_add(1, Ordering::Relaxed);
        if !sample.success {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Thread-safe sink for samples produced by virtual users.
///
/// Each writer gets its own append-only shard (see [`OutcomeRecorder::shard`]), so the hot
/// per-iteration path never contends with other writers. Readers pull a [`Snapshot`];
/// aggregation work runs on the copy and never blocks writers.
#[derive(Debug)]
pub struct OutcomeRecorder {
    shards: RwLock<Vec<Arc<Shard>>>,
    fallback: Arc<Shard>,
    totals: Arc<Totals>,
}

impl Default for OutcomeRecorder {
    fn default() -> Self {
        let fallback = Arc::new(Shard::default());
        Self {
            shards: RwLock::new(vec![fallback.clone()]),
            fallback,
            totals: Arc::new(Totals::default()),
        }
    }
}

impl OutcomeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new writer arena.
    pub fn shard(&self) -> RecorderShard {
        let shard = Arc::new(Shard::default());
        self.shards.write().push(shard.clone());
        RecorderShard {
            shard,
            totals: self.totals.clone(),
        }
    }

    /// Records into the shared fallback shard. Prefer a dedicated [`RecorderShard`] per writer.
    pub fn record(&self, sample: Sample) {
        self.totals.observe(&sample);
        self.fallback.samples.lock().push(sample);
    }

    /// Samples recorded so far. Cheap; intended for progress reporting.
    pub fn recorded(&self) -> u64 {
        self.totals.recorded.load(Ordering::Relaxed)
    }

    /// Samples with `success == false` recorded so far.
    pub fn failed(&self) -> u64 {
        self.totals.failed.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every recorded sample.
    ///
    /// Each shard is locked only while it is copied; a sample is either fully in the
    /// snapshot or not at all.
    pub fn snapshot(&self) -> Snapshot {
        let shards: Vec<Arc<Shard>> = self.shards.read().clone();

        let mut samples = Vec::new();
        for shard in &shards {
            let guard = shard.samples.lock();
            samples.extend(guard.iter().cloned());
        }

        Snapshot { samples }
    }
}

/// Writer handle owning one append-only arena of an [`OutcomeRecorder`].
#[derive(Debug)]
pub struct RecorderShard {
    shard: Arc<Shard>,
    totals: Arc<Totals>,
}

impl RecorderShard {
    pub fn record(&self, sample: Sample) {
        self.totals.observe(&sample);
        self.shard.samples.lock().push(sample);
    }
}

/// Immutable view of recorded samples.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    samples: Vec<Sample>,
}

impl Snapshot {
    pub fn from_samples(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
