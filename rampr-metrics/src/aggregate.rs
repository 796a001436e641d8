use std::collections::BTreeMap;
use std::time::Duration;

use hdrhistogram::Histogram;

use crate::metrics::{
    CounterStats, Percentile, RateStats, Statistics, TrendStats, check_series_name,
    new_default_histogram, names,
};
use crate::recorder::Snapshot;
use crate::sample::RequestTiming;

/// How trend percentiles are computed.
///
/// `Exact` sorts every value and interpolates between the closest ranks. `Approximate`
/// records into an HDR histogram (3 significant digits), which bounds memory for very long
/// runs at the cost of precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum PercentileMode {
    #[default]
    Exact,
    Approximate,
}

#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub percentiles: Vec<Percentile>,
    pub mode: PercentileMode,
    /// Run time used for per-second counter rates.
    pub elapsed: Option<Duration>,
    /// Check names that always get a series, even without observations.
    pub checks: Vec<String>,
    /// Custom trend names that always get a series, even without observations.
    pub trends: Vec<String>,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            percentiles: Percentile::defaults(),
            mode: PercentileMode::Exact,
            elapsed: None,
            checks: Vec::new(),
            trends: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct RunningStats {
    n: u64,
    mean: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    fn push(&mut self, x: f64) {
        if self.n == 0 {
            self.min = x;
            self.max = x;
        } else {
            self.min = self.min.min(x);
            self.max = self.max.max(x);
        }

        self.n = self.n.saturating_add(1);
        self.mean += (x - self.mean) / self.n as f64;
    }
}

#[derive(Debug)]
enum TrendValues {
    Exact(Vec<f64>),
    Approximate(Histogram<u64>),
}

#[derive(Debug)]
struct TrendSeries {
    stats: RunningStats,
    values: TrendValues,
}

impl TrendSeries {
    fn new(mode: PercentileMode) -> Self {
        let values = match mode {
            PercentileMode::Exact => TrendValues::Exact(Vec::new()),
            PercentileMode::Approximate => TrendValues::Approximate(new_default_histogram()),
        };
        Self {
            stats: RunningStats::default(),
            values,
        }
    }

    fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.stats.push(value);
        match &mut self.values {
            TrendValues::Exact(v) => v.push(value),
            TrendValues::Approximate(h) => {
                let micros = (value * 1_000.0).round().max(1.0) as u64;
                h.saturating_record(micros);
            }
        }
    }

    fn finish(self, percentiles: &[Percentile]) -> TrendStats {
        let count = self.stats.n;
        if count == 0 {
            return TrendStats::default();
        }

        let quantile = |sorted: &[f64], h: Option<&Histogram<u64>>, p: Percentile| match h {
            Some(h) => Some(h.value_at_quantile(p.quantile()) as f64 / 1_000.0),
            None => percentile_of_sorted(sorted, p),
        };

        let (sorted, hist) = match self.values {
            TrendValues::Exact(mut v) => {
                v.sort_by(f64::total_cmp);
                (v, None)
            }
            TrendValues::Approximate(h) => (Vec::new(), Some(h)),
        };

        let mut out = BTreeMap::new();
        for p in percentiles {
            if let Some(v) = quantile(&sorted, hist.as_ref(), *p) {
                out.insert(*p, v);
            }
        }

        TrendStats {
            count,
            avg: Some(self.stats.mean),
            min: Some(self.stats.min),
            max: Some(self.stats.max),
            med: quantile(&sorted, hist.as_ref(), Percentile::P50),
            percentiles: out,
        }
    }
}

/// Percentile of an ascending slice, linearly interpolated between the closest ranks.
pub fn percentile_of_sorted(sorted: &[f64], p: Percentile) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = p.quantile() * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;

    let a = *sorted.get(lo)?;
    let b = *sorted.get(hi)?;
    Some(a + (b - a) * (rank - lo as f64))
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}

/// Builds per-metric statistics from a snapshot.
pub fn aggregate(snapshot: &Snapshot, opts: &AggregateOptions) -> BTreeMap<String, Statistics> {
    let mut trends: BTreeMap<String, TrendSeries> = BTreeMap::new();
    for name in [names::HTTP_REQ_DURATION, names::ITERATION_DURATION]
        .into_iter()
        .chain(opts.trends.iter().map(String::as_str))
    {
        trends
            .entry(name.to_string())
            .or_insert_with(|| TrendSeries::new(opts.mode));
    }

    let mut failed = RateStats::default();
    let mut checks = RateStats::default();
    let mut per_check: BTreeMap<String, RateStats> = opts
        .checks
        .iter()
        .map(|c| (check_series_name(c), RateStats::default()))
        .collect();

    for s in snapshot.samples() {
        let single = [RequestTiming {
            latency: s.latency,
            failed: !s.success,
        }];
        let requests: &[RequestTiming] = if s.requests.is_empty() {
            &single
        } else {
            s.requests.as_slice()
        };

        for r in requests {
            if let Some(t) = trends.get_mut(names::HTTP_REQ_DURATION) {
                t.push(millis(r.latency));
            }
            failed.total = failed.total.saturating_add(1);
            failed.passes = failed.passes.saturating_add(u64::from(r.failed));
        }
        if let Some(t) = trends.get_mut(names::ITERATION_DURATION) {
            t.push(millis(s.iteration_duration));
        }

        for c in &s.checks {
            let passed = u64::from(c.passed);
            checks.total = checks.total.saturating_add(1);
            checks.passes = checks.passes.saturating_add(passed);

            let series = per_check.entry(check_series_name(&c.name)).or_default();
            series.total = series.total.saturating_add(1);
            series.passes = series.passes.saturating_add(passed);
        }

        for v in &s.values {
            trends
                .entry(v.name.to_string())
                .or_insert_with(|| TrendSeries::new(opts.mode))
                .push(v.value);
        }
    }

    let mut out: BTreeMap<String, Statistics> = BTreeMap::new();
    for (name, series) in trends {
        out.insert(name, Statistics::Trend(series.finish(&opts.percentiles)));
    }

    out.insert(names::HTTP_REQ_FAILED.to_string(), Statistics::Rate(failed));
    out.insert(names::CHECKS.to_string(), Statistics::Rate(checks));
    for (name, series) in per_check {
        out.insert(name, Statistics::Rate(series));
    }

    let count = snapshot.len() as u64;
    let per_second = opts
        .elapsed
        .filter(|d| !d.is_zero())
        .map(|d| count as f64 / d.as_secs_f64());
    out.insert(
        names::ITERATIONS.to_string(),
        Statistics::Counter(CounterStats { count, per_second }),
    );

    out
}
