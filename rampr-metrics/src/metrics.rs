use hdrhistogram::Histogram;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Built-in metric names derived from recorded samples.
pub mod names {
    pub const HTTP_REQ_DURATION: &str = "http_req_duration";
    pub const HTTP_REQ_FAILED: &str = "http_req_failed";
    pub const ITERATION_DURATION: &str = "iteration_duration";
    pub const ITERATIONS: &str = "iterations";
    pub const CHECKS: &str = "checks";
}

/// Series name of a single named check (`checks{check:<name>}`).
pub fn check_series_name(check: &str) -> String {
    format!("{}{{check:{check}}}", names::CHECKS)
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid percentile `{0}` (expected a number in (0, 100] with at most two decimals)")]
    InvalidPercentile(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Rate,
    Trend,
}

impl MetricKind {
    /// Kind of a built-in series, or of a per-check series.
    pub fn of_builtin(name: &str) -> Option<Self> {
        match name {
            names::HTTP_REQ_DURATION | names::ITERATION_DURATION => Some(Self::Trend),
            names::HTTP_REQ_FAILED | names::CHECKS => Some(Self::Rate),
            names::ITERATIONS => Some(Self::Counter),
            _ if name.starts_with("checks{check:") && name.ends_with('}') => Some(Self::Rate),
            _ => None,
        }
    }
}

/// A percentile stored in hundredths of a percent, so `p(99.9)` is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Percentile(u32);

impl Percentile {
    pub const P50: Self = Self(5_000);
    pub const P90: Self = Self(9_000);
    pub const P95: Self = Self(9_500);
    pub const P99: Self = Self(9_900);

    /// Accepts values in (0, 100] with at most two decimals.
    pub fn new(percent: f64) -> Result<Self, Error> {
        let scaled = percent * 100.0;
        let hundredths = scaled.round();
        if !scaled.is_finite()
            || (scaled - hundredths).abs() > 1e-6
            || hundredths < 1.0
            || hundredths > 10_000.0
        {
            return Err(Error::InvalidPercentile(percent.to_string()));
        }
        Ok(Self(hundredths as u32))
    }

    pub fn percent(self) -> f64 {
        f64::from(self.0) / 100.0
    }

    /// The percentile as a quantile in `[0, 1]`.
    pub fn quantile(self) -> f64 {
        f64::from(self.0) / 10_000.0
    }

    pub fn defaults() -> Vec<Self> {
        vec![Self::P50, Self::P90, Self::P95, Self::P99]
    }
}

impl fmt::Display for Percentile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / 100;
        let frac = self.0 % 100;
        if frac == 0 {
            write!(f, "p({whole})")
        } else if frac % 10 == 0 {
            write!(f, "p({whole}.{})", frac / 10)
        } else {
            write!(f, "p({whole}.{frac:02})")
        }
    }
}

impl FromStr for Percentile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v: f64 = s
            .trim()
            .parse()
            .map_err(|_| Error::InvalidPercentile(s.to_string()))?;
        Self::new(v)
    }
}

/// Aggregated statistics of one metric series.
#[derive(Debug, Clone, PartialEq)]
pub enum Statistics {
    Trend(TrendStats),
    Rate(RateStats),
    Counter(CounterStats),
}

impl Statistics {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Trend(_) => MetricKind::Trend,
            Self::Rate(_) => MetricKind::Rate,
            Self::Counter(_) => MetricKind::Counter,
        }
    }

    /// Number of observations the statistics were built from.
    pub fn count(&self) -> u64 {
        match self {
            Self::Trend(t) => t.count,
            Self::Rate(r) => r.total,
            Self::Counter(c) => c.count,
        }
    }
}

/// Numeric series summary. Time series are expressed in milliseconds.
///
/// Every derived value is `None` when the series has no samples.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrendStats {
    pub count: u64,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub med: Option<f64>,
    pub percentiles: BTreeMap<Percentile, f64>,
}

impl TrendStats {
    pub fn percentile(&self, p: Percentile) -> Option<f64> {
        self.percentiles.get(&p).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RateStats {
    pub total: u64,
    /// Observations that were `true` (a failed request for `http_req_failed`,
    /// a passed check for `checks`).
    pub passes: u64,
}

impl RateStats {
    pub fn rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.passes as f64 / self.total as f64)
    }

    pub fn fails(&self) -> u64 {
        self.total.saturating_sub(self.passes)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CounterStats {
    pub count: u64,
    pub per_second: Option<f64>,
}

pub(crate) fn new_default_histogram() -> Histogram<u64> {
    // Values are recorded in microseconds. Upper bound: 1 hour.
    match Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_parses_whole_and_decimal_values() {
        assert_eq!("95".parse::<Percentile>(), Ok(Percentile::P95));
        let p999: Percentile = "99.9".parse().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(p999.to_string(), "p(99.9)");
        assert!((p999.quantile() - 0.999).abs() < 1e-12);
        assert_eq!(Percentile::P50.to_string(), "p(50)");
    }

    #[test]
    fn percentile_rejects_out_of_range() {
        assert!("0".parse::<Percentile>().is_err());
        assert!("100.5".parse::<Percentile>().is_err());
        assert!("abc".parse::<Percentile>().is_err());
        assert!("99.999".parse::<Percentile>().is_err());
        assert!("0.001".parse::<Percentile>().is_err());
        assert!("0.01".parse::<Percentile>().is_ok());
        assert!("99.99".parse::<Percentile>().is_ok());
        assert!("100".parse::<Percentile>().is_ok());
    }

    #[test]
    fn rate_is_undetermined_without_observations() {
        let r = RateStats::default();
        assert_eq!(r.rate(), None);

        let r = RateStats {
            total: 4,
            passes: 1,
        };
        assert_eq!(r.rate(), Some(0.25));
        assert_eq!(r.fails(), 3);
    }

    #[test]
    fn builtin_kinds_cover_check_series() {
        assert_eq!(
            MetricKind::of_builtin(names::HTTP_REQ_DURATION),
            Some(MetricKind::Trend)
        );
        assert_eq!(
            MetricKind::of_builtin(&check_series_name("status is 200")),
            Some(MetricKind::Rate)
        );
        assert_eq!(MetricKind::of_builtin("nope"), None);
        assert_eq!(MetricKind::Trend.to_string(), "trend");
    }
}
