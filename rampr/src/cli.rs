use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Humantime durations (`250ms`, `1m30s`); a bare number is seconds and may be fractional.
pub(crate) fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m30s)".to_string());
    }

    if let Ok(secs) = s.parse::<f64>() {
        if !secs.is_finite() || secs < 0.0 {
            return Err(format!("duration '{s}' must be a non-negative, finite number"));
        }
        return Ok(Duration::from_secs_f64(secs));
    }

    humantime::parse_duration(s).map_err(|err| format!("invalid duration '{s}': {err}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar and a plain-text summary.
    HumanReadable,
    /// NDJSON progress and summary lines on stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "rampr",
    author,
    version,
    about = "Staged load verification with threshold verdicts",
    long_about = "rampr ramps a population of virtual users up and down over a list of stages, issues the configured HTTP requests from each of them, and judges the run against latency and error-rate thresholds.\n\nThe exit status is 0 when every threshold passes and 11 when any fails.",
    after_help = "Examples:\n  rampr run load.yaml\n  rampr run load.yaml --base-url http://localhost:9090 --output json\n  rampr validate load.yaml"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load profile
    Run(RunArgs),

    /// Parse and validate a load profile without running it
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the YAML load profile
    pub config: PathBuf,

    /// Override `baseUrl` from the profile
    #[arg(long, env = "RAMPR_BASE_URL")]
    pub base_url: Option<String>,

    /// Override `thinkTime` from the profile (e.g. 1s, 250ms)
    #[arg(long, value_parser = parse_duration)]
    pub think_time: Option<Duration>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,

    /// Disable live progress reporting
    #[arg(long)]
    pub no_progress: bool,

    /// Debug-level logging (unless RAMPR_LOG/RUST_LOG is set)
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Path to the YAML load profile
    pub config: PathBuf,

    /// Debug-level logging (unless RAMPR_LOG/RUST_LOG is set)
    #[arg(short, long)]
    pub verbose: bool,
}
