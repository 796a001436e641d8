use crate::cli::OutputFormat;
use std::path::Path;

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, config_path: &Path, plan: &rampr_core::RunPlan);
    fn progress(&self) -> Option<rampr_core::ProgressFn>;
    fn print_summary(&self, report: &rampr_core::RunReport) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
