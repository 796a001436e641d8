use std::sync::Arc;

mod format;
mod progress;
mod summary;

use format::{format_duration, format_rate};
use progress::HumanProgress;
use summary::render;

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, config_path: &std::path::Path, plan: &rampr_core::RunPlan) {
        let schedule = &plan.schedule;
        println!("profile: {}", config_path.display());
        println!(
            "stages: {} duration={} start_vus={} peak_vus={}",
            schedule.stages().len(),
            format_duration(schedule.total_duration()),
            schedule.start_vus(),
            schedule.peak_target()
        );
        for rule in &plan.rules {
            let abort = if rule.abort_on_fail { " (abort on fail)" } else { "" };
            println!("threshold: {}{abort}", rule.id);
        }
        println!();
    }

    fn progress(&self) -> Option<rampr_core::ProgressFn> {
        let progress = self.progress.clone();

        Some(Arc::new(move |u| {
            let message = format!(
                "stage={}/{} vus={}/{} elapsed={} stage_remaining={} iters={} iters/s={} failed={}",
                u.stage.stage,
                u.stage.stages,
                u.live_vus,
                u.stage.current_target,
                format_duration(u.elapsed),
                format_duration(u.stage.stage_remaining),
                u.iterations_total,
                format_rate(u.iterations_per_sec_now),
                u.failed_total
            );
            progress.update(u.total_duration, u.elapsed, message);
        }))
    }

    fn print_summary(&self, report: &rampr_core::RunReport) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(report));
        Ok(())
    }
}
