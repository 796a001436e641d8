use anyhow::Context as _;

use crate::cli::{RunArgs, ValidateArgs};
use crate::config_yaml::{LoadProfile, load_profile};
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let mut profile = load(&args.config).await?;
    if let Some(think_time) = args.think_time {
        profile.run.think_time = think_time;
    }
    let workload = profile
        .workload(args.base_url.as_deref())
        .map_err(RunError::InvalidInput)?;

    let mut controller = rampr_core::RunController::new(profile.run, workload)?;
    out.print_header(&args.config, controller.plan());
    if !args.no_progress
        && let Some(progress) = out.progress()
    {
        controller = controller.with_progress(progress);
    }

    let abort = controller.abort_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; draining virtual users");
            abort.abort();
        }
    });

    let res = controller.run().await;
    ctrl_c.abort();
    let report = res?;

    out.print_summary(&report)
        .context("failed to print summary")
        .map_err(RunError::RuntimeError)?;

    Ok(ExitCode::from_verdict(&report.verdict))
}

pub async fn validate(args: ValidateArgs) -> Result<ExitCode, RunError> {
    let profile = load(&args.config).await?;
    // Requests are checked even when the base URL only arrives with `run --base-url`.
    let base_url = profile
        .base_url
        .clone()
        .unwrap_or_else(|| "http://localhost".to_string());
    let workload = profile
        .workload(Some(&base_url))
        .map_err(RunError::InvalidInput)?;

    let controller = rampr_core::RunController::new(profile.run, workload)?;
    let plan = controller.plan();
    println!(
        "ok: {} stages, {} thresholds, peak {} VUs over {:?}",
        plan.schedule.stages().len(),
        plan.rules.len(),
        plan.schedule.peak_target(),
        plan.schedule.total_duration()
    );
    Ok(ExitCode::Success)
}

async fn load(path: &std::path::Path) -> Result<LoadProfile, RunError> {
    load_profile(path).await.map_err(RunError::InvalidInput)
}
