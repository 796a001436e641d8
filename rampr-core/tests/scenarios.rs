use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rampr_core::metrics::{Percentile, Statistics, names};
use rampr_core::{
    DeclaredMetrics, Outcome, Phase, ProgressFn, ProgressUpdate, RuleStatus, RunConfig,
    RunController, RunReport, Stage, StopReason, ThresholdDecl, ThresholdSet, Workload,
    WorkloadError, workload_fn,
};

const P95_RULE: &str = "http_req_duration: p(95)<500ms";
const FAILED_RULE: &str = "http_req_failed: rate<0.01";

fn load_profile() -> RunConfig {
    RunConfig {
        stages: vec![
            Stage::new(Duration::from_secs(30), 20),
            Stage::new(Duration::from_secs(60), 20),
            Stage::new(Duration::from_secs(30), 0),
        ],
        thresholds: vec![
            ThresholdSet::new(names::HTTP_REQ_DURATION, ["p(95)<500ms"]),
            ThresholdSet::new(names::HTTP_REQ_FAILED, ["rate<0.01"]),
        ],
        think_time: Duration::from_secs(1),
        ..RunConfig::default()
    }
}

fn collect_progress() -> (ProgressFn, Arc<Mutex<Vec<ProgressUpdate>>>) {
    let seen: Arc<Mutex<Vec<ProgressUpdate>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let f: ProgressFn = Arc::new(move |u| {
        sink.lock().unwrap_or_else(|p| p.into_inner()).push(u);
    });
    (f, seen)
}

async fn run_tracked<W: Workload>(cfg: RunConfig, workload: W) -> (RunReport, Vec<ProgressUpdate>) {
    let (progress, seen) = collect_progress();
    let controller = RunController::new(cfg, workload)
        .unwrap_or_else(|e| panic!("{e}"))
        .with_progress(progress);

    let report = controller.run().await.unwrap_or_else(|e| panic!("{e}"));
    let updates = seen.lock().unwrap_or_else(|p| p.into_inner()).clone();
    (report, updates)
}

fn assert_tracked_schedule(updates: &[ProgressUpdate]) {
    assert!(updates.len() >= 100, "expected ~120 progress ticks, got {}", updates.len());
    for u in updates {
        let diff = u.live_vus.abs_diff(u.stage.current_target);
        assert!(
            diff <= 1,
            "pool drifted from schedule at {:?}: live={} target={}",
            u.elapsed,
            u.live_vus,
            u.stage.current_target
        );
    }
    assert!(updates.iter().any(|u| u.live_vus == 20));
}

fn rule_status(report: &RunReport, id: &str) -> RuleStatus {
    match report.verdict.per_rule.get(id) {
        Some(r) => r.status,
        None => panic!("missing rule {id}"),
    }
}

#[tokio::test(start_paused = true)]
async fn all_successful_iterations_pass() {
    let workload = workload_fn(|_| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(Outcome::success(Duration::from_millis(50)))
    });

    let (report, updates) = run_tracked(load_profile(), workload).await;

    assert!(report.verdict.is_pass());
    assert_eq!(rule_status(&report, P95_RULE), RuleStatus::Pass);
    assert_eq!(rule_status(&report, FAILED_RULE), RuleStatus::Pass);
    assert_eq!(report.stop_reason, StopReason::ScheduleCompleted);
    assert_eq!(report.peak_vus, 20);
    assert!(report.iterations > 1_000, "iterations={}", report.iterations);
    assert!(report.errors.is_empty());

    match report.verdict.per_metric.get(names::HTTP_REQ_DURATION) {
        Some(Statistics::Trend(t)) => {
            assert_eq!(t.percentile(Percentile::P95), Some(50.0));
            assert_eq!(t.count, report.iterations);
        }
        other => panic!("unexpected http_req_duration: {other:?}"),
    }
    assert_tracked_schedule(&updates);
}

#[tokio::test(start_paused = true)]
async fn five_percent_failures_violate_rate_threshold() {
    let counter = Arc::new(AtomicU64::new(0));
    let workload = {
        let counter = counter.clone();
        workload_fn(move |_| {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                if n % 20 == 0 {
                    Ok(Outcome::failure(Duration::from_millis(50)))
                } else {
                    Ok(Outcome::success(Duration::from_millis(50)))
                }
            }
        })
    };

    let (report, _) = run_tracked(load_profile(), workload).await;

    assert!(!report.verdict.is_pass());
    assert_eq!(rule_status(&report, FAILED_RULE), RuleStatus::Fail);
    assert_eq!(rule_status(&report, P95_RULE), RuleStatus::Pass);

    let observed = report.verdict.per_rule[FAILED_RULE]
        .observed
        .unwrap_or_else(|| panic!("rate should be determined"));
    assert!((observed - 0.05).abs() < 0.002, "observed={observed}");
}

#[tokio::test(start_paused = true)]
async fn workload_errors_fail_the_run_without_disturbing_the_schedule() {
    let workload = workload_fn(|_| async { Err::<Outcome, _>(WorkloadError::new("connection refused")) });

    let (report, updates) = run_tracked(load_profile(), workload).await;

    assert!(!report.verdict.is_pass());
    assert_eq!(rule_status(&report, FAILED_RULE), RuleStatus::Fail);
    assert_eq!(report.verdict.per_rule[FAILED_RULE].observed, Some(1.0));
    assert_eq!(
        report.errors.get("connection refused").copied(),
        Some(report.iterations)
    );
    assert_eq!(report.peak_vus, 20);
    assert_eq!(report.stop_reason, StopReason::ScheduleCompleted);
    assert_tracked_schedule(&updates);
}

#[tokio::test(start_paused = true)]
async fn external_abort_drains_and_still_produces_a_verdict() {
    let workload = workload_fn(|_| async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(Outcome::success(Duration::from_millis(100)))
    });
    let controller =
        RunController::new(load_profile(), workload).unwrap_or_else(|e| panic!("{e}"));

    let mut rx = controller.phase_watch();
    let mut seen = vec![*rx.borrow_and_update()];
    let observer = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let phase = *rx.borrow_and_update();
            seen.push(phase);
            if matches!(phase, Phase::Completed | Phase::Faulted) {
                break;
            }
        }
        seen
    });

    let abort = controller.abort_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        abort.abort();
        abort.abort();
    });

    let report = controller.run().await.unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(report.stop_reason, StopReason::Aborted);
    assert!(report.duration < Duration::from_secs(11));
    assert!(report.iterations > 0);
    assert!(report.verdict.is_pass());

    let phases = observer.await.unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(
        phases,
        vec![Phase::Idle, Phase::Running, Phase::Draining, Phase::Completed]
    );
}

#[tokio::test(start_paused = true)]
async fn abort_on_fail_threshold_stops_the_run_early() {
    let cfg = RunConfig {
        thresholds: vec![ThresholdSet {
            metric: names::HTTP_REQ_FAILED.to_string(),
            expressions: vec![ThresholdDecl {
                expression: "rate<0.01".to_string(),
                abort_on_fail: true,
            }],
        }],
        evaluation_interval: Some(Duration::from_secs(5)),
        ..load_profile()
    };
    let workload = workload_fn(|_| async { Ok(Outcome::failure(Duration::from_millis(5))) });

    let controller = RunController::new(cfg, workload).unwrap_or_else(|e| panic!("{e}"));
    let report = controller.run().await.unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(report.stop_reason, StopReason::ThresholdAbort);
    assert!(report.duration < Duration::from_secs(6));
    assert_eq!(rule_status(&report, FAILED_RULE), RuleStatus::Fail);
}

#[tokio::test(start_paused = true)]
async fn ramp_down_lets_in_flight_iterations_finish() {
    let started = Arc::new(AtomicU64::new(0));
    let workload = {
        let started = started.clone();
        workload_fn(move |_| {
            started.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(700)).await;
                Ok(Outcome::success(Duration::from_millis(700)))
            }
        })
    };
    let cfg = RunConfig {
        stages: vec![
            Stage::new(Duration::from_secs(2), 10),
            Stage::new(Duration::from_secs(2), 0),
        ],
        think_time: Duration::ZERO,
        ..RunConfig::default()
    };

    let controller = RunController::new(cfg, workload).unwrap_or_else(|e| panic!("{e}"));
    let report = controller.run().await.unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(started.load(Ordering::SeqCst), report.iterations);
    match report.verdict.per_metric.get(names::ITERATION_DURATION) {
        Some(Statistics::Trend(t)) => {
            assert!(t.min.is_some_and(|ms| ms >= 700.0), "min={:?}", t.min);
        }
        other => panic!("unexpected iteration_duration: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn empty_run_reports_undetermined_rules() {
    // The declared check is never emitted, so its series stays empty.
    let workload = workload_fn(|_| async { Ok(Outcome::success(Duration::from_millis(1))) })
        .with_declared(DeclaredMetrics {
            checks: vec!["never evaluated".to_string()],
            trends: Vec::new(),
        });
    let cfg = RunConfig {
        start_vus: 1,
        stages: vec![Stage::new(Duration::from_secs(1), 1)],
        thresholds: vec![ThresholdSet::new(
            "checks{check:never evaluated}",
            ["rate>0.99"],
        )],
        ..RunConfig::default()
    };

    let controller = RunController::new(cfg.clone(), workload.clone())
        .unwrap_or_else(|e| panic!("{e}"));
    let report = controller.run().await.unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(
        rule_status(&report, "checks{check:never evaluated}: rate>0.99"),
        RuleStatus::Undetermined
    );
    assert!(report.verdict.is_pass());

    let strict = RunConfig {
        fail_on_undetermined: true,
        ..cfg
    };
    let controller = RunController::new(strict, workload).unwrap_or_else(|e| panic!("{e}"));
    let report = controller.run().await.unwrap_or_else(|e| panic!("{e}"));
    assert!(!report.verdict.is_pass());
}

#[tokio::test(start_paused = true)]
async fn independent_runs_coexist() {
    let fast = workload_fn(|_| async { Ok(Outcome::success(Duration::from_millis(10))) });
    let failing = workload_fn(|_| async { Ok(Outcome::failure(Duration::from_millis(10))) });

    let cfg = || RunConfig {
        stages: vec![Stage::new(Duration::from_secs(5), 4)],
        ..load_profile()
    };
    let a = RunController::new(cfg(), fast).unwrap_or_else(|e| panic!("{e}"));
    let b = RunController::new(cfg(), failing).unwrap_or_else(|e| panic!("{e}"));

    let (a, b) = tokio::join!(a.run(), b.run());
    let a = a.unwrap_or_else(|e| panic!("{e}"));
    let b = b.unwrap_or_else(|e| panic!("{e}"));

    assert!(a.verdict.is_pass());
    assert!(!b.verdict.is_pass());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runs_on_the_multi_thread_runtime() {
    let cfg = RunConfig {
        stages: vec![
            Stage::new(Duration::from_millis(300), 8),
            Stage::new(Duration::from_millis(300), 0),
        ],
        poll_interval: Duration::from_millis(10),
        think_time: Duration::from_millis(5),
        ..load_profile()
    };
    let workload = workload_fn(|_| async {
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok(Outcome::success(Duration::from_millis(2)).with_check("ok", true))
    });

    let controller = RunController::new(cfg, workload).unwrap_or_else(|e| panic!("{e}"));
    let recorder = controller.recorder().clone();
    let report = controller.run().await.unwrap_or_else(|e| panic!("{e}"));

    assert!(report.verdict.is_pass());
    assert_eq!(report.iterations, recorder.recorded());
    match report.verdict.per_metric.get(names::CHECKS) {
        Some(Statistics::Rate(r)) => assert_eq!(r.total, report.iterations),
        other => panic!("unexpected checks: {other:?}"),
    }
}
