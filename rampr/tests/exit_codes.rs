use std::path::Path;
use std::process::{Command, Output};

use anyhow::Context as _;
use rampr_testserver::TestServer;

fn status_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn write_profile(dir: &Path, yaml: &str) -> anyhow::Result<std::path::PathBuf> {
    let path = dir.join("load.yaml");
    std::fs::write(&path, yaml).context("write load profile")?;
    Ok(path)
}

async fn rampr(args: Vec<String>) -> anyhow::Result<Output> {
    let exe = env!("CARGO_BIN_EXE_rampr");
    tokio::task::spawn_blocking(move || {
        Command::new(exe)
            .args(&args)
            .env_remove("RAMPR_BASE_URL")
            .output()
    })
    .await
    .context("spawn_blocking join")?
    .context("run rampr binary")
}

fn ensure_code(out: &Output, expected: i32) -> anyhow::Result<()> {
    anyhow::ensure!(
        status_code(out.status) == expected,
        "expected exit code {expected}, got {}\nstdout:\n{}\nstderr:\n{}",
        status_code(out.status),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    Ok(())
}

const SHORT_PROFILE: &str = r#"
startVUs: 1
stages:
  - { duration: 500ms, target: 3 }
  - { duration: 500ms, target: 0 }
thinkTime: 50ms
pollInterval: 20ms
progressInterval: 200ms
thresholds:
  http_req_duration: ["p(95)<1s"]
  http_req_failed: ["rate<0.01"]
requests:
  - name: health
    path: /health
    checks:
      - { name: "health check status is 200", status: 200 }
      - { name: "health check response is healthy", jsonPath: status, equals: true }
  - name: upload
    method: POST
    path: /upload
    multipart:
      file: { path: ./test.jpg }
      fields: { bucket: test-bucket }
    checks: [{ name: "upload status is 200", status: 200 }]
"#;

#[test]
fn invalid_flags_exit_30() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_rampr");

    let out = Command::new(exe)
        .arg("run")
        .arg("./does-not-matter.yaml")
        .arg("--think-time")
        .arg("10x")
        .output()
        .context("run rampr binary")?;

    ensure_code(&out, 30)
}

#[tokio::test]
async fn missing_profile_exits_30() -> anyhow::Result<()> {
    let out = rampr(vec!["run".into(), "./definitely-missing.yaml".into()]).await?;
    ensure_code(&out, 30)
}

#[tokio::test]
async fn invalid_threshold_exits_30() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_profile(
        dir.path(),
        r#"
baseUrl: http://127.0.0.1:1
stages: [{ duration: 1s, target: 1 }]
thresholds:
  http_req_duration: ["p(95)<<500"]
requests: [{ name: health, path: /health }]
"#,
    )?;

    let out = rampr(vec!["validate".into(), path.display().to_string()]).await?;
    ensure_code(&out, 30)?;

    let out = rampr(vec!["run".into(), path.display().to_string()]).await?;
    ensure_code(&out, 30)
}

#[tokio::test]
async fn validate_accepts_a_good_profile() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("test.jpg"), [0xff, 0xd8, 0xff])?;
    let path = write_profile(dir.path(), SHORT_PROFILE)?;

    let out = rampr(vec!["validate".into(), path.display().to_string()]).await?;
    ensure_code(&out, 0)?;
    anyhow::ensure!(String::from_utf8_lossy(&out.stdout).starts_with("ok:"));
    Ok(())
}

#[tokio::test]
async fn passing_run_exits_0_with_json_summary() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("test.jpg"), [0xff, 0xd8, 0xff, 0xe0])?;
    let path = write_profile(dir.path(), SHORT_PROFILE)?;

    let out = rampr(vec![
        "run".into(),
        path.display().to_string(),
        "--base-url".into(),
        server.base_url().to_string(),
        "--output".into(),
        "json".into(),
    ])
    .await?;
    let uploads = server.stats().uploads_total();
    server.shutdown().await;

    ensure_code(&out, 0)?;

    let stdout = String::from_utf8_lossy(&out.stdout);
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()
        .context("stdout is NDJSON")?;

    let summary = lines.last().context("no summary line")?;
    anyhow::ensure!(summary["kind"] == "summary", "last line: {summary}");
    anyhow::ensure!(summary["verdict"] == "pass", "summary: {summary}");
    anyhow::ensure!(summary["stop_reason"] == "schedule-completed");
    anyhow::ensure!(summary["iterations"].as_u64() == Some(uploads));
    anyhow::ensure!(lines.iter().any(|l| l["kind"] == "progress"));
    Ok(())
}

#[tokio::test]
async fn failing_thresholds_exit_11() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir()?;
    let path = write_profile(
        dir.path(),
        &format!(
            r#"
baseUrl: {}
stages: [{{ duration: 500ms, target: 2 }}]
startVUs: 2
thinkTime: 20ms
thresholds:
  http_req_failed: ["rate<0.01"]
requests:
  - name: flaky
    path: /flaky?every=1
"#,
            server.base_url()
        ),
    )?;

    let out = rampr(vec![
        "run".into(),
        path.display().to_string(),
        "--no-progress".into(),
    ])
    .await?;
    server.shutdown().await;

    ensure_code(&out, 11)?;
    let stdout = String::from_utf8_lossy(&out.stdout);
    anyhow::ensure!(stdout.contains("verdict: FAIL"), "stdout:\n{stdout}");
    Ok(())
}
