use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::Router;
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_HEALTH: &str = "/health";
pub const PATH_METRICS: &str = "/metrics";
pub const PATH_UPLOAD: &str = "/upload";
pub const PATH_SLOW: &str = "/slow";
pub const PATH_FLAKY: &str = "/flaky";

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    uploads_total: Arc<AtomicU64>,
    upload_bytes: Arc<AtomicU64>,
    flaky_calls: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc_requests_total(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Uploads that carried a `file` part.
    pub fn uploads_total(&self) -> u64 {
        self.uploads_total.load(Ordering::Relaxed)
    }

    /// Bytes received in `file` parts across all uploads.
    pub fn upload_bytes(&self) -> u64 {
        self.upload_bytes.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct TestServerUrls {
    pub base_url: String,
    pub health: String,
    pub metrics: String,
    pub upload: String,
    pub slow: String,
    pub flaky: String,
}

impl TestServerUrls {
    pub fn new(base_url: String) -> Self {
        Self {
            health: format!("{base_url}{PATH_HEALTH}"),
            metrics: format!("{base_url}{PATH_METRICS}"),
            upload: format!("{base_url}{PATH_UPLOAD}"),
            slow: format!("{base_url}{PATH_SLOW}"),
            flaky: format!("{base_url}{PATH_FLAKY}"),
            base_url,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: bool,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    bucket: Option<String>,
    filename: Option<String>,
    size: u64,
}

async fn handle_health(State(stats): State<TestServerStats>) -> Json<HealthResponse> {
    stats.inc_requests_total();
    Json(HealthResponse { status: true })
}

async fn handle_metrics(State(stats): State<TestServerStats>) -> String {
    stats.inc_requests_total();
    format!(
        "# TYPE testserver_requests_total counter\ntestserver_requests_total {}\n\
         # TYPE testserver_uploads_total counter\ntestserver_uploads_total {}\n",
        stats.requests_total(),
        stats.uploads_total()
    )
}

async fn handle_upload(
    State(stats): State<TestServerStats>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, (StatusCode, String)> {
    stats.inc_requests_total();

    let mut bucket = None;
    let mut file: Option<(Option<String>, u64)> = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return Err((StatusCode::BAD_REQUEST, err.body_text())),
        };

        let name = field.name().map(str::to_string);
        let filename = field.file_name().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|err| (StatusCode::BAD_REQUEST, err.body_text()))?;

        match name.as_deref() {
            Some("file") => file = Some((filename, data.len() as u64)),
            Some("bucket") => bucket = Some(String::from_utf8_lossy(&data).into_owned()),
            _ => {}
        }
    }

    let Some((filename, size)) = file else {
        return Err((StatusCode::BAD_REQUEST, "missing file part".to_string()));
    };

    stats.uploads_total.fetch_add(1, Ordering::Relaxed);
    stats.upload_bytes.fetch_add(size, Ordering::Relaxed);
    Ok(Json(UploadResponse {
        bucket,
        filename,
        size,
    }))
}

async fn handle_slow(
    State(stats): State<TestServerStats>,
    Query(query): Query<HashMap<String, String>>,
) -> &'static str {
    stats.inc_requests_total();
    let ms = query
        .get("ms")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(50);
    sleep(Duration::from_millis(ms)).await;
    "slow"
}

/// Fails every `every`-th call (default 20) with a 500.
async fn handle_flaky(
    State(stats): State<TestServerStats>,
    Query(query): Query<HashMap<String, String>>,
) -> StatusCode {
    stats.inc_requests_total();
    let every = query
        .get("every")
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(20);

    let n = stats.flaky_calls.fetch_add(1, Ordering::Relaxed);
    if n % every == 0 {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_HEALTH, get(handle_health))
        .route(PATH_METRICS, get(handle_metrics))
        .route(PATH_UPLOAD, post(handle_upload))
        .route(PATH_SLOW, get(handle_slow))
        .route(PATH_FLAKY, get(handle_flaky))
        .with_state(stats)
}

pub struct TestServer {
    addr: SocketAddr,
    urls: TestServerUrls,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            urls: TestServerUrls::new(format!("http://{addr}")),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.urls.base_url
    }

    pub fn urls(&self) -> &TestServerUrls {
        &self.urls
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
