use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rampr_core::{DeclaredMetrics, IterationContext, Outcome, Workload, WorkloadError};
use tokio::time::Instant;

use super::{Error, HttpClient, HttpRequest, MultipartForm, ResponseCheck, Result};

/// Series name of the per-request latency trend (`http_req_duration{name:<request>}`).
pub fn request_trend_name(request: &str) -> String {
    format!("http_req_duration{{name:{request}}}")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestBody {
    #[default]
    Empty,
    Raw {
        content_type: Option<String>,
        data: Bytes,
    },
    Multipart(MultipartForm),
}

/// One request of an iteration, as configured.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub name: String,
    pub method: http::Method,
    /// Joined onto the workload's base URL; an absolute URL is used as-is.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub checks: Vec<ResponseCheck>,
}

impl RequestSpec {
    pub fn get(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: http::Method::GET,
            path: path.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            checks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_check(mut self, check: ResponseCheck) -> Self {
        self.checks.push(check);
        self
    }
}

#[derive(Debug)]
struct PreparedRequest {
    name: String,
    trend: Arc<str>,
    request: HttpRequest,
    checks: Vec<(Arc<str>, ResponseCheck)>,
}

/// Issues every configured request in order, once per iteration.
///
/// Every request is reported on its own, so `http_req_duration` and `http_req_failed` see
/// one entry per request. A request fails on a transport error or a status of 400 or above,
/// and the iteration fails when any of its requests does. Transport errors also fail every
/// check of that request.
#[derive(Debug, Clone)]
pub struct HttpWorkload {
    client: HttpClient,
    requests: Arc<[PreparedRequest]>,
}

impl HttpWorkload {
    /// Resolves URLs and encodes bodies up front; nothing is read from disk afterwards.
    pub fn new(
        client: HttpClient,
        base_url: &str,
        requests: Vec<RequestSpec>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let base = url::Url::parse(base_url).map_err(|_| Error::InvalidUrl(base_url.to_string()))?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(Error::UnsupportedScheme(base_url.to_string()));
        }

        let prepared = requests
            .into_iter()
            .map(|req| prepare(&base, req, timeout))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            client,
            requests: prepared.into(),
        })
    }
}

fn prepare(base: &url::Url, req: RequestSpec, timeout: Option<Duration>) -> Result<PreparedRequest> {
    let url = base
        .join(&req.path)
        .map_err(|_| Error::InvalidUrl(format!("{base}{}", req.path)))?;

    let mut request = HttpRequest::new(req.method, url.as_str()).with_timeout(timeout);
    request.headers = req.headers;
    match req.body {
        RequestBody::Empty => {}
        RequestBody::Raw { content_type, data } => {
            if let Some(ct) = content_type
                && !request.has_header("content-type")
            {
                request.headers.push(("content-type".to_string(), ct));
            }
            request.body = data;
        }
        RequestBody::Multipart(form) => {
            if !request.has_header("content-type") {
                request
                    .headers
                    .push(("content-type".to_string(), MultipartForm::content_type()));
            }
            request.body = form.encode();
        }
    }

    Ok(PreparedRequest {
        trend: Arc::from(request_trend_name(&req.name)),
        name: req.name,
        request,
        checks: req
            .checks
            .into_iter()
            .map(|c| (Arc::from(c.name.as_str()), c))
            .collect(),
    })
}

impl Workload for HttpWorkload {
    async fn invoke(&self, ctx: &IterationContext) -> std::result::Result<Outcome, WorkloadError> {
        let mut outcome = Outcome::default();

        for prepared in self.requests.iter() {
            let started = Instant::now();
            let res = self.client.request(prepared.request.clone()).await;
            let latency = started.elapsed();

            outcome.latency = outcome.latency.saturating_add(latency);
            outcome = outcome.with_value(prepared.trend.clone(), latency.as_secs_f64() * 1_000.0);

            let response = match res {
                Ok(res) => Some(res),
                Err(err) => {
                    tracing::debug!(
                        vu = ctx.vu,
                        request = %prepared.name,
                        kind = %err.kind(),
                        error = %err,
                        "request failed"
                    );
                    None
                }
            };
            let failed = response.as_ref().is_none_or(|r| r.status >= 400);
            outcome.failed |= failed;
            outcome = outcome.with_request(latency, failed);

            for (name, check) in &prepared.checks {
                outcome = outcome.with_check(name.clone(), check.passes(response.as_ref()));
            }
        }

        Ok(outcome)
    }

    fn declared_metrics(&self) -> DeclaredMetrics {
        DeclaredMetrics {
            checks: self
                .requests
                .iter()
                .flat_map(|r| r.checks.iter().map(|(name, _)| name.to_string()))
                .collect(),
            trends: self.requests.iter().map(|r| r.trend.to_string()).collect(),
        }
    }
}
