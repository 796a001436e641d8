use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use rampr_core::metrics::{Percentile, PercentileMode};
use rampr_core::{RunConfig, Stage, ThresholdDecl, ThresholdSet};
use rampr_http::{
    FilePart, HttpClient, HttpWorkload, MultipartForm, RequestBody, RequestSpec, ResponseCheck,
};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LoadProfileYaml {
    #[serde(default)]
    base_url: Option<String>,

    #[serde(rename = "startVUs", default)]
    start_vus: u64,

    stages: Vec<StageYaml>,

    #[serde(default)]
    thresholds: BTreeMap<String, ThresholdsYaml>,

    #[serde(default)]
    poll_interval: Option<YamlDuration>,
    #[serde(default)]
    think_time: Option<YamlDuration>,
    #[serde(default)]
    progress_interval: Option<YamlDuration>,
    #[serde(default)]
    evaluation_interval: Option<YamlDuration>,

    /// Summary percentiles, e.g. `[50, 90, 95, 99.9]`.
    #[serde(default)]
    percentiles: Option<Vec<f64>>,
    #[serde(default)]
    percentile_mode: Option<String>,
    #[serde(default)]
    fail_on_undetermined: bool,

    #[serde(default)]
    request_timeout: Option<YamlDuration>,
    #[serde(default)]
    connect_timeout: Option<YamlDuration>,

    #[serde(default)]
    requests: Vec<RequestYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct StageYaml {
    duration: YamlDuration,
    target: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ThresholdsYaml {
    One(ThresholdEntryYaml),
    Many(Vec<ThresholdEntryYaml>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ThresholdEntryYaml {
    Expr(String),
    Long(ThresholdLongYaml),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ThresholdLongYaml {
    threshold: String,
    #[serde(default)]
    abort_on_fail: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RequestYaml {
    name: String,
    #[serde(default = "default_method")]
    method: String,
    path: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    multipart: Option<MultipartYaml>,
    #[serde(default)]
    checks: Vec<CheckYaml>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct MultipartYaml {
    #[serde(default)]
    fields: BTreeMap<String, String>,
    #[serde(default)]
    file: Option<FileYaml>,
    #[serde(default)]
    files: Vec<FileYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FileYaml {
    #[serde(default = "default_file_field")]
    field: String,
    /// Relative paths resolve against the profile's directory.
    path: PathBuf,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
}

fn default_file_field() -> String {
    "file".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CheckYaml {
    name: String,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    json_path: Option<String>,
    #[serde(default)]
    equals: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl<'de> serde::de::Visitor<'de> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|v| YamlDuration(Duration::from_secs(v)))
                    .map_err(|_| E::custom("duration cannot be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                crate::cli::parse_duration(v)
                    .map(YamlDuration)
                    .map_err(E::custom)
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// Parsed load profile: the run configuration plus the requests each iteration issues.
#[derive(Debug, Clone)]
pub(crate) struct LoadProfile {
    pub run: RunConfig,
    pub base_url: Option<String>,
    pub request_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub requests: Vec<RequestSpec>,
}

impl LoadProfile {
    /// `base_url` overrides the profile's `baseUrl`.
    pub fn workload(&self, base_url: Option<&str>) -> anyhow::Result<HttpWorkload> {
        let base_url = base_url
            .or(self.base_url.as_deref())
            .context("no base URL: set `baseUrl` in the profile or pass --base-url")?;
        if self.requests.is_empty() {
            anyhow::bail!("the profile declares no requests");
        }

        let client = HttpClient::new(self.connect_timeout.or(Some(Duration::from_secs(3))));
        HttpWorkload::new(
            client,
            base_url,
            self.requests.clone(),
            self.request_timeout,
        )
        .with_context(|| format!("invalid base URL: {base_url}"))
    }
}

pub(crate) async fn load_profile(path: &Path) -> anyhow::Result<LoadProfile> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read load profile: {}", path.display()))?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_profile(&text, base_dir)
        .await
        .with_context(|| format!("invalid load profile: {}", path.display()))
}

async fn parse_profile(text: &str, base_dir: &Path) -> anyhow::Result<LoadProfile> {
    let doc: LoadProfileYaml = serde_yaml::from_str(text).context("failed to parse YAML")?;

    let mut run = RunConfig {
        start_vus: doc.start_vus,
        stages: doc
            .stages
            .into_iter()
            .map(|s| Stage::new(s.duration.into_inner(), s.target))
            .collect(),
        thresholds: doc
            .thresholds
            .into_iter()
            .map(|(metric, t)| threshold_set(metric, t))
            .collect(),
        evaluation_interval: doc.evaluation_interval.map(YamlDuration::into_inner),
        fail_on_undetermined: doc.fail_on_undetermined,
        ..RunConfig::default()
    };
    if let Some(d) = doc.poll_interval {
        run.poll_interval = d.into_inner();
    }
    if let Some(d) = doc.think_time {
        run.think_time = d.into_inner();
    }
    if let Some(d) = doc.progress_interval {
        run.progress_interval = d.into_inner();
    }
    if let Some(ps) = doc.percentiles {
        run.summary_percentiles = ps
            .into_iter()
            .map(Percentile::new)
            .collect::<Result<Vec<_>, _>>()
            .context("invalid `percentiles`")?;
    }
    if let Some(mode) = doc.percentile_mode {
        run.percentile_mode = mode.parse::<PercentileMode>().map_err(|_| {
            anyhow::anyhow!("invalid `percentileMode` `{mode}` (expected exact or approximate)")
        })?;
    }

    let mut requests = Vec::with_capacity(doc.requests.len());
    for r in doc.requests {
        requests.push(request_spec(r, base_dir).await?);
    }

    Ok(LoadProfile {
        run,
        base_url: doc.base_url,
        request_timeout: doc.request_timeout.map(YamlDuration::into_inner),
        connect_timeout: doc.connect_timeout.map(YamlDuration::into_inner),
        requests,
    })
}

fn threshold_set(metric: String, t: ThresholdsYaml) -> ThresholdSet {
    let entries = match t {
        ThresholdsYaml::One(e) => vec![e],
        ThresholdsYaml::Many(es) => es,
    };

    ThresholdSet {
        metric,
        expressions: entries
            .into_iter()
            .map(|e| match e {
                ThresholdEntryYaml::Expr(expression) => ThresholdDecl::from(expression),
                ThresholdEntryYaml::Long(l) => ThresholdDecl {
                    expression: l.threshold,
                    abort_on_fail: l.abort_on_fail,
                },
            })
            .collect(),
    }
}

async fn request_spec(r: RequestYaml, base_dir: &Path) -> anyhow::Result<RequestSpec> {
    let method = http_method(&r.method)
        .with_context(|| format!("request `{}`: invalid method `{}`", r.name, r.method))?;

    let body = match (r.body, r.multipart) {
        (Some(_), Some(_)) => {
            anyhow::bail!("request `{}`: `body` and `multipart` are exclusive", r.name)
        }
        (Some(data), None) => RequestBody::Raw {
            content_type: r.content_type,
            data: data.into(),
        },
        (None, Some(m)) => RequestBody::Multipart(
            multipart_form(m, base_dir)
                .await
                .with_context(|| format!("request `{}`", r.name))?,
        ),
        (None, None) => RequestBody::Empty,
    };

    let checks = r
        .checks
        .into_iter()
        .map(response_check)
        .collect::<anyhow::Result<Vec<_>>>()
        .with_context(|| format!("request `{}`", r.name))?;

    Ok(RequestSpec {
        name: r.name,
        method,
        path: r.path,
        headers: r.headers.into_iter().collect(),
        body,
        checks,
    })
}

fn http_method(raw: &str) -> anyhow::Result<rampr_http::Method> {
    rampr_http::Method::from_bytes(raw.trim().to_ascii_uppercase().as_bytes())
        .map_err(|e| anyhow::anyhow!(e))
}

async fn multipart_form(m: MultipartYaml, base_dir: &Path) -> anyhow::Result<MultipartForm> {
    let mut files = Vec::new();
    for f in m.file.into_iter().chain(m.files) {
        let path = if f.path.is_absolute() {
            f.path
        } else {
            base_dir.join(f.path)
        };
        files.push(FilePart::from_path(f.field, &path, f.filename, f.content_type).await?);
    }

    Ok(MultipartForm {
        fields: m.fields.into_iter().collect(),
        files,
    })
}

fn response_check(c: CheckYaml) -> anyhow::Result<ResponseCheck> {
    match (c.status, c.json_path, c.equals) {
        (Some(status), None, None) => Ok(ResponseCheck::status(c.name, status)),
        (None, Some(path), Some(equals)) => {
            let equals = serde_json::to_value(&equals)
                .with_context(|| format!("check `{}`: unsupported `equals` value", c.name))?;
            Ok(ResponseCheck::json_path(c.name, path, equals))
        }
        (None, Some(_), None) => anyhow::bail!("check `{}`: `jsonPath` requires `equals`", c.name),
        _ => anyhow::bail!(
            "check `{}`: expected either `status` or `jsonPath` + `equals`",
            c.name
        ),
    }
}
