//! Downstream submission to the reporting service.
//!
//! One multipart POST per harvested job, addressed by build coordinate and
//! environment. The reporting service accepts the submission when it
//! answers below 300.

use async_trait::async_trait;
use harvest_common::util::{mask_secret, origin};
use harvest_common::{BuildCoordinate, ErrorCode, Metadata, NormalizedBenchmark, ReportingConfig};
use harvest_miner::ResultData;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("no reporting token configured for team {team}")]
    MissingToken { team: String },

    #[error("no data to submit")]
    NothingToSubmit,

    #[error("reporting service answered {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("reporting service unreachable: {0}")]
    Transport(String),
}

impl ReportError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingToken { .. } => ErrorCode::ConfigMissingToken,
            Self::NothingToSubmit => ErrorCode::ReportingEmpty,
            Self::Rejected { .. } => ErrorCode::ReportingRejected,
            Self::Transport(_) => ErrorCode::ReportingTransport,
        }
    }
}

/// Payload for one submission.
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub tests: Option<Map<String, Value>>,
    pub metrics: Option<Map<String, Value>>,
    pub metadata: Metadata,
    pub attachment: Option<ResultData>,
}

#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn submit(
        &self,
        build: &BuildCoordinate,
        environment: &str,
        report: &Report,
    ) -> Result<(), ReportError>;
}

/// Submits reports to the reporting service over HTTP.
pub struct SquadReporter {
    base_url: String,
    tokens: BTreeMap<String, String>,
    client: reqwest::Client,
}

impl SquadReporter {
    pub fn new(config: &ReportingConfig) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ReportError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: config.url.clone(),
            tokens: config.tokens.clone(),
            client,
        })
    }

    /// `<origin>/api/submit/<team>/<project>/<build>/<environment>`; any
    /// path on the configured URL is ignored.
    pub fn submit_url(&self, build: &BuildCoordinate, environment: &str) -> String {
        let base = origin(&self.base_url).unwrap_or_else(|| self.base_url.trim_end_matches('/').to_string());
        format!(
            "{base}/api/submit/{}/{}/{}/{environment}",
            build.team, build.project, build.build
        )
    }
}

#[async_trait]
impl ReportSink for SquadReporter {
    async fn submit(
        &self,
        build: &BuildCoordinate,
        environment: &str,
        report: &Report,
    ) -> Result<(), ReportError> {
        let Some(token) = self.tokens.get(&build.team) else {
            warn!(team = %build.team, "reporting token not found");
            return Err(ReportError::MissingToken {
                team: build.team.clone(),
            });
        };
        if report.tests.is_none() && report.metrics.is_none() {
            warn!(build = %build, "no data to submit");
            return Err(ReportError::NothingToSubmit);
        }

        let mut form = reqwest::multipart::Form::new();
        if let Some(tests) = &report.tests {
            form = form.text("tests", Value::Object(tests.clone()).to_string());
        }
        if let Some(metrics) = &report.metrics {
            form = form.text("metrics", Value::Object(metrics.clone()).to_string());
        }
        form = form.text("metadata", Value::Object(report.metadata.clone()).to_string());
        if let Some(data) = &report.attachment {
            let part = reqwest::multipart::Part::bytes(data.content.clone())
                .file_name(data.filename.clone());
            form = form.part("attachment", part);
        }

        let url = self.submit_url(build, environment);
        debug!(url = %url, token = %mask_secret(token), "submitting report");

        let response = self
            .client
            .post(&url)
            .header("Auth-Token", token.as_str())
            .multipart(form)
            .send()
            .await
            .map_err(|e| ReportError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if status < 300 {
            info!(url = %url, status, "report accepted");
            Ok(())
        } else {
            warn!(url = %url, status, body = %body, "report rejected");
            Err(ReportError::Rejected { status, body })
        }
    }
}

/// Flattened metrics and per-group value summaries for a job's benchmarks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    /// `<group><benchmark>/<subscore>` to every measurement recorded for it.
    pub metrics: Map<String, Value>,
    /// Group path to all measurements under it; `/` holds every grouped value.
    pub summary: BTreeMap<String, Vec<f64>>,
}

pub const ROOT_GROUP: &str = "/";

pub fn aggregate(benchmarks: &[NormalizedBenchmark]) -> Aggregate {
    let mut metrics: Map<String, Value> = Map::new();
    let mut summary: BTreeMap<String, Vec<f64>> = BTreeMap::new();

    for benchmark in benchmarks {
        let prefix = benchmark.group.as_deref().unwrap_or_default();
        for subscore in &benchmark.subscores {
            let key = format!("{prefix}{}/{}", benchmark.name, subscore.name);
            if let Value::Array(values) = metrics
                .entry(key)
                .or_insert_with(|| Value::Array(Vec::new()))
            {
                values.push(Value::from(subscore.measurement));
            }

            if let Some(group) = &benchmark.group {
                summary.entry(group.clone()).or_default().push(subscore.measurement);
                summary
                    .entry(ROOT_GROUP.to_string())
                    .or_default()
                    .push(subscore.measurement);
            }
        }
    }

    Aggregate { metrics, summary }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use harvest_common::testing::init_test_logging;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Captured {
        path: String,
        token: Option<String>,
        body: String,
    }

    type Shared = Arc<Mutex<Vec<Captured>>>;

    async fn capture(
        State(seen): State<Shared>,
        uri: axum::http::Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> StatusCode {
        let token = headers
            .get("auth-token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let reject = uri.path().ends_with("/broken");
        seen.lock().unwrap().push(Captured {
            path: uri.path().to_string(),
            token,
            body: String::from_utf8_lossy(&body).into_owned(),
        });
        if reject {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::CREATED
        }
    }

    async fn spawn_service() -> (String, Shared) {
        let seen: Shared = Arc::default();
        let app = Router::new()
            .route("/api/submit/{team}/{project}/{build}/{env}", post(capture))
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/ignored/prefix/"), seen)
    }

    fn reporter(url: &str) -> SquadReporter {
        let config = ReportingConfig {
            url: url.to_string(),
            timeout_secs: 5,
            tokens: BTreeMap::from([("qa".to_string(), "team-token-123".to_string())]),
        };
        SquadReporter::new(&config).unwrap()
    }

    fn report() -> Report {
        let mut metadata = Metadata::new();
        metadata.insert("job_id".into(), Value::from("4242"));
        let agg = aggregate(&[benchmark()]);
        Report {
            tests: None,
            metrics: Some(agg.metrics),
            metadata,
            attachment: Some(ResultData {
                filename: "results.json".into(),
                content: b"{\"raw\": true}".to_vec(),
            }),
        }
    }

    fn benchmark() -> NormalizedBenchmark {
        let mut b = NormalizedBenchmark::new("Sort").with_group("benchmarks/micro/");
        b.push("quick", 1.0);
        b.push("quick", 3.0);
        b.push("merge", 2.0);
        b
    }

    #[test]
    fn test_submit_url_uses_origin() {
        let r = reporter("https://reports.example.org/some/prefix/");
        assert_eq!(
            r.submit_url(&BuildCoordinate::new("qa", "linux", "v6.1"), "juno"),
            "https://reports.example.org/api/submit/qa/linux/v6.1/juno"
        );
    }

    #[test]
    fn test_aggregate_metrics_and_summary() {
        let mut ungrouped = NormalizedBenchmark::new("boot");
        ungrouped.push("boot_time", 11.0);

        let agg = aggregate(&[benchmark(), ungrouped]);
        assert_eq!(
            agg.metrics["benchmarks/micro/Sort/quick"],
            serde_json::json!([1.0, 3.0])
        );
        assert_eq!(agg.metrics["boot/boot_time"], serde_json::json!([11.0]));
        assert_eq!(agg.summary["benchmarks/micro/"], vec![1.0, 3.0, 2.0]);
        assert_eq!(agg.summary[ROOT_GROUP], vec![1.0, 3.0, 2.0]);
        assert_eq!(agg.summary.len(), 2);
    }

    proptest::proptest! {
        #[test]
        fn prop_root_summary_holds_every_grouped_value(
            groups in proptest::collection::vec(
                (proptest::option::of("[a-z]{1,4}/"), proptest::collection::vec(0.0f64..1000.0, 0..5)),
                0..6,
            )
        ) {
            let benchmarks: Vec<NormalizedBenchmark> = groups
                .iter()
                .enumerate()
                .map(|(i, (group, values))| {
                    let mut b = NormalizedBenchmark::new(format!("bench{i}"));
                    b.group = group.clone();
                    for v in values {
                        b.push("score", *v);
                    }
                    b
                })
                .collect();

            let agg = aggregate(&benchmarks);
            let grouped: usize = groups
                .iter()
                .filter(|(g, _)| g.is_some())
                .map(|(_, v)| v.len())
                .sum();
            let total: usize = groups.iter().map(|(_, v)| v.len()).sum();
            let metric_values: usize = agg
                .metrics
                .values()
                .map(|v| v.as_array().map_or(0, Vec::len))
                .sum();

            proptest::prop_assert_eq!(agg.summary.get(ROOT_GROUP).map_or(0, Vec::len), grouped);
            proptest::prop_assert_eq!(metric_values, total);
        }
    }

    #[tokio::test]
    async fn test_submit_sends_multipart_with_token() {
        init_test_logging();
        let (url, seen) = spawn_service().await;
        let r = reporter(&url);

        r.submit(&BuildCoordinate::new("qa", "linux", "v6.1"), "juno", &report())
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].path, "/api/submit/qa/linux/v6.1/juno");
        assert_eq!(seen[0].token.as_deref(), Some("team-token-123"));
        assert!(seen[0].body.contains("name=\"metrics\""));
        assert!(seen[0].body.contains("name=\"metadata\""));
        assert!(seen[0].body.contains("filename=\"results.json\""));
        assert!(!seen[0].body.contains("name=\"tests\""));
    }

    #[tokio::test]
    async fn test_rejected_submission() {
        init_test_logging();
        let (url, _seen) = spawn_service().await;
        let err = reporter(&url)
            .submit(&BuildCoordinate::new("qa", "linux", "v6.1"), "broken", &report())
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Rejected { status: 400, .. }));
        assert_eq!(err.code(), ErrorCode::ReportingRejected);
    }

    #[tokio::test]
    async fn test_missing_token_makes_no_request() {
        init_test_logging();
        let (url, seen) = spawn_service().await;
        let err = reporter(&url)
            .submit(&BuildCoordinate::new("other", "linux", "v6.1"), "juno", &report())
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::MissingToken { ref team } if team == "other"));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nothing_to_submit() {
        let r = reporter("http://127.0.0.1:9/");
        let err = r
            .submit(&BuildCoordinate::new("qa", "p", "b"), "env", &Report::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::NothingToSubmit));
    }
}
