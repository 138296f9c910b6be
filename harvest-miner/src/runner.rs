//! Remote test-runner client.
//!
//! [`RunnerApi`] is the seam the result systems and the orchestrator
//! depend on; [`XmlRpcRunner`] implements it over XML-RPC on HTTP. No call
//! retries: a transient failure surfaces as
//! [`MinerError::RunnerUnavailable`] and the next event tries again.

use crate::error::{MinerError, Result};
use crate::xmlrpc::{decode_response, encode_call};
use async_trait::async_trait;
use harvest_common::util::redact_url;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, instrument};

const XMLRPC_PATH: &str = "RPC2/";
const JOB_PATH: &str = "scheduler/job";

/// Answer to `scheduler.job_status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatusInfo {
    pub status: String,
    /// Legacy result bundle id, when the job produced one.
    pub bundle_sha1: Option<String>,
}

/// Answer to `scheduler.job_details`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDetails {
    pub definition: String,
    pub multinode_definition: Option<String>,
    pub is_pipeline: bool,
}

impl JobDetails {
    pub fn is_multinode(&self) -> bool {
        self.multinode_definition.is_some()
    }

    /// The multinode definition when present, else the plain one.
    pub fn effective_definition(&self) -> &str {
        self.multinode_definition
            .as_deref()
            .unwrap_or(&self.definition)
    }
}

#[async_trait]
pub trait RunnerApi: Send + Sync {
    /// Normalized base URL, always `/`-terminated.
    fn base_url(&self) -> &str;

    fn job_url(&self, job_id: &str) -> String {
        format!("{}{}/{}", self.base_url(), JOB_PATH, job_id)
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatusInfo>;

    async fn job_details(&self, job_id: &str) -> Result<JobDetails>;

    /// Raw content of a legacy result bundle.
    async fn result_bundle(&self, sha1: &str) -> Result<String>;

    /// Pipeline result list as a YAML document.
    async fn job_results_yaml(&self, job_id: &str) -> Result<String>;

    /// Submit a definition; returns the (first) new job id.
    async fn submit(&self, definition: &str) -> Result<String>;
}

/// Strip a trailing `RPC2`/`RPC2/` and guarantee a trailing slash.
pub fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_rpc = trimmed
        .strip_suffix("RPC2/")
        .or_else(|| trimmed.strip_suffix("RPC2"))
        .unwrap_or(trimmed);
    if without_rpc.ends_with('/') {
        without_rpc.to_string()
    } else {
        format!("{without_rpc}/")
    }
}

/// XML-RPC runner client over HTTP.
pub struct XmlRpcRunner {
    base_url: String,
    endpoint: String,
    client: reqwest::Client,
    username: Option<String>,
    token: Option<String>,
    trace: bool,
}

impl XmlRpcRunner {
    pub fn new(runner_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base_url(runner_url);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MinerError::RunnerProtocol(format!("failed to build client: {e}")))?;
        Ok(Self {
            endpoint: format!("{base_url}{XMLRPC_PATH}"),
            base_url,
            client,
            username: None,
            token: None,
            trace: false,
        })
    }

    pub fn with_credentials(mut self, username: impl Into<String>, token: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.token = Some(token.into());
        self
    }

    /// Log request and response bodies for this client at debug level.
    pub fn with_tracing(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call(&self, method: &str, params: &[Value]) -> Result<Value> {
        let body = encode_call(method, params)?;
        if self.trace {
            debug!(method, body = %body, "runner rpc request");
        }

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(body);
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.token.as_ref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(MinerError::from_status(&redact_url(&self.endpoint), status));
        }

        let text = response.text().await.map_err(|e| self.unavailable(e))?;
        if self.trace {
            debug!(method, body = %text, "runner rpc response");
        }
        decode_response(&text)
    }

    fn unavailable(&self, err: reqwest::Error) -> MinerError {
        let reason = if err.is_timeout() {
            "timed out".to_string()
        } else if err.is_connect() {
            format!("connection failed: {err}")
        } else {
            err.to_string()
        };
        MinerError::RunnerUnavailable {
            url: redact_url(&self.endpoint),
            reason,
        }
    }
}

fn as_struct<'a>(method: &str, value: &'a Value) -> Result<&'a serde_json::Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| MinerError::RunnerProtocol(format!("{method} did not return a struct")))
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn job_id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.first().and_then(job_id_string),
        _ => None,
    }
}

#[async_trait]
impl RunnerApi for XmlRpcRunner {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(skip(self), fields(runner = %redact_url(&self.base_url)))]
    async fn job_status(&self, job_id: &str) -> Result<JobStatusInfo> {
        let value = self.call("scheduler.job_status", &[json!(job_id)]).await?;
        let fields = as_struct("scheduler.job_status", &value)?;
        let status = fields
            .get("job_status")
            .and_then(Value::as_str)
            .ok_or_else(|| MinerError::RunnerProtocol("job_status missing from response".into()))?
            .to_string();
        Ok(JobStatusInfo {
            status,
            bundle_sha1: non_empty_string(fields.get("bundle_sha1")),
        })
    }

    #[instrument(skip(self), fields(runner = %redact_url(&self.base_url)))]
    async fn job_details(&self, job_id: &str) -> Result<JobDetails> {
        let value = self.call("scheduler.job_details", &[json!(job_id)]).await?;
        let fields = as_struct("scheduler.job_details", &value)?;
        let definition = fields
            .get("definition")
            .and_then(Value::as_str)
            .ok_or_else(|| MinerError::RunnerProtocol("definition missing from response".into()))?
            .to_string();
        Ok(JobDetails {
            definition,
            multinode_definition: non_empty_string(fields.get("multinode_definition")),
            is_pipeline: fields
                .get("is_pipeline")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    #[instrument(skip(self), fields(runner = %redact_url(&self.base_url)))]
    async fn result_bundle(&self, sha1: &str) -> Result<String> {
        let value = self.call("dashboard.get", &[json!(sha1)]).await?;
        let fields = as_struct("dashboard.get", &value)?;
        fields
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| MinerError::RunnerProtocol("bundle content missing".into()))
    }

    #[instrument(skip(self), fields(runner = %redact_url(&self.base_url)))]
    async fn job_results_yaml(&self, job_id: &str) -> Result<String> {
        let value = self
            .call("results.get_testjob_results_yaml", &[json!(job_id)])
            .await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| MinerError::RunnerProtocol("results are not a YAML string".into()))
    }

    #[instrument(skip(self, definition), fields(runner = %redact_url(&self.base_url)))]
    async fn submit(&self, definition: &str) -> Result<String> {
        let value = self.call("scheduler.submit_job", &[json!(definition)]).await?;
        job_id_string(&value)
            .ok_or_else(|| MinerError::RunnerProtocol(format!("unexpected job id {value}")))
    }
}
