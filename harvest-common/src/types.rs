//! Common types used across harvester components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Key/value metadata recovered from a job definition.
///
/// Insertion order is preserved so the payload sent downstream mirrors
/// the order in which the definition was walked.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Originating build coordinate, written as `team/project/build`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BuildCoordinate {
    pub team: String,
    pub project: String,
    pub build: String,
}

impl BuildCoordinate {
    pub fn new(team: impl Into<String>, project: impl Into<String>, build: impl Into<String>) -> Self {
        Self {
            team: team.into(),
            project: project.into(),
            build: build.into(),
        }
    }
}

impl fmt::Display for BuildCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.team, self.project, self.build)
    }
}

impl FromStr for BuildCoordinate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [team, project, build] if !team.is_empty() && !project.is_empty() && !build.is_empty() => {
                Ok(Self::new(*team, *project, *build))
            }
            _ => Err(format!("expected team/project/build, got '{s}'")),
        }
    }
}

impl TryFrom<String> for BuildCoordinate {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BuildCoordinate> for String {
    fn from(value: BuildCoordinate) -> Self {
        value.to_string()
    }
}

/// One remote test-execution job tied to one originating build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Local record identifier.
    pub id: u64,
    /// Runner base URL as registered.
    pub runner_url: String,
    /// Remote job identifier.
    pub job_id: String,
    /// Last status reported by the runner.
    #[serde(default)]
    pub status: Option<String>,
    pub build: BuildCoordinate,
    pub build_url: String,
    pub requester: String,
    pub created_at: DateTime<Utc>,
    /// Result variant name, fixed on first contact with the runner.
    #[serde(default)]
    pub result_class: Option<String>,
    /// Cleared once results have been accepted downstream.
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Registration input for a [`JobRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJobRecord {
    pub runner_url: String,
    #[serde(deserialize_with = "string_or_number")]
    pub job_id: String,
    #[serde(default)]
    pub status: Option<String>,
    pub build: BuildCoordinate,
    pub build_url: String,
    #[serde(default = "default_requester")]
    pub requester: String,
}

/// A raw job definition waiting to be submitted to a runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub id: u64,
    pub definition: String,
    pub runner_url: String,
    pub build: BuildCoordinate,
    pub build_url: String,
    pub requester: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub submitted: bool,
    /// Runner job id assigned on acceptance.
    #[serde(default)]
    pub job_id: Option<String>,
}

/// Creation input for a [`SubmissionRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSubmission {
    pub definition: String,
    pub runner_url: String,
    pub build: BuildCoordinate,
    pub build_url: String,
    #[serde(default = "default_requester")]
    pub requester: String,
}

/// Completion notification delivered by the external listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub username: String,
    pub payload: EventPayload,
}

/// Event body describing one runner job state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(deserialize_with = "string_or_number")]
    pub job: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub sub_id: Option<String>,
    #[serde(default)]
    pub description: String,
    pub status: String,
    #[serde(default)]
    pub pipeline: bool,
}

impl EventPayload {
    /// Identifier used to look up job records: the sub-job id when present.
    pub fn job_identifier(&self) -> &str {
        self.sub_id.as_deref().unwrap_or(&self.job)
    }
}

/// Outcome of a single test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Skip,
    #[serde(other)]
    Unknown,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Skip => "skip",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw attachment as carried inside a result bundle (base64 content).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub pathname: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// A single test-case outcome reported by the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub test_case_id: String,
    pub result: Outcome,
    #[serde(default, deserialize_with = "optional_measurement")]
    pub measurement: Option<f64>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

/// Counts recorded alongside a rolled-up verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub total: usize,
    pub pass: usize,
    pub skip: usize,
    pub fail: usize,
}

/// Pass/fail classification with a reason string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub result: Outcome,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counts: Option<TestCounts>,
}

impl Verdict {
    pub fn pass() -> Self {
        Self {
            result: Outcome::Pass,
            reason: String::new(),
            counts: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            result: Outcome::Fail,
            reason: reason.into(),
            counts: None,
        }
    }
}

/// One (subscore-name, measurement) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscore {
    pub name: String,
    pub measurement: f64,
}

impl Subscore {
    pub fn new(name: impl Into<String>, measurement: f64) -> Self {
        Self {
            name: name.into(),
            measurement,
        }
    }
}

/// Canonical output unit forwarded downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBenchmark {
    pub name: String,
    /// Group path, `/`-terminated when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub subscores: Vec<Subscore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
}

impl NormalizedBenchmark {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: None,
            subscores: Vec::new(),
            board: None,
            verdict: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn push(&mut self, name: impl Into<String>, measurement: f64) {
        self.subscores.push(Subscore::new(name, measurement));
    }
}

/// A test definition referenced from a job definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredTest {
    pub repo_type: String,
    pub repo_url: String,
    pub testdef: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<ResultRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
}

impl DeclaredTest {
    pub fn git(repo_url: impl Into<String>, testdef: impl Into<String>) -> Self {
        Self {
            repo_type: "git".to_string(),
            repo_url: repo_url.into(),
            testdef: testdef.into(),
            parameters: None,
            results: None,
            version: None,
            verdict: None,
        }
    }
}

/// Harvester configuration file layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarvestConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Address the event intake listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Optional JSON snapshot of job records and submissions.
    #[serde(default)]
    pub state_file: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            listen_addr: default_listen_addr(),
            state_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Per-call timeout for runner RPCs.
    #[serde(default = "default_runner_timeout")]
    pub timeout_secs: u64,
    /// Root directory for test repository clones.
    #[serde(default = "default_repo_home")]
    pub repo_home: String,
    /// Log RPC request and response bodies at debug level.
    #[serde(default)]
    pub trace_rpc: bool,
    #[serde(default)]
    pub credentials: Vec<RunnerCredential>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_runner_timeout(),
            repo_home: default_repo_home(),
            trace_rpc: false,
            credentials: Vec::new(),
        }
    }
}

impl RunnerConfig {
    /// Credentials registered for a runner network location (`host[:port]`).
    pub fn credential_for(&self, netloc: &str) -> Option<&RunnerCredential> {
        self.credentials.iter().find(|c| c.host == netloc)
    }
}

/// API credentials for one runner host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerCredential {
    pub host: String,
    pub username: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// Reporting service base URL.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_reporting_timeout")]
    pub timeout_secs: u64,
    /// Submission token per team.
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_reporting_timeout(),
            tokens: BTreeMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_requester() -> String {
    "anonymous".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen_addr() -> String {
    "127.0.0.1:8484".to_string()
}

fn default_runner_timeout() -> u64 {
    100
}

fn default_repo_home() -> String {
    "/tmp/repos".to_string()
}

fn default_reporting_timeout() -> u64 {
    60
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Int(i64),
    Float(f64),
}

impl StringOrNumber {
    fn into_string(self) -> String {
        match self {
            Self::String(s) => s,
            Self::Int(n) => n.to_string(),
            Self::Float(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    StringOrNumber::deserialize(deserializer).map(StringOrNumber::into_string)
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<StringOrNumber>::deserialize(deserializer)?.map(StringOrNumber::into_string))
}

/// Measurements arrive as numbers or numeric strings; empty strings mean none.
fn optional_measurement<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<StringOrNumber>::deserialize(deserializer)? {
        None => Ok(None),
        Some(StringOrNumber::Int(n)) => Ok(Some(n as f64)),
        Some(StringOrNumber::Float(n)) => Ok(Some(n)),
        Some(StringOrNumber::String(s)) if s.trim().is_empty() => Ok(None),
        Some(StringOrNumber::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid measurement '{s}'"))),
    }
}
