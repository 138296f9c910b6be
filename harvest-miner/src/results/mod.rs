//! Result-format adapters.
//!
//! Every runner job is harvested through a [`ResultSystem`]. A job starts
//! out with the [`ResultVariant::Generic`] system; after first contact the
//! caller asks [`ResultSystem::result_class`] for the specialised variant
//! and rebinds through [`build`]. Each variant is its own type; shared
//! behaviour lives in the trait's provided methods and the helpers below.

mod android;
mod art;
mod generic;
mod pipeline;

pub use android::AndroidBenchmarks;
pub use art::{ArtMicrobenchmarks, ArtWorkloadAnalysis, parse_microbenchmarks, parse_workload_db};
pub use generic::GenericResults;
pub use pipeline::PipelinePassFail;

use crate::bundle::ResultBundle;
use crate::error::{MinerError, Result};
use crate::repos::RepoCache;
use crate::runner::{JobDetails, JobStatusInfo, RunnerApi};
use crate::walker;
use async_trait::async_trait;
use harvest_common::{Metadata, NormalizedBenchmark};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Which adapter understands a job's results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ResultVariant {
    Generic,
    PipelinePassFail,
    ArtMicrobenchmarks,
    ArtWorkloadAnalysis,
    AndroidMultinode,
    AndroidApplications,
    AndroidCts,
}

/// Test-definition file suffixes that select a specialised variant, in
/// priority order.
const SUFFIX_VARIANTS: &[(&str, ResultVariant)] = &[
    ("art-microbenchmarks.yaml", ResultVariant::ArtMicrobenchmarks),
    ("wa2host_postprocessing.yaml", ResultVariant::ArtWorkloadAnalysis),
    ("lava-android-benchmark-host.yaml", ResultVariant::AndroidMultinode),
    ("application-benchmark-host.yaml", ResultVariant::AndroidApplications),
    ("cts-host.yaml", ResultVariant::AndroidCts),
];

impl ResultVariant {
    pub const ALL: [ResultVariant; 7] = [
        Self::Generic,
        Self::PipelinePassFail,
        Self::ArtMicrobenchmarks,
        Self::ArtWorkloadAnalysis,
        Self::AndroidMultinode,
        Self::AndroidApplications,
        Self::AndroidCts,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Generic => "Generic",
            Self::PipelinePassFail => "PipelinePassFail",
            Self::ArtMicrobenchmarks => "ArtMicrobenchmarks",
            Self::ArtWorkloadAnalysis => "ArtWorkloadAnalysis",
            Self::AndroidMultinode => "AndroidMultinode",
            Self::AndroidApplications => "AndroidApplications",
            Self::AndroidCts => "AndroidCts",
        }
    }

    pub fn is_generic(&self) -> bool {
        matches!(self, Self::Generic)
    }

    /// Most specific variant for a parsed job definition.
    ///
    /// Pipeline jobs only report through the results YAML, so they always
    /// get [`Self::PipelinePassFail`]. For legacy jobs the first
    /// `lava_test_shell` test definition (in document order) whose path
    /// ends in a known suffix decides; suffixes are tried in priority
    /// order per path. Without a match the job stays [`Self::Generic`].
    pub fn from_definition(definition: &Value, is_pipeline: bool) -> Self {
        if is_pipeline {
            return Self::PipelinePassFail;
        }
        crate::matcher::declared_testdefs(definition)
            .iter()
            .find_map(|path| {
                SUFFIX_VARIANTS
                    .iter()
                    .find(|(suffix, _)| path.ends_with(suffix))
                    .map(|(_, variant)| *variant)
            })
            .unwrap_or(Self::Generic)
    }
}

impl fmt::Display for ResultVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResultVariant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown result variant '{s}'"))
    }
}

/// Parse the definition a job actually ran (multinode when present).
pub fn parse_definition(details: &JobDetails) -> Result<Value> {
    let raw = details.effective_definition();
    if details.is_pipeline {
        serde_yaml_ng::from_str(raw).map_err(|e| MinerError::Definition(e.to_string()))
    } else {
        serde_json::from_str(raw).map_err(|e| MinerError::Definition(e.to_string()))
    }
}

/// Result of [`ResultSystem::job_details`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub definition: Value,
    pub metadata: Metadata,
    pub name: String,
    pub tester_type: &'static str,
    /// Legacy result bundle id.
    pub bundle: Option<String>,
    /// Bundle stream named by a `submit_results` action.
    pub bundle_stream: Option<String>,
}

/// Named raw attachment, forwarded downstream as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultData {
    pub filename: String,
    pub content: Vec<u8>,
}

fn bundle_stream(definition: &Value) -> Option<String> {
    definition
        .get("actions")?
        .as_array()?
        .iter()
        .filter(|a| {
            a.get("command")
                .and_then(Value::as_str)
                .is_some_and(|c| c.starts_with("submit_results"))
        })
        .filter_map(|a| a.get("parameters")?.get("stream")?.as_str())
        .last()
        .map(str::to_string)
}

#[async_trait]
pub trait ResultSystem: Send + Sync {
    fn variant(&self) -> ResultVariant;

    fn runner(&self) -> &dyn RunnerApi;

    async fn job_status(&self, job_id: &str) -> Result<JobStatusInfo> {
        self.runner().job_status(job_id).await
    }

    fn job_url(&self, job_id: &str) -> String {
        self.runner().job_url(job_id)
    }

    /// Definition, walked metadata (with `device`) and job name.
    async fn job_details(&self, job_id: &str) -> Result<JobSummary> {
        let status = self.runner().job_status(job_id).await?;
        let details = self.runner().job_details(job_id).await?;
        let definition = parse_definition(&details)?;
        let summary = walker::extract(&definition);

        let mut metadata = summary.metadata;
        metadata.insert(
            "device".to_string(),
            summary.device.map_or(Value::Null, Value::String),
        );
        Ok(JobSummary {
            bundle_stream: bundle_stream(&definition),
            definition,
            metadata,
            name: summary.name,
            tester_type: "lava",
            bundle: status.bundle_sha1,
        })
    }

    /// Variant the job's results should be read with.
    async fn result_class(&self, job_id: &str) -> Result<ResultVariant> {
        let details = self.runner().job_details(job_id).await?;
        let definition = parse_definition(&details)?;
        let variant = ResultVariant::from_definition(&definition, details.is_pipeline);
        debug!(job_id, variant = %variant, "resolved result variant");
        Ok(variant)
    }

    async fn job_results(&self, job_id: &str) -> Result<Vec<NormalizedBenchmark>>;

    /// Raw attachment the variant forwards, if any.
    async fn result_data(&self, _job_id: &str) -> Result<Option<ResultData>> {
        Ok(None)
    }

    /// Downstream environment label; the device by default.
    fn environment_name(&self, metadata: &Metadata) -> Option<String> {
        match metadata.get("device")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    /// Release whatever this attempt created on disk.
    fn cleanup(&self) {}
}

/// Fetch and parse the job's legacy result bundle, if it has one.
pub(crate) async fn fetch_bundle(runner: &dyn RunnerApi, job_id: &str) -> Result<Option<ResultBundle>> {
    let status = runner.job_status(job_id).await?;
    let Some(sha1) = status.bundle_sha1 else {
        debug!(job_id, "job has no result bundle");
        return Ok(None);
    };
    let content = runner.result_bundle(&sha1).await?;
    ResultBundle::parse(&content).map(Some)
}

/// Result system for `variant`, sharing one runner client and the
/// attempt's repository cache.
pub fn build(
    variant: ResultVariant,
    runner: Arc<dyn RunnerApi>,
    repos: Arc<RepoCache>,
) -> Box<dyn ResultSystem> {
    match variant {
        ResultVariant::Generic => Box::new(GenericResults::new(runner, repos)),
        ResultVariant::PipelinePassFail => Box::new(PipelinePassFail::new(runner)),
        ResultVariant::ArtMicrobenchmarks => Box::new(ArtMicrobenchmarks::new(runner)),
        ResultVariant::ArtWorkloadAnalysis => Box::new(ArtWorkloadAnalysis::new(runner)),
        ResultVariant::AndroidMultinode
        | ResultVariant::AndroidApplications
        | ResultVariant::AndroidCts => Box::new(AndroidBenchmarks::new(variant, runner)),
    }
}
