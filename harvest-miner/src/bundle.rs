//! Legacy result-bundle model.
//!
//! A bundle is a JSON document with one entry per test run. The `lava`
//! run carries boot measurements; every other run maps back to a test
//! definition in a version-controlled repository.

use crate::error::{MinerError, Result};
use crate::literal;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use harvest_common::{Attachment, ResultRecord};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Test-run id of the runner's own pseudo-suite.
pub const META_SUITE: &str = "lava";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultBundle {
    #[serde(default)]
    pub test_runs: Vec<TestRun>,
}

impl ResultBundle {
    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| MinerError::Bundle(e.to_string()))
    }

    /// First run whose id equals `test_id`.
    pub fn run(&self, test_id: &str) -> Option<&TestRun> {
        self.test_runs.iter().find(|r| r.test_id == test_id)
    }

    /// First run whose id is any of `test_ids`, in bundle order.
    pub fn first_run_of(&self, test_ids: &[&str]) -> Option<&TestRun> {
        self.test_runs
            .iter()
            .find(|r| test_ids.contains(&r.test_id.as_str()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestRun {
    pub test_id: String,
    #[serde(default)]
    pub test_results: Vec<ResultRecord>,
    #[serde(default)]
    pub testdef_metadata: Option<TestdefMetadata>,
    #[serde(default)]
    pub software_context: Option<SoftwareContext>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl TestRun {
    pub fn is_meta(&self) -> bool {
        self.test_id == META_SUITE
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        match self.attributes.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// First attachment whose path ends with `suffix`.
    pub fn attachment_with_suffix(&self, suffix: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.pathname.ends_with(suffix))
    }

    /// Parameters the run was executed with.
    ///
    /// Defaults from the matching software source are overlaid with its
    /// explicit test parameters. A run without software context, or
    /// without a source for its repository revision, has none.
    pub fn parameters(&self) -> Result<Map<String, Value>> {
        let mut params = Map::new();
        let (Some(meta), Some(context)) = (&self.testdef_metadata, &self.software_context) else {
            return Ok(params);
        };
        let Some(source) = context
            .sources
            .iter()
            .rev()
            .find(|s| s.branch_url == meta.url && s.branch_revision == meta.version)
        else {
            return Ok(params);
        };

        for raw in [&source.default_params, &source.test_params] {
            if raw.trim().is_empty() {
                continue;
            }
            match literal::parse(raw).map_err(|e| MinerError::Bundle(e.to_string()))? {
                Value::Object(map) => params.extend(map),
                other => {
                    return Err(MinerError::Bundle(format!(
                        "run parameters are not a mapping: {other}"
                    )));
                }
            }
        }
        Ok(params)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestdefMetadata {
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub name: String,
    /// Comma-separated in bundles.
    #[serde(default)]
    pub os: Value,
}

impl TestdefMetadata {
    pub fn os_set(&self) -> std::collections::BTreeSet<String> {
        os_values(&self.os)
    }
}

/// OS set from a comma-separated string or a sequence.
pub fn os_values(value: &Value) -> std::collections::BTreeSet<String> {
    match value {
        Value::String(s) => s.split(',').map(|p| p.trim().to_string()).collect(),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
            .collect(),
        _ => Default::default(),
    }
}

fn default_location() -> String {
    "GIT".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SoftwareContext {
    #[serde(default)]
    pub sources: Vec<SoftwareSource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SoftwareSource {
    #[serde(default)]
    pub branch_url: String,
    #[serde(default)]
    pub branch_revision: String,
    #[serde(default)]
    pub default_params: String,
    #[serde(default)]
    pub test_params: String,
}

/// Decode a base64 attachment body.
pub fn decode_attachment(attachment: &Attachment) -> Result<Vec<u8>> {
    let compact: String = attachment
        .content
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    STANDARD
        .decode(compact)
        .map_err(|e| MinerError::Attachment(format!("{}: {e}", attachment.pathname)))
}
