//! ART benchmark results carried as bundle attachments.
//!
//! Microbenchmarks arrive as a JSON document on the
//! `art-microbenchmarks` run; workload-analysis results as an SQLite
//! database on the `wa2-host-postprocessing` run.

use super::{ResultData, ResultSystem, ResultVariant, fetch_bundle};
use crate::bundle::decode_attachment;
use crate::error::{MinerError, Result};
use crate::runner::RunnerApi;
use async_trait::async_trait;
use harvest_common::{Metadata, NormalizedBenchmark};
use serde_json::Value;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, instrument};

const MICROBENCHMARK_RUN: &str = "art-microbenchmarks";
const WORKLOAD_RUN: &str = "wa2-host-postprocessing";
const COMPILATION_STATISTICS: &str = "compilation statistics";
const WORKLOAD_QUERY: &str = "select iteration, workload, metric, value from results";

/// Attachment with `suffix` on run `test_id` of the job's bundle.
async fn attachment_of(
    runner: &dyn RunnerApi,
    job_id: &str,
    test_id: &str,
    suffix: &str,
) -> Result<Option<ResultData>> {
    let Some(bundle) = fetch_bundle(runner, job_id).await? else {
        return Ok(None);
    };
    let Some(run) = bundle.run(test_id) else {
        debug!(job_id, test_id, "run not present in bundle");
        return Ok(None);
    };
    let Some(attachment) = run.attachment_with_suffix(suffix) else {
        debug!(job_id, test_id, suffix, "no matching attachment");
        return Ok(None);
    };
    Ok(Some(ResultData {
        filename: attachment.pathname.clone(),
        content: decode_attachment(attachment)?,
    }))
}

fn measurements(value: &Value) -> Vec<f64> {
    match value {
        Value::Array(items) => items.iter().filter_map(Value::as_f64).collect(),
        other => other.as_f64().into_iter().collect(),
    }
}

/// Benchmarks from an ART microbenchmark report.
///
/// `benchmarks` keys read `<group path>/<Name>.<subscore>`; every value in
/// the key's list becomes one subscore measurement. `compilation
/// statistics` maps benchmark → subscore → values or a further
/// sub-subscore mapping, and lands under group
/// `compilation statistics/<benchmark>/`.
pub fn parse_microbenchmarks(json: &[u8]) -> Result<Vec<NormalizedBenchmark>> {
    let report: Value =
        serde_json::from_slice(json).map_err(|e| MinerError::Attachment(e.to_string()))?;
    let mut benchmarks = Vec::new();

    if let Some(entries) = report.get("benchmarks").and_then(Value::as_object) {
        for (key, values) in entries {
            let (group, leaf) = key.rsplit_once('/').unwrap_or(("", key.as_str()));
            let (name, subscore) = leaf.split_once('.').unwrap_or((leaf, leaf));
            let mut benchmark = NormalizedBenchmark::new(name).with_group(format!("{group}/"));
            for measurement in measurements(values) {
                benchmark.push(subscore, measurement);
            }
            benchmarks.push(benchmark);
        }
    }

    if let Some(statistics) = report.get(COMPILATION_STATISTICS).and_then(Value::as_object) {
        for (bench, subscores) in statistics {
            let Some(subscores) = subscores.as_object() else {
                continue;
            };
            for (subscore, values) in subscores {
                let mut benchmark = NormalizedBenchmark::new(subscore.as_str())
                    .with_group(format!("{COMPILATION_STATISTICS}/{bench}/"));
                match values {
                    Value::Object(nested) => {
                        for (sub, vals) in nested {
                            for measurement in measurements(vals) {
                                benchmark.push(sub.as_str(), measurement);
                            }
                        }
                    }
                    other => {
                        for measurement in measurements(other) {
                            benchmark.push(subscore.as_str(), measurement);
                        }
                    }
                }
                benchmarks.push(benchmark);
            }
        }
    }

    Ok(benchmarks)
}

fn sql_number(value: rusqlite::types::Value) -> Result<f64> {
    use rusqlite::types::Value as Sql;
    match value {
        Sql::Integer(n) => Ok(n as f64),
        Sql::Real(n) => Ok(n),
        Sql::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| MinerError::Database(format!("non-numeric value '{text}'"))),
        other => Err(MinerError::Database(format!("non-numeric value {other:?}"))),
    }
}

/// Benchmarks from a workload-analysis results database, one per
/// workload in first-seen order, with a subscore per metric row.
pub fn parse_workload_db(db: &[u8]) -> Result<Vec<NormalizedBenchmark>> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(db)?;
    file.flush()?;

    let conn = rusqlite::Connection::open(file.path())?;
    let mut stmt = conn.prepare(WORKLOAD_QUERY)?;
    let mut rows = stmt.query([])?;

    let mut benchmarks: Vec<NormalizedBenchmark> = Vec::new();
    while let Some(row) = rows.next()? {
        let workload: String = row.get(1)?;
        let metric: String = row.get(2)?;
        let value = sql_number(row.get(3)?)?;
        match benchmarks.iter_mut().find(|b| b.name == workload) {
            Some(benchmark) => benchmark.push(metric, value),
            None => {
                let mut benchmark = NormalizedBenchmark::new(workload);
                benchmark.push(metric, value);
                benchmarks.push(benchmark);
            }
        }
    }
    Ok(benchmarks)
}

fn metadata_text(metadata: &Metadata, key: &str) -> Option<String> {
    match metadata.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub struct ArtMicrobenchmarks {
    runner: Arc<dyn RunnerApi>,
}

impl ArtMicrobenchmarks {
    pub fn new(runner: Arc<dyn RunnerApi>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ResultSystem for ArtMicrobenchmarks {
    fn variant(&self) -> ResultVariant {
        ResultVariant::ArtMicrobenchmarks
    }

    fn runner(&self) -> &dyn RunnerApi {
        self.runner.as_ref()
    }

    #[instrument(skip(self), fields(variant = "ArtMicrobenchmarks"))]
    async fn job_results(&self, job_id: &str) -> Result<Vec<NormalizedBenchmark>> {
        match self.result_data(job_id).await? {
            Some(data) => parse_microbenchmarks(&data.content),
            None => Ok(Vec::new()),
        }
    }

    async fn result_data(&self, job_id: &str) -> Result<Option<ResultData>> {
        attachment_of(self.runner.as_ref(), job_id, MICROBENCHMARK_RUN, "json").await
    }

    /// `device-mode-core-compiler_mode`, compiler mode defaulting to `aot`.
    fn environment_name(&self, metadata: &Metadata) -> Option<String> {
        let compiler_mode =
            metadata_text(metadata, "compiler-mode").unwrap_or_else(|| "aot".to_string());
        Some(format!(
            "{}-{}-{}-{}",
            metadata_text(metadata, "device")?,
            metadata_text(metadata, "mode")?,
            metadata_text(metadata, "core")?,
            compiler_mode
        ))
    }
}

pub struct ArtWorkloadAnalysis {
    runner: Arc<dyn RunnerApi>,
}

impl ArtWorkloadAnalysis {
    pub fn new(runner: Arc<dyn RunnerApi>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ResultSystem for ArtWorkloadAnalysis {
    fn variant(&self) -> ResultVariant {
        ResultVariant::ArtWorkloadAnalysis
    }

    fn runner(&self) -> &dyn RunnerApi {
        self.runner.as_ref()
    }

    #[instrument(skip(self), fields(variant = "ArtWorkloadAnalysis"))]
    async fn job_results(&self, job_id: &str) -> Result<Vec<NormalizedBenchmark>> {
        match self.result_data(job_id).await? {
            Some(data) => parse_workload_db(&data.content),
            None => Ok(Vec::new()),
        }
    }

    async fn result_data(&self, job_id: &str) -> Result<Option<ResultData>> {
        attachment_of(self.runner.as_ref(), job_id, WORKLOAD_RUN, "db").await
    }
}
