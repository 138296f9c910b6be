//! Pass/fail results of pipeline jobs.

use super::{ResultSystem, ResultVariant};
use crate::bundle::META_SUITE;
use crate::error::{MinerError, Result};
use crate::runner::RunnerApi;
use async_trait::async_trait;
use harvest_common::{NormalizedBenchmark, Outcome, Verdict};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Deserialize)]
struct PipelineResult {
    suite: String,
    name: String,
    result: Outcome,
}

pub struct PipelinePassFail {
    runner: Arc<dyn RunnerApi>,
}

impl PipelinePassFail {
    pub fn new(runner: Arc<dyn RunnerApi>) -> Self {
        Self { runner }
    }
}

/// Benchmarks named `<suite>/<name>` from a pipeline result document.
///
/// The runner's own suite is skipped, and the ordering prefix of every
/// other suite (`0_smoke` becomes `smoke`) is dropped.
pub fn parse_pipeline_results(yaml: &str) -> Result<Vec<NormalizedBenchmark>> {
    let results: Vec<PipelineResult> =
        serde_yaml_ng::from_str(yaml).map_err(|e| MinerError::Bundle(e.to_string()))?;

    Ok(results
        .into_iter()
        .filter(|r| r.suite != META_SUITE)
        .map(|r| {
            let suite = r.suite.split_once('_').map_or(r.suite.as_str(), |(_, s)| s);
            let mut benchmark = NormalizedBenchmark::new(format!("{suite}/{}", r.name));
            benchmark.verdict = Some(match r.result {
                Outcome::Fail => Verdict::fail(""),
                other => Verdict {
                    result: other,
                    ..Verdict::pass()
                },
            });
            benchmark
        })
        .collect())
}

#[async_trait]
impl ResultSystem for PipelinePassFail {
    fn variant(&self) -> ResultVariant {
        ResultVariant::PipelinePassFail
    }

    fn runner(&self) -> &dyn RunnerApi {
        self.runner.as_ref()
    }

    #[instrument(skip(self), fields(variant = "PipelinePassFail"))]
    async fn job_results(&self, job_id: &str) -> Result<Vec<NormalizedBenchmark>> {
        let yaml = self.runner.job_results_yaml(job_id).await?;
        parse_pipeline_results(&yaml)
    }
}
