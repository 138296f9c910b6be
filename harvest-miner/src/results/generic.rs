//! Legacy bundle results: boot summary plus declared-test rollups.

use super::{ResultSystem, ResultVariant, fetch_bundle, parse_definition};
use crate::error::Result;
use crate::matcher::{self, DefinitionMatcher};
use crate::repos::RepoCache;
use crate::runner::RunnerApi;
use async_trait::async_trait;
use harvest_common::NormalizedBenchmark;
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct GenericResults {
    runner: Arc<dyn RunnerApi>,
    repos: Arc<RepoCache>,
}

impl GenericResults {
    pub fn new(runner: Arc<dyn RunnerApi>, repos: Arc<RepoCache>) -> Self {
        Self { runner, repos }
    }
}

#[async_trait]
impl ResultSystem for GenericResults {
    fn variant(&self) -> ResultVariant {
        ResultVariant::Generic
    }

    fn runner(&self) -> &dyn RunnerApi {
        self.runner.as_ref()
    }

    /// One `boot` benchmark per meta run followed by one benchmark per
    /// declared test. Empty when the job has no bundle.
    #[instrument(skip(self), fields(variant = "Generic"))]
    async fn job_results(&self, job_id: &str) -> Result<Vec<NormalizedBenchmark>> {
        let details = self.runner.job_details(job_id).await?;
        let definition = parse_definition(&details)?;
        let mut declared = matcher::declared_tests(&definition);
        debug!(declared = declared.len(), "declared tests");

        let Some(bundle) = fetch_bundle(self.runner.as_ref(), job_id).await? else {
            return Ok(Vec::new());
        };

        DefinitionMatcher::new(&self.repos)
            .reconcile(&mut declared, &bundle.test_runs)
            .await?;

        let mut benchmarks: Vec<NormalizedBenchmark> = bundle
            .test_runs
            .iter()
            .filter(|run| run.is_meta())
            .map(matcher::aggregate_boot)
            .collect();
        for test in &mut declared {
            matcher::roll_up(test);
            benchmarks.push(matcher::declared_to_benchmark(test));
        }
        Ok(benchmarks)
    }

    fn cleanup(&self) {
        self.repos.cleanup();
    }
}
