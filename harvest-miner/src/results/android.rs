//! Multinode Android benchmark results.
//!
//! The host role reports one measured test case per benchmark score; the
//! target role only contributes the board name.

use super::{ResultSystem, ResultVariant, fetch_bundle};
use crate::bundle::ResultBundle;
use crate::error::Result;
use crate::runner::RunnerApi;
use async_trait::async_trait;
use harvest_common::NormalizedBenchmark;
use std::sync::Arc;
use tracing::{debug, instrument};

const TARGET_RUNS: &[&str] = &["multinode-target", "lava-android-benchmark-target", "target-stop"];
const DEFAULT_SUBSCORE: &str = "Score";

pub struct AndroidBenchmarks {
    variant: ResultVariant,
    runner: Arc<dyn RunnerApi>,
}

impl AndroidBenchmarks {
    pub fn new(variant: ResultVariant, runner: Arc<dyn RunnerApi>) -> Self {
        Self { variant, runner }
    }

    /// Test id of the host-side run this variant reads.
    pub fn host_test_id(&self) -> Option<&'static str> {
        match self.variant {
            ResultVariant::AndroidMultinode => Some("lava-android-benchmark-host"),
            ResultVariant::AndroidApplications => Some("application-benchmark-host"),
            ResultVariant::AndroidCts => Some("cts-host"),
            _ => None,
        }
    }
}

/// Split a host test-case id into benchmark and subscore.
///
/// `_` is tried first, then `-`; without either the whole id is the
/// benchmark and the subscore is `Score`.
pub fn split_test_case(id: &str) -> (&str, &str) {
    id.split_once('_')
        .or_else(|| id.split_once('-'))
        .unwrap_or((id, DEFAULT_SUBSCORE))
}

/// Group measured host results by benchmark, in first-seen order.
pub fn parse_host_results(bundle: &ResultBundle, host_test_id: &str) -> Vec<NormalizedBenchmark> {
    let Some(target) = bundle.first_run_of(TARGET_RUNS) else {
        debug!("no target run in bundle");
        return Vec::new();
    };
    let Some(host) = bundle.run(host_test_id) else {
        debug!(host_test_id, "no host run in bundle");
        return Vec::new();
    };
    let board = target.attribute("target");

    let mut benchmarks: Vec<NormalizedBenchmark> = Vec::new();
    for result in &host.test_results {
        let Some(measurement) = result.measurement else {
            continue;
        };
        let (name, subscore) = split_test_case(&result.test_case_id);
        match benchmarks.iter_mut().find(|b| b.name == name) {
            Some(benchmark) => benchmark.push(subscore, measurement),
            None => {
                let mut benchmark = NormalizedBenchmark::new(name);
                benchmark.board = board.clone();
                benchmark.push(subscore, measurement);
                benchmarks.push(benchmark);
            }
        }
    }
    benchmarks
}

#[async_trait]
impl ResultSystem for AndroidBenchmarks {
    fn variant(&self) -> ResultVariant {
        self.variant
    }

    fn runner(&self) -> &dyn RunnerApi {
        self.runner.as_ref()
    }

    #[instrument(skip(self), fields(variant = %self.variant))]
    async fn job_results(&self, job_id: &str) -> Result<Vec<NormalizedBenchmark>> {
        let Some(host_test_id) = self.host_test_id() else {
            return Ok(Vec::new());
        };
        debug!(host_test_id, "parsing multinode measurements");
        let Some(bundle) = fetch_bundle(self.runner.as_ref(), job_id).await? else {
            return Ok(Vec::new());
        };
        Ok(parse_host_results(&bundle, host_test_id))
    }
}
