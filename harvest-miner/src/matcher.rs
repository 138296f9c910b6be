//! Reconciliation of declared test definitions with reported runs.
//!
//! A job definition declares tests as (repository, file, parameters).
//! Runs only report the repository, revision and test name, so the
//! matcher checks out the repository at that revision, finds every file
//! whose embedded metadata matches the run, and attaches the run's
//! results to the declared tests that point at one of those files with
//! equal effective parameters.

use crate::bundle::{TestRun, TestdefMetadata, os_values};
use crate::error::Result;
use crate::repos::RepoCache;
use harvest_common::{DeclaredTest, NormalizedBenchmark, Outcome, TestCounts, Verdict};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

const TEST_SHELL: &str = "lava_test_shell";
const DEFINITION_EXTENSIONS: &[&str] = &["yaml", "yml"];

pub const NO_BOOT_ATTEMPTS: &str = "No boot attempts found";
pub const RESULTS_MISSING: &str = "Test Results Missing!";

/// `testdef_repos` entries of every test-shell action, in order.
fn testdef_repos(definition: &Value) -> impl Iterator<Item = &Map<String, Value>> {
    definition
        .get("actions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|action| action.get("command").and_then(Value::as_str) == Some(TEST_SHELL))
        .filter_map(|action| action.get("parameters")?.get("testdef_repos")?.as_array())
        .flatten()
        .filter_map(Value::as_object)
}

/// Test-definition paths referenced by test-shell actions.
pub fn declared_testdefs(definition: &Value) -> Vec<String> {
    testdef_repos(definition)
        .filter_map(|repo| repo.get("testdef")?.as_str().map(str::to_string))
        .collect()
}

/// Git-hosted tests declared in a legacy job definition.
pub fn declared_tests(definition: &Value) -> Vec<DeclaredTest> {
    testdef_repos(definition)
        .filter_map(|repo| {
            let url = repo.get("git-repo")?.as_str()?;
            let testdef = repo.get("testdef").and_then(Value::as_str).unwrap_or_default();
            let mut test = DeclaredTest::git(url, testdef);
            test.parameters = repo.get("parameters").and_then(Value::as_object).cloned();
            Some(test)
        })
        .collect()
}

pub struct DefinitionMatcher<'a> {
    cache: &'a RepoCache,
}

impl<'a> DefinitionMatcher<'a> {
    pub fn new(cache: &'a RepoCache) -> Self {
        Self { cache }
    }

    /// Attach results and version of every non-meta run to the declared
    /// tests it matches.
    pub async fn reconcile(&self, declared: &mut [DeclaredTest], runs: &[TestRun]) -> Result<()> {
        for run in runs.iter().filter(|r| !r.is_meta()) {
            let Some(meta) = &run.testdef_metadata else {
                debug!(test_id = %run.test_id, "run has no test definition metadata");
                continue;
            };
            if !meta.location.eq_ignore_ascii_case("git") {
                debug!(test_id = %run.test_id, location = %meta.location, "unsupported test location");
                continue;
            }
            if !declared.iter().any(|t| t.repo_url == meta.url) {
                debug!(test_id = %run.test_id, url = %meta.url, "no declared test uses this repository");
                continue;
            }

            let candidates = self.candidates(meta).await?;
            debug!(test_id = %run.test_id, candidates = ?candidates, "candidate test files");
            let params = run.parameters()?;
            self.attach(declared, run, meta, &candidates, &params)?;
        }
        Ok(())
    }

    /// Files in the run's repository, at the run's revision, whose
    /// metadata name and OS set equal the run's. Every match is kept.
    pub async fn candidates(&self, meta: &TestdefMetadata) -> Result<Vec<String>> {
        let dir = self.cache.checkout(&meta.url, &meta.version).await?;
        let wanted_os = meta.os_set();
        let mut found = Vec::new();

        let walker = WalkDir::new(&dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");
        for entry in walker.filter_map(std::result::Result::ok) {
            if !entry.file_type().is_file() || !has_definition_extension(entry.path()) {
                continue;
            }
            let Some(doc) = read_yaml(entry.path()) else {
                continue;
            };
            let Some(file_meta) = doc.get("metadata") else {
                continue;
            };
            let name_matches = file_meta.get("name").and_then(Value::as_str) == Some(meta.name.as_str());
            let os_matches = file_meta
                .get("os")
                .is_some_and(|os| os_values(os) == wanted_os);
            if name_matches
                && os_matches
                && let Ok(rel) = entry.path().strip_prefix(&dir)
            {
                found.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(found)
    }

    fn attach(
        &self,
        declared: &mut [DeclaredTest],
        run: &TestRun,
        meta: &TestdefMetadata,
        candidates: &[String],
        run_params: &Map<String, Value>,
    ) -> Result<()> {
        let results: Vec<_> = run
            .test_results
            .iter()
            .cloned()
            .map(|mut r| {
                r.attachments.clear();
                r
            })
            .collect();

        for test in declared.iter_mut() {
            if test.repo_url != meta.url || !candidates.contains(&test.testdef) {
                continue;
            }

            let matched = if run_params.is_empty() {
                test.parameters.is_none()
            } else {
                let file = self.cache.clone_dir(&meta.url).join(&test.testdef);
                let mut effective = read_yaml(&file)
                    .and_then(|doc| doc.get("params").and_then(Value::as_object).cloned())
                    .unwrap_or_default();
                if let Some(overrides) = &test.parameters {
                    effective.extend(overrides.clone());
                }
                same_entries(run_params, &effective)
            };

            if matched {
                debug!(testdef = %test.testdef, version = %meta.version, "matched run to declared test");
                test.results = Some(results.clone());
                test.version = Some(meta.version.clone());
            }
        }
        Ok(())
    }
}

fn has_definition_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| DEFINITION_EXTENSIONS.contains(&e))
}

fn read_yaml(path: &Path) -> Option<Value> {
    let text = std::fs::read_to_string(path).ok()?;
    match serde_yaml_ng::from_str::<Value>(&text) {
        Ok(doc) => Some(doc),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping unparsable test definition");
            None
        }
    }
}

fn same_entries(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
}

/// Set the pass/fail verdict and counts of a declared test.
pub fn roll_up(test: &mut DeclaredTest) {
    test.verdict = Some(match &test.results {
        None => Verdict {
            counts: Some(TestCounts::default()),
            ..Verdict::fail(RESULTS_MISSING)
        },
        Some(results) => {
            let mut counts = TestCounts {
                total: results.len(),
                ..TestCounts::default()
            };
            let mut failing = Vec::new();
            for result in results {
                match result.result {
                    Outcome::Pass => counts.pass += 1,
                    Outcome::Skip => counts.skip += 1,
                    Outcome::Fail => {
                        counts.fail += 1;
                        failing.push(result.test_case_id.as_str());
                    }
                    Outcome::Unknown => {}
                }
            }
            Verdict {
                result: if failing.is_empty() { Outcome::Pass } else { Outcome::Fail },
                reason: failing.join(","),
                counts: Some(counts),
            }
        }
    });
}

#[derive(Default)]
struct BootMetric {
    sum: f64,
    measured: usize,
    attempts: usize,
}

impl BootMetric {
    fn record(&mut self, measurement: Option<f64>) {
        self.attempts += 1;
        if let Some(value) = measurement {
            self.sum += value;
            self.measured += 1;
        }
    }

    fn mean(&self) -> Option<f64> {
        (self.measured > 0).then(|| self.sum / self.measured as f64)
    }
}

/// Reduce the meta run's boot measurements to one `boot` benchmark.
///
/// Kernel, userspace and home-screen boot times are averaged across all
/// attempts. Any failing attempt fails the benchmark; no kernel boot
/// attempt at all fails it with [`NO_BOOT_ATTEMPTS`]. A passing
/// `dummy_deploy` stands in for one attempt when no kernel boot was
/// measured.
pub fn aggregate_boot(run: &TestRun) -> NormalizedBenchmark {
    let mut kernel = BootMetric::default();
    let mut userspace = BootMetric::default();
    let mut home_screen = BootMetric::default();
    let mut dummy_deploy_passed = false;
    let mut failure: Option<&'static str> = None;

    for result in &run.test_results {
        let failed = result.result == Outcome::Fail;
        match result.test_case_id.as_str() {
            "test_kernel_boot_time" => {
                kernel.record(result.measurement);
                if failed {
                    failure = Some("kernel boot failed");
                }
            }
            "test_userspace_home_screen_boot_time" => {
                home_screen.record(result.measurement);
                if failed {
                    failure = Some("android userspace home screen boot failed");
                }
            }
            "test_userspace_boot_time" => {
                userspace.record(result.measurement);
                if failed {
                    failure = Some("userspace boot failed");
                }
            }
            "dummy_deploy" if result.result == Outcome::Pass => dummy_deploy_passed = true,
            _ => {}
        }
    }

    let attempts = if kernel.attempts == 0 && dummy_deploy_passed {
        1
    } else {
        kernel.attempts
    };

    let mut boot = NormalizedBenchmark::new("boot");
    boot.board = run.attribute("target");
    boot.push("boot_time", kernel.mean().unwrap_or(0.0));
    boot.push("boot_attempts", attempts as f64);
    if let Some(mean) = home_screen.mean() {
        boot.push("android_userspace_boot_time", mean);
        boot.push("android_userspace_boot_attempts", home_screen.attempts as f64);
    }
    if let Some(mean) = userspace.mean() {
        boot.push("userspace_boot_time", mean);
        boot.push("userspace_boot_attempts", userspace.attempts as f64);
    }

    boot.verdict = Some(if attempts == 0 {
        Verdict::fail(NO_BOOT_ATTEMPTS)
    } else if let Some(reason) = failure {
        Verdict::fail(reason)
    } else {
        Verdict::pass()
    });
    boot
}

/// Benchmark view of a rolled-up declared test.
pub fn declared_to_benchmark(test: &DeclaredTest) -> NormalizedBenchmark {
    let mut benchmark = NormalizedBenchmark::new(test.testdef.clone());
    for result in test.results.iter().flatten() {
        if let Some(measurement) = result.measurement {
            benchmark.push(result.test_case_id.clone(), measurement);
        }
    }
    benchmark.verdict = test.verdict.clone();
    benchmark
}
