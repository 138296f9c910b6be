//! In-memory fakes for the runner and version control.
//!
//! Used by this crate's tests and by the daemon's tests; nothing here
//! touches the network or runs `git`.

use crate::error::{MinerError, Result};
use crate::repos::Vcs;
use crate::runner::{JobDetails, JobStatusInfo, RunnerApi};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Repository contents keyed by URL; cloning writes them out.
#[derive(Debug, Default)]
pub struct FakeVcs {
    repos: Mutex<HashMap<String, BTreeMap<String, String>>>,
    clones: AtomicUsize,
    synced: Mutex<Vec<String>>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file (path relative to the repository root).
    pub fn add_file(&self, url: &str, path: &str, contents: &str) {
        self.repos
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.to_string())
            .or_default()
            .insert(path.to_string(), contents.to_string());
    }

    pub fn clone_count(&self) -> usize {
        self.clones.load(Ordering::SeqCst)
    }

    pub fn synced_revisions(&self) -> Vec<String> {
        self.synced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        let files = self
            .repos
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or_else(|| MinerError::Repository(format!("git clone {url} failed")))?;
        std::fs::create_dir_all(dest)?;
        for (path, contents) in files {
            let target = dest.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, contents)?;
        }
        self.clones.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn sync_to(&self, _repo: &Path, revision: &str) -> Result<()> {
        self.synced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(revision.to_string());
        Ok(())
    }
}

/// Canned answer for one runner call.
#[derive(Debug, Clone)]
pub enum Canned<T> {
    Ok(T),
    /// Transient failure, as a 5xx or timeout would produce.
    Unavailable,
    /// Remote fault with the given text.
    Fault(String),
}

impl<T: Clone> Canned<T> {
    fn resolve(&self, url: &str) -> Result<T> {
        match self {
            Self::Ok(value) => Ok(value.clone()),
            Self::Unavailable => Err(MinerError::RunnerUnavailable {
                url: url.to_string(),
                reason: "status code 503".to_string(),
            }),
            Self::Fault(text) => Err(MinerError::RunnerProtocol(text.clone())),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    status: HashMap<String, Canned<JobStatusInfo>>,
    details: HashMap<String, Canned<JobDetails>>,
    bundles: HashMap<String, Canned<String>>,
    results_yaml: HashMap<String, Canned<String>>,
    submit: Option<Canned<String>>,
    submitted: Vec<String>,
    calls: Vec<String>,
}

/// Scriptable [`RunnerApi`].
///
/// Unknown job ids answer with a fault, mirroring a runner that does not
/// know the job.
#[derive(Debug)]
pub struct MockRunner {
    base_url: String,
    state: Mutex<MockState>,
}

impl MockRunner {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: crate::runner::normalize_base_url(base_url),
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_status(&self, job_id: &str, status: &str, bundle_sha1: Option<&str>) {
        let info = JobStatusInfo {
            status: status.to_string(),
            bundle_sha1: bundle_sha1.map(str::to_string),
        };
        self.state().status.insert(job_id.to_string(), Canned::Ok(info));
    }

    pub fn set_status_response(&self, job_id: &str, response: Canned<JobStatusInfo>) {
        self.state().status.insert(job_id.to_string(), response);
    }

    /// Definition given as JSON or YAML text.
    pub fn set_details(&self, job_id: &str, definition: &str, is_pipeline: bool) {
        let details = JobDetails {
            definition: definition.to_string(),
            multinode_definition: None,
            is_pipeline,
        };
        self.state().details.insert(job_id.to_string(), Canned::Ok(details));
    }

    pub fn set_details_response(&self, job_id: &str, response: Canned<JobDetails>) {
        self.state().details.insert(job_id.to_string(), response);
    }

    pub fn set_bundle(&self, sha1: &str, content: &str) {
        self.state()
            .bundles
            .insert(sha1.to_string(), Canned::Ok(content.to_string()));
    }

    pub fn set_bundle_response(&self, sha1: &str, response: Canned<String>) {
        self.state().bundles.insert(sha1.to_string(), response);
    }

    pub fn set_results_yaml(&self, job_id: &str, yaml: &str) {
        self.state()
            .results_yaml
            .insert(job_id.to_string(), Canned::Ok(yaml.to_string()));
    }

    pub fn set_submit_response(&self, response: Canned<String>) {
        self.state().submit = Some(response);
    }

    /// Method names called so far, e.g. `job_status:1234`.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn submitted_definitions(&self) -> Vec<String> {
        self.state().submitted.clone()
    }

    fn answer<T: Clone>(
        &self,
        method: &str,
        key: &str,
        pick: impl FnOnce(&MockState) -> Option<&Canned<T>>,
    ) -> Result<T> {
        let mut state = self.state();
        state.calls.push(format!("{method}:{key}"));
        match pick(&*state) {
            Some(canned) => canned.resolve(&self.base_url),
            None => Err(MinerError::RunnerProtocol(format!(
                "Fault code: 404, Fault string: {method} {key} not found"
            ))),
        }
    }
}

#[async_trait]
impl RunnerApi for MockRunner {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatusInfo> {
        self.answer("job_status", job_id, |s| s.status.get(job_id))
    }

    async fn job_details(&self, job_id: &str) -> Result<JobDetails> {
        self.answer("job_details", job_id, |s| s.details.get(job_id))
    }

    async fn result_bundle(&self, sha1: &str) -> Result<String> {
        self.answer("result_bundle", sha1, |s| s.bundles.get(sha1))
    }

    async fn job_results_yaml(&self, job_id: &str) -> Result<String> {
        self.answer("job_results_yaml", job_id, |s| s.results_yaml.get(job_id))
    }

    async fn submit(&self, definition: &str) -> Result<String> {
        let job_id = self.answer("submit", "-", |s| s.submit.as_ref())?;
        self.state().submitted.push(definition.to_string());
        Ok(job_id)
    }
}
