//! Job records and submission requests.
//!
//! Everything lives in memory behind `RwLock`s. With persistence enabled
//! a JSON snapshot is rewritten after every mutation and read back at
//! startup. Harvest attempts for the same record serialize on
//! [`JobStore::record_lock`].

use crate::errors::HarvestError;
use chrono::Utc;
use harvest_common::{JobRecord, NewJobRecord, NewSubmission, SubmissionRequest};
use harvest_miner::runner::normalize_base_url;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    records: Vec<JobRecord>,
    #[serde(default)]
    submissions: Vec<SubmissionRequest>,
}

pub struct JobStore {
    records: RwLock<BTreeMap<u64, JobRecord>>,
    submissions: RwLock<BTreeMap<u64, SubmissionRequest>>,
    next_id: AtomicU64,
    record_locks: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<()>>>>,
    persistence_path: Option<PathBuf>,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            submissions: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            record_locks: Mutex::new(HashMap::new()),
            persistence_path: None,
        }
    }

    /// Store persisted at `path`, loading the existing snapshot if any.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HarvestError> {
        let path = path.into();
        let mut store = Self::new();

        if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| HarvestError::Store(format!("read {}: {e}", path.display())))?;
            let snapshot: Snapshot = serde_json::from_str(&text)
                .map_err(|e| HarvestError::Store(format!("parse {}: {e}", path.display())))?;

            let max_id = snapshot
                .records
                .iter()
                .map(|r| r.id)
                .chain(snapshot.submissions.iter().map(|s| s.id))
                .max()
                .unwrap_or(0);
            store.next_id = AtomicU64::new(max_id + 1);
            info!(
                path = %path.display(),
                records = snapshot.records.len(),
                submissions = snapshot.submissions.len(),
                "loaded job store"
            );
            store.records = RwLock::new(snapshot.records.into_iter().map(|r| (r.id, r)).collect());
            store.submissions =
                RwLock::new(snapshot.submissions.into_iter().map(|s| (s.id, s)).collect());
        }

        store.persistence_path = Some(path);
        Ok(store)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn persist(&self) -> Result<(), HarvestError> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };
        let snapshot = Snapshot {
            records: self.records().into_iter().collect(),
            submissions: self.submissions(),
        };
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| HarvestError::Store(format!("encode snapshot: {e}")))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| HarvestError::Store(format!("create {}: {e}", parent.display())))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .and_then(|()| std::fs::rename(&tmp, path))
            .map_err(|e| HarvestError::Store(format!("write {}: {e}", path.display())))?;
        debug!(path = %path.display(), "persisted job store");
        Ok(())
    }

    /// Register a record; an existing record for the same runner and job
    /// id is returned instead. The flag is true when a record was created.
    ///
    /// Runner URLs compare by their base, so `.../RPC2/` and `.../RPC2`
    /// name the same runner.
    pub fn register(&self, new: NewJobRecord) -> Result<(JobRecord, bool), HarvestError> {
        let runner = normalize_base_url(&new.runner_url);
        let record = {
            let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = records.values().find(|r| {
                r.job_id == new.job_id && normalize_base_url(&r.runner_url) == runner
            }) {
                return Ok((existing.clone(), false));
            }

            let record = JobRecord {
                id: self.next_id(),
                runner_url: new.runner_url,
                job_id: new.job_id,
                status: new.status,
                build: new.build,
                build_url: new.build_url,
                requester: new.requester,
                created_at: Utc::now(),
                result_class: None,
                active: true,
            };
            info!(record = record.id, job_id = %record.job_id, build = %record.build, "registered job record");
            records.insert(record.id, record.clone());
            record
        };
        self.persist()?;
        Ok((record, true))
    }

    pub fn get(&self, id: u64) -> Option<JobRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn records(&self) -> Vec<JobRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Active records for a runner job id.
    pub fn active_for_job(&self, job_id: &str) -> Vec<JobRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| r.active && r.job_id == job_id)
            .cloned()
            .collect()
    }

    fn update(&self, id: u64, apply: impl FnOnce(&mut JobRecord)) -> Result<JobRecord, HarvestError> {
        let updated = {
            let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
            let record = records
                .get_mut(&id)
                .ok_or_else(|| HarvestError::NotFound(format!("job record {id}")))?;
            apply(record);
            record.clone()
        };
        self.persist()?;
        Ok(updated)
    }

    pub fn update_status(&self, id: u64, status: &str) -> Result<JobRecord, HarvestError> {
        debug!(record = id, status, "updating job status");
        self.update(id, |r| r.status = Some(status.to_string()))
    }

    pub fn set_result_class(&self, id: u64, class: &str) -> Result<JobRecord, HarvestError> {
        debug!(record = id, class, "fixing result class");
        self.update(id, |r| r.result_class = Some(class.to_string()))
    }

    /// Mark a record done and forget its harvest lock. Attempts already
    /// waiting on the lock still hold it and see the record inactive.
    pub fn deactivate(&self, id: u64) -> Result<JobRecord, HarvestError> {
        info!(record = id, "deactivating job record");
        let record = self.update(id, |r| r.active = false)?;
        self.record_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        Ok(record)
    }

    /// Per-record async lock held for the duration of a harvest attempt.
    pub fn record_lock(&self, id: u64) -> Arc<tokio::sync::Mutex<()>> {
        self.record_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .clone()
    }

    pub fn add_submission(&self, new: NewSubmission) -> Result<SubmissionRequest, HarvestError> {
        let submission = SubmissionRequest {
            id: self.next_id(),
            definition: new.definition,
            runner_url: new.runner_url,
            build: new.build,
            build_url: new.build_url,
            requester: new.requester,
            created_at: Utc::now(),
            submitted: false,
            job_id: None,
        };
        self.submissions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(submission.id, submission.clone());
        self.persist()?;
        Ok(submission)
    }

    pub fn submission(&self, id: u64) -> Option<SubmissionRequest> {
        self.submissions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn submissions(&self) -> Vec<SubmissionRequest> {
        self.submissions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Claim an unsubmitted request; fails if it was already claimed.
    pub fn claim_submission(&self, id: u64) -> Result<SubmissionRequest, HarvestError> {
        let mut submissions = self.submissions.write().unwrap_or_else(PoisonError::into_inner);
        let submission = submissions
            .get_mut(&id)
            .ok_or_else(|| HarvestError::NotFound(format!("submission {id}")))?;
        if submission.submitted {
            return Err(HarvestError::SubmissionConsumed(id));
        }
        submission.submitted = true;
        Ok(submission.clone())
    }

    /// Release a claim after the runner refused the definition.
    pub fn release_submission(&self, id: u64) {
        if let Some(submission) = self
            .submissions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&id)
        {
            submission.submitted = false;
        }
    }

    pub fn complete_submission(&self, id: u64, job_id: &str) -> Result<SubmissionRequest, HarvestError> {
        let updated = {
            let mut submissions = self.submissions.write().unwrap_or_else(PoisonError::into_inner);
            let submission = submissions
                .get_mut(&id)
                .ok_or_else(|| HarvestError::NotFound(format!("submission {id}")))?;
            submission.submitted = true;
            submission.job_id = Some(job_id.to_string());
            submission.clone()
        };
        self.persist()?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_common::BuildCoordinate;

    fn new_record(job_id: &str) -> NewJobRecord {
        NewJobRecord {
            runner_url: "https://validation.example.org/RPC2/".into(),
            job_id: job_id.into(),
            status: None,
            build: BuildCoordinate::new("qa", "linux-mainline", "v6.1"),
            build_url: "https://ci.example.org/job/1/".into(),
            requester: "ci".into(),
        }
    }

    fn new_submission() -> NewSubmission {
        NewSubmission {
            definition: "{\"job_name\": \"x\"}".into(),
            runner_url: "https://validation.example.org/RPC2/".into(),
            build: BuildCoordinate::new("qa", "linux-mainline", "v6.1"),
            build_url: "https://ci.example.org/job/1/".into(),
            requester: "ci".into(),
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let store = JobStore::new();
        let (first, created) = store.register(new_record("100")).unwrap();
        assert!(created);
        let (again, created) = store.register(new_record("100")).unwrap();
        assert!(!created);
        assert_eq!(first.id, again.id);

        let (other, created) = store.register(new_record("101")).unwrap();
        assert!(created);
        assert_ne!(other.id, first.id);
        assert_eq!(store.records().len(), 2);
    }

    #[test]
    fn test_register_folds_runner_url_spellings() {
        let store = JobStore::new();
        let (first, _) = store.register(new_record("77")).unwrap();
        for url in [
            "https://validation.example.org/RPC2",
            "https://validation.example.org/",
            " https://validation.example.org/RPC2/ ",
        ] {
            let mut new = new_record("77");
            new.runner_url = url.into();
            let (again, created) = store.register(new).unwrap();
            assert!(!created, "{url}");
            assert_eq!(again.id, first.id);
        }
        assert_eq!(store.active_for_job("77").len(), 1);

        let mut elsewhere = new_record("77");
        elsewhere.runner_url = "https://staging.example.org/RPC2".into();
        assert!(store.register(elsewhere).unwrap().1);
    }

    #[test]
    fn test_active_for_job_skips_inactive() {
        let store = JobStore::new();
        let (record, _) = store.register(new_record("200")).unwrap();
        assert_eq!(store.active_for_job("200").len(), 1);

        store.deactivate(record.id).unwrap();
        assert!(store.active_for_job("200").is_empty());
        assert!(!store.get(record.id).unwrap().active);
    }

    #[test]
    fn test_update_unknown_record() {
        let store = JobStore::new();
        assert!(matches!(
            store.update_status(42, "Complete"),
            Err(HarvestError::NotFound(_))
        ));
    }

    #[test]
    fn test_claim_submission_once() {
        let store = JobStore::new();
        let submission = store.add_submission(new_submission()).unwrap();
        store.claim_submission(submission.id).unwrap();
        assert!(matches!(
            store.claim_submission(submission.id),
            Err(HarvestError::SubmissionConsumed(_))
        ));

        store.release_submission(submission.id);
        store.claim_submission(submission.id).unwrap();
        let done = store.complete_submission(submission.id, "77").unwrap();
        assert!(done.submitted);
        assert_eq!(done.job_id.as_deref(), Some("77"));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("store.json");

        let store = JobStore::open(&path).unwrap();
        let (record, _) = store.register(new_record("300")).unwrap();
        store.update_status(record.id, "Running").unwrap();
        store.set_result_class(record.id, "ArtMicrobenchmarks").unwrap();
        store.add_submission(new_submission()).unwrap();
        assert!(path.exists());

        let reopened = JobStore::open(&path).unwrap();
        let loaded = reopened.get(record.id).unwrap();
        assert_eq!(loaded.status.as_deref(), Some("Running"));
        assert_eq!(loaded.result_class.as_deref(), Some("ArtMicrobenchmarks"));
        assert_eq!(reopened.submissions().len(), 1);

        let (next, created) = reopened.register(new_record("301")).unwrap();
        assert!(created);
        assert!(next.id > record.id);
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(JobStore::open(&path), Err(HarvestError::Store(_))));
    }

    #[tokio::test]
    async fn test_record_lock_is_shared_per_record() {
        let store = JobStore::new();
        let a = store.record_lock(1);
        let b = store.record_lock(1);
        let c = store.record_lock(2);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        let _held = a.lock().await;
        assert!(b.try_lock().is_err());
        assert!(c.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_deactivate_drops_record_lock() {
        let store = JobStore::new();
        let (done, _) = store.register(new_record("400")).unwrap();
        let (open, _) = store.register(new_record("401")).unwrap();
        let held = store.record_lock(done.id);
        store.record_lock(open.id);

        let _guard = held.lock().await;
        store.deactivate(done.id).unwrap();

        let locks = store.record_locks.lock().unwrap();
        assert!(!locks.contains_key(&done.id));
        assert!(locks.contains_key(&open.id));
    }
}
