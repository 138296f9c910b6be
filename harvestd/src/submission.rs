//! Submitting stored job definitions to a runner.

use crate::connector::RunnerConnector;
use crate::errors::HarvestError;
use crate::store::JobStore;
use harvest_common::{JobRecord, NewJobRecord, SubmissionRequest};
use tracing::{info, warn};

/// Submit a stored request once and register a record for the new job.
///
/// A request that was already submitted fails with
/// [`HarvestError::SubmissionConsumed`] before the runner is contacted.
pub async fn submit(
    store: &JobStore,
    connector: &dyn RunnerConnector,
    submission_id: u64,
) -> Result<(SubmissionRequest, JobRecord), HarvestError> {
    let request = store.claim_submission(submission_id)?;

    let job_id = match submit_to_runner(connector, &request).await {
        Ok(job_id) => job_id,
        Err(e) => {
            warn!(
                submission = submission_id,
                code = %e.code().code_string(),
                error = %e,
                "runner refused submission"
            );
            store.release_submission(submission_id);
            return Err(e);
        }
    };

    let (record, _) = store.register(NewJobRecord {
        runner_url: request.runner_url.clone(),
        job_id: job_id.clone(),
        status: Some("Submitted".to_string()),
        build: request.build.clone(),
        build_url: request.build_url.clone(),
        requester: request.requester.clone(),
    })?;
    let request = store.complete_submission(submission_id, &job_id)?;
    info!(submission = submission_id, job_id = %job_id, record = record.id, "definition submitted");
    Ok((request, record))
}

async fn submit_to_runner(
    connector: &dyn RunnerConnector,
    request: &SubmissionRequest,
) -> Result<String, HarvestError> {
    let runner = connector.connect(&request.runner_url)?;
    Ok(runner.submit(&request.definition).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::testing::StaticConnector;
    use harvest_common::testing::init_test_logging;
    use harvest_common::{BuildCoordinate, NewSubmission};
    use harvest_miner::mock::{Canned, MockRunner};
    use std::sync::Arc;

    fn setup() -> (JobStore, StaticConnector, u64) {
        init_test_logging();
        let store = JobStore::new();
        let submission = store
            .add_submission(NewSubmission {
                definition: "{\"job_name\": \"boot\"}".into(),
                runner_url: "https://validation.example.org/RPC2/".into(),
                build: BuildCoordinate::new("qa", "linux-mainline", "v6.1"),
                build_url: "https://ci.example.org/job/9/".into(),
                requester: "ci".into(),
            })
            .unwrap();
        let runner = Arc::new(MockRunner::new("https://validation.example.org/RPC2/"));
        (store, StaticConnector { runner }, submission.id)
    }

    #[tokio::test]
    async fn test_submit_registers_record() {
        let (store, connector, id) = setup();
        connector.runner.set_submit_response(Canned::Ok("5001".into()));

        let (request, record) = submit(&store, &connector, id).await.unwrap();
        assert!(request.submitted);
        assert_eq!(request.job_id.as_deref(), Some("5001"));
        assert_eq!(record.job_id, "5001");
        assert_eq!(record.build.to_string(), "qa/linux-mainline/v6.1");
        assert!(record.active);
        assert_eq!(
            connector.runner.submitted_definitions(),
            vec!["{\"job_name\": \"boot\"}".to_string()]
        );
    }

    #[tokio::test]
    async fn test_consumed_submission_makes_no_remote_call() {
        let (store, connector, id) = setup();
        connector.runner.set_submit_response(Canned::Ok("5001".into()));
        submit(&store, &connector, id).await.unwrap();

        let err = submit(&store, &connector, id).await.unwrap_err();
        assert!(matches!(err, HarvestError::SubmissionConsumed(n) if n == id));
        assert_eq!(connector.runner.calls().len(), 1);
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_refused_submission_can_be_retried() {
        let (store, connector, id) = setup();
        connector.runner.set_submit_response(Canned::Unavailable);
        let err = submit(&store, &connector, id).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!store.submission(id).unwrap().submitted);
        assert!(store.records().is_empty());

        connector.runner.set_submit_response(Canned::Ok("5002".into()));
        let (_, record) = submit(&store, &connector, id).await.unwrap();
        assert_eq!(record.job_id, "5002");
    }

    #[tokio::test]
    async fn test_unknown_submission() {
        let (store, connector, _) = setup();
        assert!(matches!(
            submit(&store, &connector, 999).await,
            Err(HarvestError::NotFound(_))
        ));
    }
}
