//! Daemon error type.

use crate::reporting::ReportError;
use harvest_common::ErrorCode;
use harvest_miner::MinerError;

#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error(transparent)]
    Miner(#[from] MinerError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("no runner credentials configured for {netloc}")]
    MissingCredentials { netloc: String },

    #[error("could not derive an environment name for job {job_id}")]
    EnvironmentUnresolved { job_id: String },

    #[error("job store error: {0}")]
    Store(String),

    #[error("submission {0} was already submitted")]
    SubmissionConsumed(u64),

    #[error("{0} not found")]
    NotFound(String),
}

impl HarvestError {
    /// Transient errors end the attempt without touching the record.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Miner(e) if e.is_transient())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Miner(e) => e.code(),
            Self::Report(e) => e.code(),
            Self::MissingCredentials { .. } => ErrorCode::ConfigMissingCredentials,
            Self::EnvironmentUnresolved { .. } => ErrorCode::ResultsEnvironmentUnresolved,
            Self::Store(_) => ErrorCode::InternalStoreError,
            Self::SubmissionConsumed(_) => ErrorCode::InternalSubmissionConsumed,
            Self::NotFound(_) => ErrorCode::InternalNotFound,
        }
    }
}
