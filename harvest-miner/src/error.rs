//! Error classification for runner access and result parsing.
//!
//! Only [`MinerError::RunnerUnavailable`] is transient: the caller drops
//! the attempt and waits for the next event. Everything else is fatal for
//! the current attempt.

use harvest_common::ErrorCode;

pub type Result<T> = std::result::Result<T, MinerError>;

#[derive(Debug, thiserror::Error)]
pub enum MinerError {
    /// 5xx, timeout or connection failure.
    #[error("runner {url} unavailable: {reason}")]
    RunnerUnavailable { url: String, reason: String },

    /// Remote fault or a response that does not decode.
    #[error("runner protocol error: {0}")]
    RunnerProtocol(String),

    /// 4xx from the runner.
    #[error("{url} returned status code {status}")]
    RunnerRejected { url: String, status: u16 },

    #[error("invalid job definition: {0}")]
    Definition(String),

    #[error("invalid result bundle: {0}")]
    Bundle(String),

    #[error("invalid attachment: {0}")]
    Attachment(String),

    #[error("benchmark database error: {0}")]
    Database(String),

    #[error("test repository error: {0}")]
    Repository(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MinerError {
    /// Whether a later event should simply retry the whole harvest.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RunnerUnavailable { .. })
    }

    /// Classify an HTTP status from the runner endpoint.
    pub fn from_status(url: &str, status: u16) -> Self {
        if (500..600).contains(&status) {
            Self::RunnerUnavailable {
                url: url.to_string(),
                reason: format!("status code {status}"),
            }
        } else {
            Self::RunnerRejected {
                url: url.to_string(),
                status,
            }
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::RunnerUnavailable { .. } => ErrorCode::RunnerUnavailable,
            Self::RunnerProtocol(_) => ErrorCode::RunnerProtocol,
            Self::RunnerRejected { .. } => ErrorCode::RunnerRejected,
            Self::Definition(_) => ErrorCode::ResultsDefinitionInvalid,
            Self::Bundle(_) => ErrorCode::ResultsBundleInvalid,
            Self::Attachment(_) => ErrorCode::ResultsAttachmentInvalid,
            Self::Database(_) => ErrorCode::ResultsDatabaseError,
            Self::Repository(_) => ErrorCode::ResultsRepositoryError,
            Self::Io(_) => ErrorCode::InternalIoError,
        }
    }
}

impl From<rusqlite::Error> for MinerError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(MinerError::from_status("http://r/RPC2/", 503).is_transient());
        assert!(MinerError::from_status("http://r/RPC2/", 500).is_transient());
        assert!(matches!(
            MinerError::from_status("http://r/RPC2/", 401),
            MinerError::RunnerRejected { status: 401, .. }
        ));
        assert!(!MinerError::from_status("http://r/RPC2/", 404).is_transient());
    }

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(!MinerError::RunnerProtocol("fault".into()).is_transient());
        assert!(!MinerError::Bundle("bad".into()).is_transient());
        assert!(!MinerError::Repository("clone".into()).is_transient());
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            MinerError::RunnerProtocol("x".into()).code(),
            ErrorCode::RunnerProtocol
        );
        assert_eq!(
            MinerError::Database("x".into()).code(),
            ErrorCode::ResultsDatabaseError
        );
    }

    #[test]
    fn test_rejected_message_names_url() {
        let err = MinerError::from_status("http://runner/RPC2/", 403);
        assert_eq!(err.to_string(), "http://runner/RPC2/ returned status code 403");
    }
}
