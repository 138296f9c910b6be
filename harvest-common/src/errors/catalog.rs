//! Error Catalog for the result harvester
//!
//! Each harvest failure maps to a stable code so log searches and
//! operator runbooks survive message rewording. Each error includes:
//! - A unique code (HRV-E001 through HRV-E499)
//! - A human-readable message
//! - Remediation steps
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                          |
//! |------------|-------------|--------------------------------------|
//! | E001-E099  | Config      | Configuration and credentials        |
//! | E100-E199  | Runner      | Remote test-runner communication     |
//! | E200-E299  | Results     | Result parsing and reconciliation    |
//! | E300-E399  | Reporting   | Downstream submission                |
//! | E400-E499  | Internal    | Store and unexpected internal errors |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering harvester failure scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Config Errors (E001-E099)
    // =========================================================================
    /// Configuration file not found
    ConfigNotFound,
    /// Configuration file could not be read
    ConfigReadError,
    /// Configuration file contains invalid TOML syntax
    ConfigParseError,
    /// Environment variable has invalid value
    ConfigEnvError,
    /// No credentials registered for a runner host
    ConfigMissingCredentials,
    /// No reporting token registered for a team
    ConfigMissingToken,

    // =========================================================================
    // Runner Errors (E100-E199)
    // =========================================================================
    /// Runner answered with a server error or could not be reached
    RunnerUnavailable,
    /// Runner returned a fault or a malformed response
    RunnerProtocol,
    /// Runner rejected the request (4xx)
    RunnerRejected,

    // =========================================================================
    // Results Errors (E200-E299)
    // =========================================================================
    /// Job definition could not be parsed
    ResultsDefinitionInvalid,
    /// Result bundle could not be parsed
    ResultsBundleInvalid,
    /// Embedded attachment could not be decoded
    ResultsAttachmentInvalid,
    /// Embedded benchmark database could not be read
    ResultsDatabaseError,
    /// Test repository could not be prepared
    ResultsRepositoryError,
    /// No environment label could be derived from job metadata
    ResultsEnvironmentUnresolved,

    // =========================================================================
    // Reporting Errors (E300-E399)
    // =========================================================================
    /// Reporting service returned a status of 300 or above
    ReportingRejected,
    /// Reporting service could not be reached
    ReportingTransport,
    /// Nothing to submit
    ReportingEmpty,

    // =========================================================================
    // Internal Errors (E400-E499)
    // =========================================================================
    /// Store snapshot could not be written or read
    InternalStoreError,
    /// Submission request already consumed
    InternalSubmissionConsumed,
    /// Record or submission not found
    InternalNotFound,
    /// Local I/O failure
    InternalIoError,
}

impl ErrorCode {
    /// Returns the numeric error code (without prefix).
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            Self::ConfigNotFound => 1,
            Self::ConfigReadError => 2,
            Self::ConfigParseError => 3,
            Self::ConfigEnvError => 4,
            Self::ConfigMissingCredentials => 5,
            Self::ConfigMissingToken => 6,

            Self::RunnerUnavailable => 100,
            Self::RunnerProtocol => 101,
            Self::RunnerRejected => 102,

            Self::ResultsDefinitionInvalid => 200,
            Self::ResultsBundleInvalid => 201,
            Self::ResultsAttachmentInvalid => 202,
            Self::ResultsDatabaseError => 203,
            Self::ResultsRepositoryError => 204,
            Self::ResultsEnvironmentUnresolved => 205,

            Self::ReportingRejected => 300,
            Self::ReportingTransport => 301,
            Self::ReportingEmpty => 302,

            Self::InternalStoreError => 400,
            Self::InternalSubmissionConsumed => 401,
            Self::InternalNotFound => 402,
            Self::InternalIoError => 403,
        }
    }

    /// Returns the formatted error code string (e.g., "HRV-E001").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("HRV-E{:03}", self.code_number())
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Config,
            100..=199 => ErrorCategory::Runner,
            200..=299 => ErrorCategory::Results,
            300..=399 => ErrorCategory::Reporting,
            _ => ErrorCategory::Internal,
        }
    }

    /// Whether waiting for a later event is the expected recovery.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RunnerUnavailable | Self::ReportingTransport)
    }

    /// Owned snapshot of this code, suitable for JSON responses.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::ConfigNotFound => "Configuration file not found",
            Self::ConfigReadError => "Failed to read configuration file",
            Self::ConfigParseError => "Configuration file contains invalid TOML syntax",
            Self::ConfigEnvError => "Environment variable has invalid value",
            Self::ConfigMissingCredentials => "No credentials registered for runner host",
            Self::ConfigMissingToken => "No reporting token registered for team",

            Self::RunnerUnavailable => "Runner is unavailable",
            Self::RunnerProtocol => "Runner returned a fault or malformed response",
            Self::RunnerRejected => "Runner rejected the request",

            Self::ResultsDefinitionInvalid => "Job definition could not be parsed",
            Self::ResultsBundleInvalid => "Result bundle could not be parsed",
            Self::ResultsAttachmentInvalid => "Result attachment could not be decoded",
            Self::ResultsDatabaseError => "Embedded benchmark database could not be read",
            Self::ResultsRepositoryError => "Test repository could not be prepared",
            Self::ResultsEnvironmentUnresolved => "Environment label could not be derived",

            Self::ReportingRejected => "Reporting service rejected the submission",
            Self::ReportingTransport => "Reporting service could not be reached",
            Self::ReportingEmpty => "No data to submit",

            Self::InternalStoreError => "Job store persistence failed",
            Self::InternalSubmissionConsumed => "Submission request was already submitted",
            Self::InternalNotFound => "Requested record does not exist",
            Self::InternalIoError => "Local I/O failure",
        }
    }

    /// Operator-facing hints, most likely fix first.
    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::ConfigNotFound => &[
                "Pass --config with the path to harvest.toml",
                "Or rely on HARVEST_* environment variables only",
            ],
            Self::ConfigReadError => &["Check file permissions on the configuration file"],
            Self::ConfigParseError => &["Validate the file with a TOML linter"],
            Self::ConfigEnvError => &["Check the HARVEST_* variable named in the message"],
            Self::ConfigMissingCredentials => &[
                "Add a [[runner.credentials]] entry whose host matches the runner URL",
            ],
            Self::ConfigMissingToken => &["Add the team to [reporting.tokens]"],

            Self::RunnerUnavailable => &[
                "No action needed: the next event for this job retries the harvest",
                "If persistent, check the runner's health page",
            ],
            Self::RunnerProtocol => &[
                "Check the job id exists on the runner",
                "Enable runner.trace_rpc to log request and response bodies",
            ],
            Self::RunnerRejected => &["Verify the runner username and token"],

            Self::ResultsDefinitionInvalid => &["Inspect the job definition on the runner"],
            Self::ResultsBundleInvalid => &["Inspect the result bundle on the runner"],
            Self::ResultsAttachmentInvalid => &["Re-run the job; the attachment may be truncated"],
            Self::ResultsDatabaseError => &["Check the host-side post-processing step"],
            Self::ResultsRepositoryError => &[
                "Check network access to the test repository",
                "Check free space under runner.repo_home",
            ],
            Self::ResultsEnvironmentUnresolved => &[
                "Add device, mode and core metadata to the job definition",
            ],

            Self::ReportingRejected => &["Check the token and the team/project/build path"],
            Self::ReportingTransport => &["Check reporting.url and network access"],
            Self::ReportingEmpty => &["Check that the job produced results"],

            Self::InternalStoreError => &["Check the state_file path is writable"],
            Self::InternalSubmissionConsumed => &["Create a new submission to run the job again"],
            Self::InternalNotFound => &["List records with GET /api/patterns"],
            Self::InternalIoError => &["Check disk space and permissions"],
        }
    }

    /// Every code, in numeric order.
    #[must_use]
    pub fn all() -> &'static [ErrorCode] {
        &[
            Self::ConfigNotFound,
            Self::ConfigReadError,
            Self::ConfigParseError,
            Self::ConfigEnvError,
            Self::ConfigMissingCredentials,
            Self::ConfigMissingToken,
            Self::RunnerUnavailable,
            Self::RunnerProtocol,
            Self::RunnerRejected,
            Self::ResultsDefinitionInvalid,
            Self::ResultsBundleInvalid,
            Self::ResultsAttachmentInvalid,
            Self::ResultsDatabaseError,
            Self::ResultsRepositoryError,
            Self::ResultsEnvironmentUnresolved,
            Self::ReportingRejected,
            Self::ReportingTransport,
            Self::ReportingEmpty,
            Self::InternalStoreError,
            Self::InternalSubmissionConsumed,
            Self::InternalNotFound,
            Self::InternalIoError,
        ]
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_string(), self.message())
    }
}

/// Error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Configuration and credentials (E001-E099)
    Config,
    /// Remote test-runner communication (E100-E199)
    Runner,
    /// Result parsing and reconciliation (E200-E299)
    Results,
    /// Downstream submission (E300-E399)
    Reporting,
    /// Store and internal errors (E400-E499)
    Internal,
}

impl ErrorCategory {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Config => "Configuration",
            Self::Runner => "Runner",
            Self::Results => "Results",
            Self::Reporting => "Reporting",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A code resolved to its printable parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// `HRV-Ennn`
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Multi-line rendering used by `check-config` and CLI failures.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut out = self.format_brief();
        out.push('\n');
        if self.remediation.is_empty() {
            return out;
        }
        out.push_str("\nTry:\n");
        for (n, step) in self.remediation.iter().enumerate() {
            out.push_str(&format!("  {}. {step}\n", n + 1));
        }
        out
    }

    #[must_use]
    pub fn format_brief(&self) -> String {
        format!("[{}] {}", self.code, self.message)
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_brief())
    }
}
