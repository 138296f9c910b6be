//! Shared types, configuration and logging for the result harvester.
//!
//! The harvester pulls completed job results from a remote test runner,
//! normalizes them into benchmarks, and forwards them to a reporting
//! service. This crate holds what both the mining library and the daemon
//! need: the data model, the error catalog, configuration and logging.

pub mod config;
pub mod errors;
pub mod logging;
pub mod testing;
pub mod types;
pub mod util;

pub use config::{ConfigError, LoadedConfig, load_config, validate_config};
pub use errors::{ErrorCategory, ErrorCode, ErrorEntry};
pub use logging::{LogConfig, LogFormat, LogGuard, init_logging};
pub use types::{
    Attachment, BuildCoordinate, DeclaredTest, EventPayload, GeneralConfig, HarvestConfig,
    InboundEvent, JobRecord, Metadata, NewJobRecord, NewSubmission, NormalizedBenchmark, Outcome,
    ReportingConfig, ResultRecord, RunnerConfig, RunnerCredential, SubmissionRequest, Subscore,
    TestCounts, Verdict,
};
