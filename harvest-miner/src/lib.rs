//! Result mining for the harvester.
//!
//! Talks to the remote test runner, walks job definitions, reconciles
//! declared tests with reported runs and normalizes every supported
//! result format into [`harvest_common::NormalizedBenchmark`]s.

pub mod bundle;
pub mod error;
pub mod literal;
pub mod matcher;
pub mod mock;
pub mod repos;
pub mod results;
pub mod runner;
pub mod walker;
pub mod xmlrpc;

pub use error::{MinerError, Result};
pub use repos::{GitCli, RepoCache, Vcs};
pub use results::{JobSummary, ResultData, ResultSystem, ResultVariant};
pub use runner::{JobDetails, JobStatusInfo, RunnerApi, XmlRpcRunner};
