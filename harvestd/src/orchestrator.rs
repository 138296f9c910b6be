//! Harvest attempts driven by inbound completion events.
//!
//! An attempt walks a record through fixed stages: status check, variant
//! upgrade, details, results, submission. Each stage produces a new value
//! for the next one; the record in the store is only written when an
//! attempt settles. A runner that is temporarily unavailable ends the
//! attempt without touching the record so the next event starts over.

use crate::connector::RunnerConnector;
use crate::errors::HarvestError;
use crate::reporting::{Report, ReportSink, aggregate};
use crate::store::JobStore;
use chrono::{SecondsFormat, Utc};
use harvest_common::{InboundEvent, JobRecord, Metadata, NormalizedBenchmark};
use harvest_miner::results::{self, ResultSystem};
use harvest_miner::{RepoCache, ResultData, ResultVariant, RunnerApi, Vcs};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Runner statuses after which a job will not change again.
pub const TERMINAL_STATUSES: [&str; 3] = ["Complete", "Incomplete", "Canceled"];

/// Status recorded when a specialised variant finds no results.
pub const RESULTS_MISSING: &str = "Results Missing";

/// How one attempt on one record ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HarvestOutcome {
    /// The record was no longer active.
    Skipped,
    /// The job is still running.
    Polling { status: String },
    /// Finished without results (Incomplete or Canceled).
    Resultless { status: String },
    ResultsMissing { variant: ResultVariant },
    Submitted {
        environment: String,
        benchmarks: usize,
        summary: BTreeMap<String, Vec<f64>>,
    },
    /// Downstream refused the report; the record stays active.
    NotAccepted { code: String, reason: String },
    /// Transient runner failure; the record was left untouched.
    Deferred { code: String, reason: String },
    Failed { code: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarvestReport {
    pub record: u64,
    pub job_id: String,
    #[serde(flatten)]
    pub outcome: HarvestOutcome,
}

/// Status checked, variant known.
struct Contacted {
    status: String,
    variant: ResultVariant,
}

/// Details fetched and metadata enriched.
struct Described {
    status: String,
    variant: ResultVariant,
    metadata: Metadata,
    environment: Option<String>,
}

/// Results parsed and raw data fetched.
struct Harvested {
    described: Described,
    benchmarks: Vec<NormalizedBenchmark>,
    data: Option<ResultData>,
}

pub struct Orchestrator {
    store: Arc<JobStore>,
    connector: Arc<dyn RunnerConnector>,
    reporter: Arc<dyn ReportSink>,
    vcs: Arc<dyn Vcs>,
    repo_home: PathBuf,
}

impl Orchestrator {
    pub fn new(
        store: Arc<JobStore>,
        connector: Arc<dyn RunnerConnector>,
        reporter: Arc<dyn ReportSink>,
        vcs: Arc<dyn Vcs>,
        repo_home: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            connector,
            reporter,
            vcs,
            repo_home: repo_home.into(),
        }
    }

    /// Harvest every active record the event refers to.
    pub async fn handle_event(&self, event: &InboundEvent) -> Vec<HarvestReport> {
        let job_id = event.payload.job_identifier();
        let records = self.store.active_for_job(job_id);
        if records.is_empty() {
            debug!(job_id, status = %event.payload.status, "no active record for event");
            return Vec::new();
        }

        info!(
            job_id,
            status = %event.payload.status,
            records = records.len(),
            "handling completion event"
        );
        let mut reports = Vec::with_capacity(records.len());
        for record in records {
            reports.push(self.harvest(record.id).await);
        }
        reports
    }

    /// Run one attempt on a record. Never panics on runner or reporting
    /// failures; they come back as the report's outcome.
    pub async fn harvest(&self, record_id: u64) -> HarvestReport {
        let lock = self.store.record_lock(record_id);
        let _guard = lock.lock().await;

        let Some(record) = self.store.get(record_id) else {
            let err = HarvestError::NotFound(format!("job record {record_id}"));
            return HarvestReport {
                record: record_id,
                job_id: String::new(),
                outcome: failed(&err),
            };
        };
        if !record.active {
            debug!(record = record.id, job_id = %record.job_id, "record already inactive");
            return report(&record, HarvestOutcome::Skipped);
        }

        let outcome = match self.attempt(&record).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_transient() => {
                warn!(
                    record = record.id,
                    job_id = %record.job_id,
                    code = %e.code().code_string(),
                    error = %e,
                    "runner unavailable, waiting for the next event"
                );
                HarvestOutcome::Deferred {
                    code: e.code().code_string(),
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                error!(
                    record = record.id,
                    job_id = %record.job_id,
                    code = %e.code().code_string(),
                    error = %e,
                    "harvest attempt failed"
                );
                failed(&e)
            }
        };
        report(&record, outcome)
    }

    async fn attempt(&self, record: &JobRecord) -> Result<HarvestOutcome, HarvestError> {
        let runner = self.connector.connect(&record.runner_url)?;
        let repos = Arc::new(RepoCache::for_attempt(&self.repo_home, self.vcs.clone()));
        let fixed = record
            .result_class
            .as_deref()
            .and_then(|c| c.parse::<ResultVariant>().ok());
        let mut system = results::build(
            fixed.unwrap_or(ResultVariant::Generic),
            runner.clone(),
            repos.clone(),
        );

        let outcome = self.run(record, fixed, &runner, &repos, &mut system).await;
        system.cleanup();
        outcome
    }

    async fn run(
        &self,
        record: &JobRecord,
        fixed: Option<ResultVariant>,
        runner: &Arc<dyn RunnerApi>,
        repos: &Arc<RepoCache>,
        system: &mut Box<dyn ResultSystem>,
    ) -> Result<HarvestOutcome, HarvestError> {
        let contacted = self.check_status(record, fixed, runner, repos, system).await?;
        if !TERMINAL_STATUSES.contains(&contacted.status.as_str()) {
            debug!(job_id = %record.job_id, status = %contacted.status, "job not finished");
            self.settle(record, &contacted.status, contacted.variant)?;
            return Ok(HarvestOutcome::Polling {
                status: contacted.status,
            });
        }

        let described = self.describe(record, contacted, &**system).await?;
        if described.status != "Complete" {
            self.settle(record, &described.status, described.variant)?;
            return Ok(HarvestOutcome::Resultless {
                status: described.status,
            });
        }

        let benchmarks = system.job_results(&record.job_id).await?;
        if benchmarks.is_empty() && !described.variant.is_generic() {
            warn!(job_id = %record.job_id, variant = %described.variant, "results missing");
            self.settle(record, RESULTS_MISSING, described.variant)?;
            return Ok(HarvestOutcome::ResultsMissing {
                variant: described.variant,
            });
        }
        let data = system.result_data(&record.job_id).await?;
        let harvested = Harvested {
            described,
            benchmarks,
            data,
        };

        self.settle(record, &harvested.described.status, harvested.described.variant)?;
        self.submit(record, harvested).await
    }

    /// Fetch the status and, on first contact, rebind to the job's variant.
    async fn check_status(
        &self,
        record: &JobRecord,
        fixed: Option<ResultVariant>,
        runner: &Arc<dyn RunnerApi>,
        repos: &Arc<RepoCache>,
        system: &mut Box<dyn ResultSystem>,
    ) -> Result<Contacted, HarvestError> {
        let status = system.job_status(&record.job_id).await?.status;
        let variant = match fixed {
            Some(variant) => variant,
            None => {
                let variant = system.result_class(&record.job_id).await?;
                info!(record = record.id, job_id = %record.job_id, variant = %variant, "result variant resolved");
                if variant != system.variant() {
                    *system = results::build(variant, runner.clone(), repos.clone());
                }
                variant
            }
        };
        Ok(Contacted { status, variant })
    }

    async fn describe(
        &self,
        record: &JobRecord,
        contacted: Contacted,
        system: &dyn ResultSystem,
    ) -> Result<Described, HarvestError> {
        let summary = system.job_details(&record.job_id).await?;
        let mut metadata = summary.metadata;
        metadata.insert("job_id".into(), Value::String(record.job_id.clone()));
        metadata.insert("job_status".into(), Value::String(contacted.status.clone()));
        metadata.insert("job_url".into(), Value::String(system.job_url(&record.job_id)));
        metadata.insert(
            "datetime".into(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        metadata.insert("build_url".into(), Value::String(record.build_url.clone()));

        let environment = system.environment_name(&metadata);
        debug!(job_id = %record.job_id, name = %summary.name, environment = ?environment, "job described");
        Ok(Described {
            status: contacted.status,
            variant: contacted.variant,
            metadata,
            environment,
        })
    }

    async fn submit(
        &self,
        record: &JobRecord,
        harvested: Harvested,
    ) -> Result<HarvestOutcome, HarvestError> {
        let Harvested {
            described,
            benchmarks,
            data,
        } = harvested;
        let environment = described
            .environment
            .ok_or_else(|| HarvestError::EnvironmentUnresolved {
                job_id: record.job_id.clone(),
            })?;

        let aggregated = aggregate(&benchmarks);
        debug!(job_id = %record.job_id, summary = ?aggregated.summary, "aggregated measurements");
        let payload = Report {
            tests: None,
            metrics: Some(aggregated.metrics),
            metadata: described.metadata,
            attachment: data,
        };

        match self.reporter.submit(&record.build, &environment, &payload).await {
            Ok(()) => {
                self.store.deactivate(record.id)?;
                info!(
                    record = record.id,
                    job_id = %record.job_id,
                    environment = %environment,
                    benchmarks = benchmarks.len(),
                    "results submitted"
                );
                Ok(HarvestOutcome::Submitted {
                    environment,
                    benchmarks: benchmarks.len(),
                    summary: aggregated.summary,
                })
            }
            Err(e) => {
                let code = e.code().code_string();
                warn!(record = record.id, job_id = %record.job_id, code = %code, error = %e, "report not accepted");
                Ok(HarvestOutcome::NotAccepted {
                    code,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Write the attempt's status and, if new, the resolved variant.
    fn settle(&self, record: &JobRecord, status: &str, variant: ResultVariant) -> Result<(), HarvestError> {
        if record.result_class.is_none() {
            self.store.set_result_class(record.id, variant.name())?;
        }
        self.store.update_status(record.id, status)?;
        Ok(())
    }
}

fn report(record: &JobRecord, outcome: HarvestOutcome) -> HarvestReport {
    HarvestReport {
        record: record.id,
        job_id: record.job_id.clone(),
        outcome,
    }
}

fn failed(e: &HarvestError) -> HarvestOutcome {
    HarvestOutcome::Failed {
        code: e.code().code_string(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::reporting::ReportError;
    use async_trait::async_trait;
    use harvest_common::BuildCoordinate;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct Sent {
        pub build: BuildCoordinate,
        pub environment: String,
        pub metrics: serde_json::Map<String, Value>,
        pub metadata: Metadata,
        pub attachment: Option<String>,
    }

    /// Records every report and answers with a fixed result.
    #[derive(Default)]
    pub struct RecordingSink {
        pub sent: Mutex<Vec<Sent>>,
        pub reject_with: Mutex<Option<u16>>,
    }

    impl RecordingSink {
        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReportSink for RecordingSink {
        async fn submit(
            &self,
            build: &BuildCoordinate,
            environment: &str,
            report: &Report,
        ) -> Result<(), ReportError> {
            self.sent.lock().unwrap().push(Sent {
                build: build.clone(),
                environment: environment.to_string(),
                metrics: report.metrics.clone().unwrap_or_default(),
                metadata: report.metadata.clone(),
                attachment: report.attachment.as_ref().map(|a| a.filename.clone()),
            });
            match *self.reject_with.lock().unwrap() {
                Some(status) => Err(ReportError::Rejected {
                    status,
                    body: "rejected".into(),
                }),
                None => Ok(()),
            }
        }
    }
}
