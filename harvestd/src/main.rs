//! Result Harvester - Daemon
//!
//! Receives completion events for runner jobs, pulls their results once
//! they finish and forwards normalized benchmarks to the reporting
//! service.

#![forbid(unsafe_code)]

mod connector;
mod errors;
mod http_api;
mod orchestrator;
mod reporting;
mod store;
mod submission;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use harvest_common::{
    BuildCoordinate, EventPayload, HarvestConfig, InboundEvent, LogConfig, NewJobRecord,
    init_logging, load_config, validate_config,
};
use harvest_common::config::Severity;
use harvest_miner::GitCli;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use connector::{RunnerConnector, XmlRpcConnector};
use orchestrator::Orchestrator;
use reporting::SquadReporter;
use store::JobStore;

#[derive(Parser)]
#[command(name = "harvestd")]
#[command(author, version, about = "Result harvester daemon - pulls finished runner jobs and forwards their results")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "HARVEST_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP intake and harvest jobs as events arrive
    Serve {
        /// Listen address, overriding the configuration
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Register a job and harvest it right away
    PullJob {
        /// Runner URL, e.g. https://validation.example.org/RPC2/
        runner: String,
        /// Runner job id
        job_id: String,
        /// Build name
        build: String,
        /// Reporting project as team/project
        project: String,
        /// URL of the build that produced the tested artifacts
        #[arg(long, default_value = "")]
        build_url: String,
    },

    /// Load and validate the configuration, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    let config = loaded.config;

    let mut log_config = LogConfig::from_env(&config.general.log_level);
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _log_guard = init_logging(&log_config).context("failed to initialize logging")?;

    match cli.command {
        Command::CheckConfig => check_config(&config, loaded.path, &loaded.overridden),
        Command::Serve { listen } => serve(config, listen).await,
        Command::PullJob {
            runner,
            job_id,
            build,
            project,
            build_url,
        } => pull_job(config, runner, job_id, build, project, build_url).await,
    }
}

fn check_config(config: &HarvestConfig, path: Option<PathBuf>, overridden: &[String]) -> Result<()> {
    match &path {
        Some(path) => println!("configuration: {}", path.display()),
        None => println!("configuration: defaults"),
    }
    for var in overridden {
        println!("overridden by {var}");
    }

    let warnings = validate_config(config);
    for warning in &warnings {
        println!("{}: {}: {}", warning.severity, warning.field, warning.message);
    }
    if warnings.iter().any(|w| w.severity == Severity::Error) {
        anyhow::bail!("configuration has errors");
    }
    println!("configuration ok");
    Ok(())
}

struct Daemon {
    store: Arc<JobStore>,
    connector: Arc<dyn RunnerConnector>,
    orchestrator: Arc<Orchestrator>,
}

fn build_daemon(config: &HarvestConfig) -> Result<Daemon> {
    for warning in validate_config(config) {
        warn!(field = warning.field, severity = %warning.severity, "{}", warning.message);
    }

    let store = match &config.general.state_file {
        Some(path) => Arc::new(JobStore::open(path).context("failed to open job store")?),
        None => {
            info!("Job store in-memory only (no persistence)");
            Arc::new(JobStore::new())
        }
    };
    let connector: Arc<dyn RunnerConnector> = Arc::new(XmlRpcConnector::new(config.runner.clone()));
    let reporter = Arc::new(
        SquadReporter::new(&config.reporting).context("failed to build reporting client")?,
    );
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        connector.clone(),
        reporter,
        Arc::new(GitCli),
        &config.runner.repo_home,
    ));

    Ok(Daemon {
        store,
        connector,
        orchestrator,
    })
}

async fn serve(config: HarvestConfig, listen: Option<String>) -> Result<()> {
    info!("Starting result harvester...");
    let daemon = build_daemon(&config)?;
    let addr = listen.unwrap_or_else(|| config.general.listen_addr.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let state = http_api::HttpState {
        store: daemon.store,
        orchestrator: daemon.orchestrator,
        connector: daemon.connector,
        version: env!("CARGO_PKG_VERSION"),
        started_at: Instant::now(),
    };
    let server = http_api::start_server(listener, state).await;

    tokio::select! {
        result = server => {
            match result {
                Ok(Ok(())) => info!("HTTP intake stopped"),
                Ok(Err(e)) => error!(error = %e, "HTTP intake failed"),
                Err(e) => error!(error = %e, "HTTP intake task panicked"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }
    Ok(())
}

async fn pull_job(
    config: HarvestConfig,
    runner: String,
    job_id: String,
    build: String,
    project: String,
    build_url: String,
) -> Result<()> {
    let coordinate: BuildCoordinate = format!("{project}/{build}")
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))
        .context("project must be team/project")?;

    let daemon = build_daemon(&config)?;
    let (record, created) = daemon.store.register(NewJobRecord {
        runner_url: runner,
        job_id: job_id.clone(),
        status: None,
        build: coordinate,
        build_url,
        requester: "cli".to_string(),
    })?;
    info!(record = record.id, created, job_id = %job_id, "pulling job");

    let event = InboundEvent {
        uuid: uuid::Uuid::new_v4().to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        username: "cli".to_string(),
        payload: EventPayload {
            job: job_id,
            sub_id: None,
            description: build,
            status: "Complete".to_string(),
            pipeline: true,
        },
    };
    let reports = daemon.orchestrator.handle_event(&event).await;
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}
