//! Configuration file loading and environment overrides.

use super::env::{EnvError, EnvParser};
use super::source::{ConfigSource, Sourced};
use crate::errors::ErrorCode;
use crate::types::HarvestConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid environment: {}", format_env_errors(.0))]
    Env(Vec<EnvError>),
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::ConfigNotFound,
            Self::Read { .. } => ErrorCode::ConfigReadError,
            Self::Parse { .. } => ErrorCode::ConfigParseError,
            Self::Env(_) => ErrorCode::ConfigEnvError,
        }
    }
}

fn format_env_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Configuration after file loading and environment overrides.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: HarvestConfig,
    pub path: Option<PathBuf>,
    /// Environment variables that replaced a file or default value.
    pub overridden: Vec<String>,
}

/// Load `path` (if given) and apply `HARVEST_*` overrides.
pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_file(path)?,
        None => HarvestConfig::default(),
    };

    let mut parser = EnvParser::new();
    let overridden = apply_env_overrides(&mut config, &mut parser);
    if parser.has_errors() {
        return Err(ConfigError::Env(parser.take_errors()));
    }

    Ok(LoadedConfig {
        config,
        path: path.map(Path::to_path_buf),
        overridden,
    })
}

fn read_file(path: &Path) -> Result<HarvestConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply environment overrides in place; returns the variables applied.
pub fn apply_env_overrides(config: &mut HarvestConfig, parser: &mut EnvParser) -> Vec<String> {
    let mut applied = Vec::new();

    let level = parser.get_log_level("LOG_LEVEL", &config.general.log_level);
    set_if_env(&mut config.general.log_level, level, &mut applied);

    let listen = parser.get_string("LISTEN_ADDR", &config.general.listen_addr);
    set_if_env(&mut config.general.listen_addr, listen, &mut applied);

    let state_file = parser.get_optional_string("STATE_FILE");
    set_if_env(&mut config.general.state_file, state_file, &mut applied);

    let timeout = parser.get_u64_range("RUNNER_TIMEOUT_SECS", config.runner.timeout_secs, 1, 3600);
    set_if_env(&mut config.runner.timeout_secs, timeout, &mut applied);

    let repo_home = parser.get_path("REPO_HOME", &config.runner.repo_home);
    if repo_home.source == ConfigSource::Environment {
        config.runner.repo_home = repo_home.value.to_string_lossy().into_owned();
        applied.extend(repo_home.origin);
    }

    let trace = parser.get_bool("TRACE_RPC", config.runner.trace_rpc);
    set_if_env(&mut config.runner.trace_rpc, trace, &mut applied);

    let url = parser.get_string("REPORTING_URL", &config.reporting.url);
    set_if_env(&mut config.reporting.url, url, &mut applied);

    let reporting_timeout = parser.get_u64_range(
        "REPORTING_TIMEOUT_SECS",
        config.reporting.timeout_secs,
        1,
        3600,
    );
    set_if_env(&mut config.reporting.timeout_secs, reporting_timeout, &mut applied);

    for var in &applied {
        debug!(var = %var, "configuration overridden from environment");
    }
    applied
}

fn set_if_env<T>(slot: &mut T, sourced: Sourced<T>, applied: &mut Vec<String>) {
    if sourced.source == ConfigSource::Environment {
        *slot = sourced.value;
        applied.extend(sourced.origin);
    }
}
