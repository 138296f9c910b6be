//! Process-wide logging setup.

use crate::config::EnvParser;
use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `harvestd=debug,harvest_miner=trace`.
    pub level: String,
    pub format: LogFormat,
    /// Append JSON lines to this file in addition to stderr.
    pub file: Option<PathBuf>,
    pub stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
            stderr: true,
        }
    }
}

impl LogConfig {
    /// `HARVEST_LOG` wins over `HARVEST_LOG_LEVEL`; `HARVEST_LOG_FORMAT`
    /// selects pretty or json.
    pub fn from_env(default_level: &str) -> Self {
        let mut parser = EnvParser::new();
        let level = parser
            .get_optional_string("LOG")
            .value
            .unwrap_or_else(|| parser.get_log_level("LOG_LEVEL", default_level).value);
        let format = parser
            .get_string("LOG_FORMAT", "pretty")
            .value
            .parse()
            .unwrap_or_default();
        let file = parser.get_optional_string("LOG_FILE").value.map(PathBuf::from);

        Self {
            level,
            format,
            file,
            stderr: true,
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{directive}': {reason}")]
    Filter { directive: String, reason: String },

    #[error("log file {0} has no file name")]
    BadFile(PathBuf),

    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
}

/// Keeps the non-blocking file writer flushing until dropped.
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &LogConfig) -> Result<LogGuard, LoggingError> {
    let filter = EnvFilter::try_new(&config.level).map_err(|e| LoggingError::Filter {
        directive: config.level.clone(),
        reason: e.to_string(),
    })?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.stderr {
        let layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
        layers.push(match config.format {
            LogFormat::Pretty => layer.boxed(),
            LogFormat::Json => layer.json().boxed(),
        });
    }

    let mut guard = None;
    if let Some(path) = &config.file {
        let file_name = path
            .file_name()
            .ok_or_else(|| LoggingError::BadFile(path.clone()))?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (writer, worker) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
        guard = Some(worker);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    Ok(LogGuard { _file: guard })
}
