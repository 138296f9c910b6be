//! Startup validation for harvester configuration.

use crate::types::HarvestConfig;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A single finding from [`validate_config`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigWarning {
    pub severity: Severity,
    pub field: &'static str,
    pub message: String,
}

impl ConfigWarning {
    fn new(severity: Severity, field: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity,
            field,
            message: message.into(),
        }
    }
}

/// Check a loaded configuration for problems that would surface later
/// as per-job failures.
pub fn validate_config(config: &HarvestConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    if config.general.listen_addr.parse::<SocketAddr>().is_err() {
        warnings.push(ConfigWarning::new(
            Severity::Error,
            "general.listen_addr",
            format!("'{}' is not a socket address", config.general.listen_addr),
        ));
    }

    if config.runner.timeout_secs == 0 {
        warnings.push(ConfigWarning::new(
            Severity::Error,
            "runner.timeout_secs",
            "runner calls need a non-zero timeout",
        ));
    }

    if config.runner.credentials.is_empty() {
        warnings.push(ConfigWarning::new(
            Severity::Warning,
            "runner.credentials",
            "no runner credentials; every harvest will be skipped",
        ));
    }

    for cred in &config.runner.credentials {
        if cred.host.contains('/') || cred.host.is_empty() {
            warnings.push(ConfigWarning::new(
                Severity::Error,
                "runner.credentials.host",
                format!("'{}' must be a bare host[:port]", cred.host),
            ));
        }
    }

    let url = config.reporting.url.trim();
    if url.is_empty() {
        warnings.push(ConfigWarning::new(
            Severity::Warning,
            "reporting.url",
            "reporting url is empty; submissions will fail",
        ));
    } else if !(url.starts_with("http://") || url.starts_with("https://")) {
        warnings.push(ConfigWarning::new(
            Severity::Error,
            "reporting.url",
            format!("'{url}' is not an http(s) url"),
        ));
    }

    if config.reporting.tokens.is_empty() {
        warnings.push(ConfigWarning::new(
            Severity::Warning,
            "reporting.tokens",
            "no reporting tokens; submissions will be refused",
        ));
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunnerCredential;

    fn complete_config() -> HarvestConfig {
        let mut config = HarvestConfig::default();
        config.runner.credentials.push(RunnerCredential {
            host: "runner.example.org".to_string(),
            username: "bot".to_string(),
            token: "t".to_string(),
        });
        config.reporting.url = "https://reports.example.org".to_string();
        config.reporting.tokens.insert("team".to_string(), "tok".to_string());
        config
    }

    #[test]
    fn test_complete_config_is_clean() {
        assert!(validate_config(&complete_config()).is_empty());
    }

    #[test]
    fn test_default_config_warns() {
        let warnings = validate_config(&HarvestConfig::default());
        let fields: Vec<_> = warnings.iter().map(|w| w.field).collect();
        assert!(fields.contains(&"runner.credentials"));
        assert!(fields.contains(&"reporting.url"));
        assert!(fields.contains(&"reporting.tokens"));
        assert!(warnings.iter().all(|w| w.severity == Severity::Warning));
    }

    #[test]
    fn test_bad_values_are_errors() {
        let mut config = complete_config();
        config.general.listen_addr = "localhost".to_string();
        config.reporting.url = "ftp://reports".to_string();
        config.runner.credentials[0].host = "https://runner.example.org/".to_string();

        let errors: Vec<_> = validate_config(&config)
            .into_iter()
            .filter(|w| w.severity == Severity::Error)
            .map(|w| w.field)
            .collect();
        assert_eq!(
            errors,
            vec!["general.listen_addr", "runner.credentials.host", "reporting.url"]
        );
    }
}
