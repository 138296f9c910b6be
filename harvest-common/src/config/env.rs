//! Environment variable parsing with type safety.
//!
//! Every harvester variable carries the `HARVEST_` prefix. Problems are
//! collected rather than returned one at a time so startup can report
//! all of them together.

use super::source::{ConfigSource, Sourced};
use std::env;
use std::path::PathBuf;
use thiserror::Error;

const PREFIX: &str = "HARVEST_";

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("{var}='{value}' is not {expected}")]
    InvalidValue {
        var: String,
        expected: &'static str,
        value: String,
    },

    #[error("{var}={value} is outside {min}..={max}")]
    OutOfRange {
        var: String,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("{var}='{value}' is not a log level")]
    InvalidLogLevel { var: String, value: String },
}

/// Reads `HARVEST_*` variables, remembering where each value came from.
#[derive(Debug, Default)]
pub struct EnvParser {
    errors: Vec<EnvError>,
}

impl EnvParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// Full variable name and its value, if set.
    fn lookup(name: &str) -> (String, Option<String>) {
        let var = format!("{PREFIX}{name}");
        let value = env::var(&var).ok();
        (var, value)
    }

    pub fn get_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        match Self::lookup(name) {
            (var, Some(value)) => Sourced::from_env(value, var),
            (_, None) => Sourced::default_value(default.to_string()),
        }
    }

    /// `1/true/yes/on` and `0/false/no/off/""`, case-insensitive.
    pub fn get_bool(&mut self, name: &str, default: bool) -> Sourced<bool> {
        let (var, Some(raw)) = Self::lookup(name) else {
            return Sourced::default_value(default);
        };
        let value = match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" | "" => false,
            _ => {
                self.errors.push(EnvError::InvalidValue {
                    var: var.clone(),
                    expected: "a boolean",
                    value: raw,
                });
                default
            }
        };
        Sourced::from_env(value, var)
    }

    /// Unsigned integer within `min..=max`; anything else keeps `default`.
    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> Sourced<u64> {
        let (var, Some(raw)) = Self::lookup(name) else {
            return Sourced::default_value(default);
        };
        let Ok(value) = raw.trim().parse::<u64>() else {
            self.errors.push(EnvError::InvalidValue {
                var,
                expected: "an unsigned integer",
                value: raw,
            });
            return Sourced::default_value(default);
        };
        if (min..=max).contains(&value) {
            Sourced::from_env(value, var)
        } else {
            self.errors.push(EnvError::OutOfRange {
                var: var.clone(),
                value,
                min,
                max,
            });
            Sourced::from_env(default, var)
        }
    }

    /// Path with a leading `~/` resolved against the home directory.
    pub fn get_path(&mut self, name: &str, default: &str) -> Sourced<PathBuf> {
        let (var, raw) = Self::lookup(name);
        let source = if raw.is_some() {
            ConfigSource::Environment
        } else {
            ConfigSource::Default
        };
        let text = raw.unwrap_or_else(|| default.to_string());
        let path = text
            .strip_prefix("~/")
            .and_then(|rest| dirs::home_dir().map(|home| home.join(rest)))
            .unwrap_or_else(|| PathBuf::from(&text));

        match source {
            ConfigSource::Environment => Sourced::from_env(path, var),
            _ => Sourced::default_value(path),
        }
    }

    /// One of the plain tracing levels, lowercased.
    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let (var, Some(raw)) = Self::lookup(name) else {
            return Sourced::default_value(default.to_string());
        };
        let level = raw.to_ascii_lowercase();
        if LOG_LEVELS.contains(&level.as_str()) {
            Sourced::from_env(level, var)
        } else {
            self.errors.push(EnvError::InvalidLogLevel {
                var: var.clone(),
                value: raw,
            });
            Sourced::from_env(default.to_string(), var)
        }
    }

    /// Set but empty counts as explicitly unset.
    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        match Self::lookup(name) {
            (var, Some(value)) => Sourced::from_env(Some(value).filter(|v| !v.is_empty()), var),
            (_, None) => Sourced::default_value(None),
        }
    }
}
