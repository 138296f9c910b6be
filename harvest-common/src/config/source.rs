//! Source tracking for configuration values.

use serde::Serialize;
use std::fmt;

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// Built-in default.
    Default,
    /// Configuration file.
    File,
    /// `HARVEST_*` environment variable.
    Environment,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::File => write!(f, "file"),
            Self::Environment => write!(f, "environment"),
        }
    }
}

/// A value together with its origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
    /// Variable name or file path the value was read from.
    pub origin: Option<String>,
}

impl<T> Sourced<T> {
    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Default,
            origin: None,
        }
    }

    pub fn from_env(value: T, var: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::Environment,
            origin: Some(var.into()),
        }
    }

    pub fn from_file(value: T, path: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::File,
            origin: Some(path.into()),
        }
    }

    pub fn is_default(&self) -> bool {
        self.source == ConfigSource::Default
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}
