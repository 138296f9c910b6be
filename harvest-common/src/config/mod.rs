//! Configuration system for the harvester.
//!
//! This module provides:
//! - TOML configuration file loading
//! - Environment variable overrides with type safety
//! - Source tracking for debugging
//! - Validation on startup

pub mod env;
pub mod file;
pub mod source;
pub mod validate;

pub use env::{EnvError, EnvParser};
pub use file::{ConfigError, LoadedConfig, apply_env_overrides, load_config};
pub use source::{ConfigSource, Sourced};
pub use validate::{ConfigWarning, Severity, validate_config};

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
