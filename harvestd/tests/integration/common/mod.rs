pub use harvest_common::testing::init_test_logging;

use std::path::PathBuf;
use std::process::{Command, Output};

/// Run the daemon binary with `args`, isolated from the caller's
/// `HARVEST_*` environment.
pub fn harvestd(args: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_harvestd"));
    for (key, _) in std::env::vars() {
        if key.starts_with("HARVEST_") {
            command.env_remove(key);
        }
    }
    command
        .args(args)
        .env("HARVEST_LOG_LEVEL", "warn")
        .output()
        .expect("failed to run harvestd")
}

/// Write `contents` to `harvest.toml` inside `dir`.
pub fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("harvest.toml");
    std::fs::write(&path, contents).expect("failed to write config");
    path
}
