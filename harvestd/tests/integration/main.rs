//! Daemon binary integration tests.

mod cli_tests;
mod common;
