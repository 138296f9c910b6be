//! Test support utilities.

pub mod log;

pub use log::init_test_logging;
