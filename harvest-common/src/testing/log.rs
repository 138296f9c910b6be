//! Test logging shared by every harvester test suite.
//!
//! ```ignore
//! #[test]
//! fn test_example() {
//!     harvest_common::testing::init_test_logging();
//!     harvest_common::test_log!("starting");
//! }
//! ```

use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Install a test-writer subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `debug` for harvester crates.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,harvest_common=debug,harvest_miner=debug,harvestd=debug,test=info")
        });

        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_line_number(true),
            )
            .with(filter)
            .try_init();
    });
}

/// Log a test progress line under the `test` target.
#[macro_export]
macro_rules! test_log {
    ($($arg:tt)*) => {
        ::tracing::info!(target: "test", $($arg)*);
    };
}
