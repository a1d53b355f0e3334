//! Logging setup for verification runs.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging.
///
/// `log_level` is used when `RUST_LOG` is not set (e.g. "info",
/// "sonic_platform_verify=debug"). Returns false if a global subscriber was
/// already installed, which is expected when several tests initialize
/// logging in one process.
///
/// # Example
/// ```ignore
/// init_logging("info");
/// ```
pub fn init_logging(log_level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .try_init()
        .is_ok()
}
