//! Logging initialization built on `tracing`.
//!
//! Log level resolution, most specific wins:
//! 1. `RUST_LOG` environment filter
//! 2. `--verbose` / `--quiet` flags
//! 3. default (`warn` for the crate, `error` elsewhere)

use tracing_subscriber::EnvFilter;

use crate::error::{Result, SyncError};

/// Initialize the global tracing subscriber.
///
/// `verbose` raises the crate level to `debug`, `quiet` drops it to
/// `error`. When `json` is set, log lines are emitted as structured
/// JSON for automation (cron runs, portfolio schedules).
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(verbose: bool, quiet: bool, json: bool) -> Result<()> {
    let default_directive = if quiet {
        "bmad_sync=error"
    } else if verbose {
        "bmad_sync=debug"
    } else {
        "bmad_sync=warn"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };

    result.map_err(|e| SyncError::Config(format!("failed to install logger: {e}")))
}
