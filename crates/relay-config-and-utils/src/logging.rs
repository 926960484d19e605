//! Logging initialization for the relay.
//!
//! Sets up a tracing-subscriber stderr writer with an env-filter. The
//! RUST_LOG env var takes precedence over the configured default level.

use tracing_subscriber::EnvFilter;

/// Initialize the logging system for the relay.
///
/// # Arguments
///
/// * `level` - Default log level (trace, debug, info, warn, error)
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init_logging(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}
