//! Tracing subscriber setup for the `docqa` binary.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Installs a stderr `fmt` subscriber. `RUST_LOG` takes precedence over the
/// configured level. Calling this more than once is a no-op.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
