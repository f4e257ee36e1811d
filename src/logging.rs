//! Tracing subscriber setup
//!
//! `RUST_LOG` takes precedence over the configured level. Output goes to
//! stderr so reports printed on stdout stay machine-readable.

use ghostrun_core::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    // Err means a subscriber is already installed (tests, embedding host)
    let _ = result;
}
