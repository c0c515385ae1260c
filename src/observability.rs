//! Logging setup
//!
//! One `tracing-subscriber` fmt layer, filtered by `RUST_LOG` when set and
//! by the configured level otherwise. JSON output is opt-in for runs whose
//! logs are collected by a machine.

use crate::config::LogConfig;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// Returns false when a subscriber was already installed (tests, repeated
/// calls); that is not an error.
pub fn init_tracing(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.is_ok()
}

/// Subscriber for tests: captured output, debug level
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_test_tracing();
        // A second install never panics, it just reports false
        assert!(!init_tracing(&LogConfig::default()));
    }
}
