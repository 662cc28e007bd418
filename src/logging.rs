//! Subscriber setup for the binaries.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to whoever owns the process.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// `RUST_LOG` when set, otherwise the configured level.
pub fn filter(config: &LoggingConfig) -> Result<EnvFilter, InitError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(&config.level)?),
    }
}

/// Install a global subscriber writing to stderr in the configured format.
///
/// Fails if a global subscriber is already set.
pub fn init(config: &LoggingConfig) -> Result<(), InitError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(config)?)
        .with_writer(std::io::stderr);

    match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_filter_falls_back_to_configured_level() {
        env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: "rs232_transport=debug".to_string(),
            ..LoggingConfig::default()
        };
        let filter = filter(&config).unwrap();
        assert_eq!(filter.to_string(), "rs232_transport=debug");
    }

    #[test]
    #[serial]
    fn test_rust_log_wins() {
        env::set_var("RUST_LOG", "warn");
        let filter = filter(&LoggingConfig::default()).unwrap();
        assert_eq!(filter.to_string(), "warn");
        env::remove_var("RUST_LOG");
    }

    #[test]
    #[serial]
    fn test_second_init_fails() {
        env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            format: LogFormat::Compact,
            ..LoggingConfig::default()
        };
        // Another test binary thread may already have installed one.
        let _ = init(&config);
        assert!(init(&config).is_err());
    }
}
