//! Configuration for the rs232 tools.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//! The library itself never reads it; the binaries and hardware tests turn it
//! into explicit [`LineConfig`](crate::port::LineConfig) and
//! [`RetryPolicy`](crate::port::RetryPolicy) values.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `RS232_CONFIG` environment variable (explicit path)
//! 2. `./rs232.toml` (current directory)
//! 3. `rs232/config.toml` under the platform config directory
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! Any value can be overridden with `RS232_<SECTION>_<KEY>`, for example
//! `RS232_SERIAL_BAUD=9600` or `RS232_RETRY_ATTEMPTS=3`.
//!
//! # Example
//!
//! ```toml
//! [serial]
//! device = "/dev/ttyUSB0"
//! baud = 115200
//! mode = "8N1"
//!
//! [retry]
//! attempts = 15
//! interval_ms = 1000
//! ```

mod args;
mod error;
mod loader;
mod schema;

pub use args::SerialArgs;
pub use error::{ConfigError, ConfigResult};
pub use loader::{default_config_path, resolve_config_path, ConfigLoader};
pub use schema::{Config, LogFormat, LoggingConfig, RetryConfig, SerialConfig, TestingConfig};
