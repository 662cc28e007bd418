//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! Every section has defaults, so an empty file is a valid configuration.

use crate::port::{LineConfig, OpenFlags, OpenOptions, PortError, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial line configuration
    pub serial: SerialConfig,
    /// Open-retry configuration
    pub retry: RetryConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Hardware testing configuration
    pub testing: TestingConfig,
}

/// Serial port configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path or COM name
    pub device: Option<String>,
    pub baud: u32,
    /// Mode code such as "8N1"
    pub mode: String,
    /// RTS/CTS hardware flow control
    pub hardware_flow_control: bool,
    /// Take an advisory exclusive lock on open (POSIX only)
    pub exclusive_lock: bool,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: None,
            baud: 115200,
            mode: "8N1".to_string(),
            hardware_flow_control: false,
            exclusive_lock: false,
            read_timeout_ms: 500,
            write_timeout_ms: 1000,
        }
    }
}

impl SerialConfig {
    pub fn open_flags(&self) -> OpenFlags {
        if self.hardware_flow_control {
            OpenFlags::HW_FLOW_CONTROL
        } else {
            OpenFlags::NONE
        }
    }

    /// Validate baud, mode and flags into a [`LineConfig`].
    pub fn line_config(&self) -> Result<LineConfig, PortError> {
        LineConfig::new(self.baud, &self.mode, self.open_flags())
    }

    pub fn open_options(&self) -> OpenOptions {
        OpenOptions {
            exclusive_lock: self.exclusive_lock,
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Open-retry configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total open attempts, including the first
    pub attempts: u32,
    /// Sleep between attempts in milliseconds
    pub interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            attempts: policy.attempts,
            interval_ms: policy.interval.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, Duration::from_millis(self.interval_ms))
    }
}

/// Hardware testing configuration section.
///
/// Names a null-modem pair: `port` and `peer_port` are the two ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestingConfig {
    pub port: Option<String>,
    pub peer_port: Option<String>,
    pub baud: u32,
}

impl Default for TestingConfig {
    fn default() -> Self {
        Self {
            port: None,
            peer_port: None,
            baud: 115200,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset, e.g. "info" or "rs232_transport=debug"
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}
