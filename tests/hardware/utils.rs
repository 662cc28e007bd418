//! Utility functions for hardware testing.
//!
//! Provides helpers for locating the device pair and opening it.

use rs232_transport::config::ConfigLoader;
use rs232_transport::port::{LineConfig, OpenFlags, OpenOptions, RetryPolicy, SerialPort};
use serialport::available_ports;
use std::time::Duration;

/// The null-modem pair under test.
pub struct TestPairConfig {
    pub port: String,
    pub peer_port: String,
    pub baud_rate: u32,
}

impl TestPairConfig {
    /// Read the pair from `TEST_PORT`, `TEST_PEER_PORT` and `TEST_BAUD`, or
    /// from the testing section of the configuration.
    pub fn from_env() -> Option<Self> {
        let config = ConfigLoader::load().ok()?.into_config();
        Some(TestPairConfig {
            port: config.testing.port?,
            peer_port: config.testing.peer_port?,
            baud_rate: config.testing.baud,
        })
    }

    pub fn line(&self, mode: &str, flags: OpenFlags) -> LineConfig {
        LineConfig::new(self.baud_rate, mode, flags).expect("valid test line configuration")
    }

    /// Open both ends, allowing a few seconds for a just-closed adapter.
    pub fn open(&self, mode: &str, flags: OpenFlags) -> (SerialPort, SerialPort) {
        let line = self.line(mode, flags);
        let policy = RetryPolicy::new(5, Duration::from_millis(500));
        let options = OpenOptions::default();
        let open = |name: &str| {
            rs232_transport::port::open_with_retry(&policy, |_| {
                SerialPort::open_with(name, &line, &options)
            })
            .unwrap_or_else(|e| panic!("failed to open {name}: {e}"))
        };
        (open(&self.port), open(&self.peer_port))
    }
}

/// Skip a test when no pair is configured.
#[macro_export]
macro_rules! require_pair {
    () => {
        match $crate::hardware::utils::TestPairConfig::from_env() {
            Some(config) => config,
            None => {
                eprintln!("Skipping: set TEST_PORT and TEST_PEER_PORT to a null-modem pair");
                $crate::hardware::utils::print_available_ports();
                return;
            }
        }
    };
}

/// Print available ports for debugging.
pub fn print_available_ports() {
    let ports = available_ports().unwrap_or_default();

    if ports.is_empty() {
        println!("No serial ports detected on this system");
        return;
    }

    println!("Available serial ports ({}):", ports.len());
    for (idx, port) in ports.iter().enumerate() {
        println!("  {}. {}", idx + 1, port.port_name);
    }
}
