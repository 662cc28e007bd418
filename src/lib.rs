//! RS-232 Transport Library
//!
//! A cross-platform serial-port transport: open a device from a baud rate and
//! a mode code such as `"8N1"`, move bytes under a total time budget, drive the
//! modem-control lines, and close.
//!
//! # Modules
//!
//! - `port`: Line configuration, the platform backends, timed I/O and the port handle
//! - `config`: Configuration management with TOML support, used by the binaries
//! - `logging`: Subscriber setup for the binaries
//! - `loopback`: Null-modem loopback checks
//!
//! # Example
//!
//! ```no_run
//! use rs232_transport::{OpenFlags, RetryPolicy, SerialPort};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::default();
//! let mut port = SerialPort::open_with_retry("/dev/ttyUSB0", 115200, "8N1", OpenFlags::NONE, &policy)?;
//! port.enable_dtr()?;
//!
//! let mut buffer = [0u8; 64];
//! let n = port.read(&mut buffer, Duration::from_millis(500))?;
//! println!("received {n} byte(s)");
//!
//! port.close()?;
//! # Ok::<(), rs232_transport::PortError>(())
//! ```

pub mod config;
pub mod logging;
pub mod loopback;
pub mod port;

// Re-export commonly used types for convenience
pub use port::{
    Attempt, DataBits, FlowControl, LineConfig, MockPort, ModemLines, OpenFlags, OpenOptions,
    Parity, PortError, RetryPolicy, SerialPort, StopBits,
};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
