//! Port-specific error types.
//!
//! Timeouts are deliberately absent: a read or write that runs out of budget
//! returns the bytes it managed to move, which may be zero.

use std::io;
use thiserror::Error;

/// Errors that can occur during serial port operations.
#[derive(Debug, Error)]
pub enum PortError {
    /// Empty device name, malformed mode code or unrecognized mode character.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested rate is not in the platform's discrete set.
    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaudRate(u32),

    /// The OS refused to hand out the channel (missing, busy or locked).
    #[error("Serial device '{device}' is unavailable: {source}")]
    DeviceUnavailable {
        device: String,
        #[source]
        source: io::Error,
    },

    /// The OS refused the requested line-control settings.
    #[error("Serial device '{device}' rejected the line configuration: {source}")]
    ConfigurationRejected {
        device: String,
        #[source]
        source: io::Error,
    },

    /// Setting the initial DTR/RTS state failed.
    #[error("Failed to set up modem control lines on '{device}': {source}")]
    HandshakeSetupFailed {
        device: String,
        #[source]
        source: io::Error,
    },

    /// A read or write failed for a reason other than timeout.
    ///
    /// `transferred` holds the bytes moved before the failure.
    #[error("I/O error after {transferred} byte(s): {source}")]
    Io {
        transferred: usize,
        #[source]
        source: io::Error,
    },

    /// A modem-control, break, flush or close call failed.
    #[error("Failed to {operation}: {source}")]
    Control {
        operation: &'static str,
        #[source]
        source: io::Error,
    },
}

impl PortError {
    /// Create an InvalidArgument error from a message.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn device_unavailable(device: impl Into<String>, source: io::Error) -> Self {
        Self::DeviceUnavailable {
            device: device.into(),
            source,
        }
    }

    pub fn configuration_rejected(device: impl Into<String>, source: io::Error) -> Self {
        Self::ConfigurationRejected {
            device: device.into(),
            source,
        }
    }

    pub fn handshake_setup_failed(device: impl Into<String>, source: io::Error) -> Self {
        Self::HandshakeSetupFailed {
            device: device.into(),
            source,
        }
    }

    pub(crate) fn control(operation: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Control { operation, source }
    }

    /// Whether retrying the open can plausibly succeed.
    ///
    /// Only an unavailable device qualifies; argument and configuration
    /// errors are deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DeviceUnavailable { .. })
    }

    /// Bytes moved before an I/O failure, zero for every other kind.
    pub fn transferred(&self) -> usize {
        match self {
            Self::Io { transferred, .. } => *transferred,
            _ => 0,
        }
    }
}
