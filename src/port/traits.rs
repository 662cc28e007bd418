//! Core traits for serial port abstraction.
//!
//! [`TimedIo`] is the single-attempt engine: one bounded wait followed by one
//! transfer. [`ModemControl`] covers the out-of-band lines. A
//! [`PortBackend`] is both, and is what [`SerialPort`](super::SerialPort)
//! drives; the native backends and [`MockPort`](super::MockPort) implement it.

use super::error::PortError;
use std::fmt;
use std::io;
use std::time::Duration;

/// Outcome of a single wait-then-transfer cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Nothing became ready within the attempt's timeout.
    TimedOut,
    /// The channel was ready and this many bytes moved. May be short, and may
    /// be zero if readiness was spurious.
    Transferred(usize),
}

impl Attempt {
    pub fn bytes(self) -> usize {
        match self {
            Self::TimedOut => 0,
            Self::Transferred(n) => n,
        }
    }
}

/// Single bounded transfer attempt against an open channel.
///
/// Implementations perform exactly one wait bounded by `timeout` and at most
/// one transfer. They never loop; accumulating toward a full buffer is the
/// job of [`deadline`](super::deadline). `Duration::ZERO` polls once without
/// blocking.
#[cfg_attr(test, mockall::automock)]
pub trait TimedIo {
    fn try_read(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<Attempt>;

    fn try_write(&mut self, data: &[u8], timeout: Duration) -> io::Result<Attempt>;
}

/// Snapshot of the observable modem status lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModemLines {
    /// Clear To Send.
    pub cts: bool,
    /// Data Set Ready.
    pub dsr: bool,
    /// Data Carrier Detect.
    pub dcd: bool,
    /// Ring Indicator.
    pub ring: bool,
}

/// Which buffered direction to discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushQueue {
    /// Received but not read.
    Input,
    /// Written but not transmitted.
    Output,
    Both,
}

/// Modem-control line access, break signaling and buffer flushing.
pub trait ModemControl {
    /// Query the status lines live from the channel.
    fn modem_lines(&self) -> io::Result<ModemLines>;

    /// Raise (`true`) or lower the DTR line.
    fn set_dtr(&mut self, level: bool) -> io::Result<()>;

    /// Raise (`true`) or lower the RTS line.
    fn set_rts(&mut self, level: bool) -> io::Result<()>;

    /// Start (`true`) or stop a continuous break condition.
    fn set_break(&mut self, on: bool) -> io::Result<()>;

    /// Discard buffered bytes without blocking.
    fn flush(&mut self, queue: FlushQueue) -> io::Result<()>;
}

/// An owned, open serial channel.
pub trait PortBackend: TimedIo + ModemControl + Send + fmt::Debug {
    /// The device name the channel was opened with.
    fn name(&self) -> &str;

    /// Release the channel.
    ///
    /// Teardown is best-effort: every step runs even if an earlier one
    /// fails, the OS channel is always released, and the first failure is
    /// reported.
    fn close(self) -> Result<(), PortError>
    where
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_bytes() {
        assert_eq!(Attempt::TimedOut.bytes(), 0);
        assert_eq!(Attempt::Transferred(7).bytes(), 7);
    }

    #[test]
    fn test_modem_lines_default_low() {
        let lines = ModemLines::default();
        assert!(!lines.cts && !lines.dsr && !lines.dcd && !lines.ring);
    }

    #[test]
    fn test_mock_engine_is_usable_as_timed_io() {
        let mut engine = MockTimedIo::new();
        engine
            .expect_try_read()
            .returning(|buf, _| {
                buf[0] = 0x55;
                Ok(Attempt::Transferred(1))
            });

        let mut buf = [0u8; 4];
        let attempt = engine.try_read(&mut buf, Duration::ZERO).unwrap();
        assert_eq!(attempt, Attempt::Transferred(1));
        assert_eq!(buf[0], 0x55);
    }
}
