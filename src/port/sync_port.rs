//! The open-port handle.
//!
//! [`SerialPort`] owns a backend and a clock. Reads and writes go through the
//! deadline loop; modem and flush calls go straight to the backend.

use super::clock::{Clock, MonotonicClock};
use super::deadline;
use super::error::PortError;
use super::line::{LineConfig, OpenFlags, OpenOptions};
use super::retry::{self, RetryPolicy};
use super::traits::{Attempt, FlushQueue, ModemLines, PortBackend};
use super::NativePort;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// An open serial channel.
///
/// Dropping the handle releases the channel the same way [`close`] does,
/// ignoring errors.
///
/// [`close`]: SerialPort::close
#[derive(Debug)]
pub struct SerialPort<B: PortBackend = NativePort> {
    backend: B,
    clock: Arc<dyn Clock>,
}

impl SerialPort<NativePort> {
    /// Open `name` at `baud_rate` with a mode code such as `"8N1"`.
    ///
    /// # Example
    /// ```no_run
    /// use rs232_transport::port::{OpenFlags, SerialPort};
    /// use std::time::Duration;
    ///
    /// let mut port = SerialPort::open("/dev/ttyUSB0", 115200, "8N1", OpenFlags::NONE)?;
    /// port.write(b"AT\r", Duration::from_millis(500))?;
    /// port.close()?;
    /// # Ok::<(), rs232_transport::port::PortError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an empty name or malformed mode
    /// - `UnsupportedBaudRate` for a rate outside the platform's table
    /// - `DeviceUnavailable`, `ConfigurationRejected` or
    ///   `HandshakeSetupFailed` if the OS refuses a step of the open
    pub fn open(name: &str, baud_rate: u32, mode: &str, flags: OpenFlags) -> Result<Self, PortError> {
        let config = LineConfig::new(baud_rate, mode, flags)?;
        Self::open_with(name, &config, &OpenOptions::default())
    }

    /// Open with an already validated configuration and acquisition options.
    pub fn open_with(
        name: &str,
        config: &LineConfig,
        options: &OpenOptions,
    ) -> Result<Self, PortError> {
        if name.is_empty() {
            return Err(PortError::invalid_argument("empty device name"));
        }
        NativePort::open(name, config, options).map(Self::from_backend)
    }

    /// [`open`](Self::open), retrying while the device is unavailable.
    pub fn open_with_retry(
        name: &str,
        baud_rate: u32,
        mode: &str,
        flags: OpenFlags,
        policy: &RetryPolicy,
    ) -> Result<Self, PortError> {
        let config = LineConfig::new(baud_rate, mode, flags)?;
        retry::open_with_retry(policy, |attempt| {
            debug!(device = name, attempt, "opening");
            Self::open_with(name, &config, &OpenOptions::default())
        })
    }
}

impl<B: PortBackend> SerialPort<B> {
    /// Wrap an open backend, timing deadlines with the monotonic clock.
    pub fn from_backend(backend: B) -> Self {
        Self {
            backend,
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    /// Replace the clock used for deadline accounting.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Read up to `buffer.len()` bytes, waiting at most `timeout` in total.
    ///
    /// Returns the byte count, short or zero on timeout. `Duration::ZERO`
    /// polls once without blocking; `Duration::MAX` waits indefinitely.
    ///
    /// # Errors
    ///
    /// `PortError::Io` on a device failure, carrying the bytes already
    /// placed in `buffer`.
    pub fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, PortError> {
        deadline::read_within(&mut self.backend, self.clock.as_ref(), buffer, timeout)
    }

    /// Write up to `data.len()` bytes, waiting at most `timeout` in total.
    ///
    /// Same contract as [`read`](Self::read).
    pub fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize, PortError> {
        deadline::write_within(&mut self.backend, self.clock.as_ref(), data, timeout)
    }

    /// One wait and at most one read, without accumulation.
    pub fn try_read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<Attempt, PortError> {
        self.backend
            .try_read(buffer, timeout)
            .map_err(|source| PortError::Io {
                transferred: 0,
                source,
            })
    }

    /// One wait and at most one write, without accumulation.
    pub fn try_write(&mut self, data: &[u8], timeout: Duration) -> Result<Attempt, PortError> {
        self.backend
            .try_write(data, timeout)
            .map_err(|source| PortError::Io {
                transferred: 0,
                source,
            })
    }

    /// All four status lines in one query.
    pub fn modem_lines(&self) -> Result<ModemLines, PortError> {
        self.backend
            .modem_lines()
            .map_err(PortError::control("read modem status"))
    }

    pub fn is_cts_enabled(&self) -> Result<bool, PortError> {
        Ok(self.modem_lines()?.cts)
    }

    pub fn is_dsr_enabled(&self) -> Result<bool, PortError> {
        Ok(self.modem_lines()?.dsr)
    }

    pub fn is_dcd_enabled(&self) -> Result<bool, PortError> {
        Ok(self.modem_lines()?.dcd)
    }

    pub fn is_ring_enabled(&self) -> Result<bool, PortError> {
        Ok(self.modem_lines()?.ring)
    }

    pub fn enable_dtr(&mut self) -> Result<(), PortError> {
        self.backend
            .set_dtr(true)
            .map_err(PortError::control("raise DTR"))
    }

    pub fn disable_dtr(&mut self) -> Result<(), PortError> {
        self.backend
            .set_dtr(false)
            .map_err(PortError::control("lower DTR"))
    }

    pub fn enable_rts(&mut self) -> Result<(), PortError> {
        self.backend
            .set_rts(true)
            .map_err(PortError::control("raise RTS"))
    }

    pub fn disable_rts(&mut self) -> Result<(), PortError> {
        self.backend
            .set_rts(false)
            .map_err(PortError::control("lower RTS"))
    }

    /// Hold the TX line in the spacing state until [`disable_break`].
    ///
    /// [`disable_break`]: Self::disable_break
    pub fn enable_break(&mut self) -> Result<(), PortError> {
        self.backend
            .set_break(true)
            .map_err(PortError::control("start break"))
    }

    pub fn disable_break(&mut self) -> Result<(), PortError> {
        self.backend
            .set_break(false)
            .map_err(PortError::control("stop break"))
    }

    /// Discard received bytes not yet read.
    pub fn flush_rx(&mut self) -> Result<(), PortError> {
        self.flush(FlushQueue::Input, "flush receive buffer")
    }

    /// Discard written bytes not yet transmitted.
    pub fn flush_tx(&mut self) -> Result<(), PortError> {
        self.flush(FlushQueue::Output, "flush transmit buffer")
    }

    pub fn flush_rxtx(&mut self) -> Result<(), PortError> {
        self.flush(FlushQueue::Both, "flush buffers")
    }

    fn flush(&mut self, queue: FlushQueue, operation: &'static str) -> Result<(), PortError> {
        self.backend
            .flush(queue)
            .map_err(PortError::control(operation))
    }

    /// Lower DTR and RTS, release any lock and close the channel.
    ///
    /// The channel is released even when a step fails; the first failure is
    /// returned.
    pub fn close(self) -> Result<(), PortError> {
        self.backend.close()
    }
}
