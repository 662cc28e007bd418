//! Port abstraction layer for serial communication.
//!
//! Line configuration is validated once by [`LineConfig`], handed to the
//! platform backend at open time, and the resulting [`SerialPort`] drives
//! timed reads and writes through the deadline loop. [`MockPort`] stands in
//! for hardware in tests.

pub mod clock;
pub mod deadline;
pub mod error;
pub mod line;
pub mod mock;
pub mod retry;
pub mod sync_port;
pub mod traits;

#[cfg(unix)]
pub mod posix;
#[cfg(unix)]
use posix as sys;

#[cfg(windows)]
pub mod windows;
#[cfg(windows)]
use windows as sys;

/// The backend for the platform being compiled.
#[cfg(unix)]
pub type NativePort = posix::PosixPort;
#[cfg(windows)]
pub type NativePort = windows::WindowsPort;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::PortError;
pub use line::{
    is_supported_baud_rate, supported_baud_rates, DataBits, FlowControl, LineConfig, Mode,
    OpenFlags, OpenOptions, Parity, StopBits,
};
pub use mock::MockPort;
pub use retry::{open_with_retry, open_with_retry_on, RetryPolicy};
pub use sync_port::SerialPort;
pub use traits::{Attempt, FlushQueue, ModemControl, ModemLines, PortBackend, TimedIo};
