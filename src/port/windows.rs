//! Win32 backend: DCB line control and overlapped I/O.
//!
//! Windows has no readiness wait for COM handles, so each attempt programs
//! `COMMTIMEOUTS` for its own timeout, issues one overlapped transfer and
//! waits for it to complete.

use super::error::PortError;
use super::line::{DataBits, FlowControl, LineConfig, OpenOptions, Parity, StopBits};
use super::traits::{Attempt, FlushQueue, ModemControl, ModemLines, PortBackend, TimedIo};
use std::ffi::OsStr;
use std::fmt;
use std::io;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::ptr;
use std::time::Duration;
use tracing::{debug, warn};
use winapi::shared::minwindef::{DWORD, FALSE, TRUE};
use winapi::shared::winerror::ERROR_IO_PENDING;
use winapi::um::commapi::{
    ClearCommBreak, EscapeCommFunction, GetCommModemStatus, GetCommState, PurgeComm,
    SetCommBreak, SetCommMask, SetCommState, SetCommTimeouts,
};
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::fileapi::{CreateFileW, ReadFile, WriteFile, OPEN_EXISTING};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::ioapiset::GetOverlappedResult;
use winapi::um::minwinbase::OVERLAPPED;
use winapi::um::synchapi::CreateEventW;
use winapi::um::winbase::{
    CLRDTR, CLRRTS, COMMTIMEOUTS, DCB, DTR_CONTROL_DISABLE, EVENPARITY, EV_ERR,
    FILE_FLAG_OVERLAPPED, MS_CTS_ON, MS_DSR_ON, MS_RING_ON, MS_RLSD_ON, NOPARITY, ODDPARITY,
    ONESTOPBIT, PURGE_RXABORT, PURGE_RXCLEAR, PURGE_TXABORT, PURGE_TXCLEAR, RTS_CONTROL_ENABLE,
    RTS_CONTROL_HANDSHAKE, SETDTR, SETRTS, TWOSTOPBITS,
};
use winapi::um::winnt::{GENERIC_READ, GENERIC_WRITE, HANDLE, MAXDWORD};

pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    110, 300, 600, 1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200, 128000, 256000, 500000,
    921600, 1000000, 1500000, 2000000, 3000000,
];

/// Translate a validated configuration into the fields of `dcb` it governs.
///
/// Fields it does not own are left as read from the device.
pub fn apply_line_settings(config: &LineConfig, dcb: &mut DCB) {
    dcb.BaudRate = config.baud_rate();
    dcb.ByteSize = match config.data_bits() {
        DataBits::Five => 5,
        DataBits::Six => 6,
        DataBits::Seven => 7,
        DataBits::Eight => 8,
    };
    dcb.Parity = match config.parity() {
        Parity::None => NOPARITY,
        Parity::Even => EVENPARITY,
        Parity::Odd => ODDPARITY,
    };
    dcb.StopBits = match config.stop_bits() {
        StopBits::One => ONESTOPBIT,
        StopBits::Two => TWOSTOPBITS,
    };

    dcb.set_fBinary(TRUE as DWORD);
    dcb.set_fParity((config.parity() != Parity::None) as DWORD);
    dcb.set_fOutxDsrFlow(0);
    dcb.set_fDsrSensitivity(0);
    dcb.set_fOutX(0);
    dcb.set_fInX(0);
    dcb.set_fNull(0);
    dcb.set_fAbortOnError(0);
    dcb.set_fDtrControl(DTR_CONTROL_DISABLE);
    match config.flow_control() {
        FlowControl::Hardware => {
            dcb.set_fOutxCtsFlow(1);
            dcb.set_fRtsControl(RTS_CONTROL_HANDSHAKE);
        }
        FlowControl::None => {
            dcb.set_fOutxCtsFlow(0);
            dcb.set_fRtsControl(RTS_CONTROL_ENABLE);
        }
    }
}

fn millis(timeout: Duration) -> DWORD {
    let mut ms = timeout.as_millis();
    if timeout.subsec_nanos() % 1_000_000 != 0 {
        ms += 1;
    }
    ms.min(u128::from(MAXDWORD - 1)) as DWORD
}

/// `COMMTIMEOUTS` for a read attempt.
///
/// Zero returns whatever is buffered immediately. Otherwise the call returns
/// as soon as any byte arrives, or after the total constant.
fn read_timeouts(timeout: Duration) -> COMMTIMEOUTS {
    let (multiplier, constant) = if timeout.is_zero() {
        (0, 0)
    } else {
        (MAXDWORD, millis(timeout))
    };
    COMMTIMEOUTS {
        ReadIntervalTimeout: MAXDWORD,
        ReadTotalTimeoutMultiplier: multiplier,
        ReadTotalTimeoutConstant: constant,
        WriteTotalTimeoutMultiplier: 0,
        WriteTotalTimeoutConstant: 0,
    }
}

/// `COMMTIMEOUTS` for a write attempt. A zero constant means "never time
/// out" to Win32, so the shortest real wait is used instead.
fn write_timeouts(timeout: Duration) -> COMMTIMEOUTS {
    COMMTIMEOUTS {
        ReadIntervalTimeout: 0,
        ReadTotalTimeoutMultiplier: 0,
        ReadTotalTimeoutConstant: 0,
        WriteTotalTimeoutMultiplier: 0,
        WriteTotalTimeoutConstant: millis(timeout).max(1),
    }
}

fn same_timeouts(a: &COMMTIMEOUTS, b: &COMMTIMEOUTS) -> bool {
    a.ReadIntervalTimeout == b.ReadIntervalTimeout
        && a.ReadTotalTimeoutMultiplier == b.ReadTotalTimeoutMultiplier
        && a.ReadTotalTimeoutConstant == b.ReadTotalTimeoutConstant
        && a.WriteTotalTimeoutMultiplier == b.WriteTotalTimeoutMultiplier
        && a.WriteTotalTimeoutConstant == b.WriteTotalTimeoutConstant
}

fn check(ok: i32) -> io::Result<()> {
    if ok == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// An owned Win32 handle, closed on drop.
struct Handle(HANDLE);

// SAFETY: a kernel handle may be used from any thread.
unsafe impl Send for Handle {}

impl Handle {
    fn close(&mut self) -> io::Result<()> {
        if self.0.is_null() || self.0 == INVALID_HANDLE_VALUE {
            return Ok(());
        }
        let handle = mem::replace(&mut self.0, ptr::null_mut());
        check(unsafe { CloseHandle(handle) })
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// An open COM port handle.
pub struct WindowsPort {
    handle: Handle,
    event: Handle,
    name: String,
    timeouts: Option<COMMTIMEOUTS>,
}

impl WindowsPort {
    /// Open `name`, apply `config` and set the initial modem lines.
    ///
    /// The handle is opened with no sharing, so `options.exclusive_lock` has
    /// nothing left to add. On failure the saved DCB is restored when it was
    /// read and the handle is closed.
    pub fn open(name: &str, config: &LineConfig, options: &OpenOptions) -> Result<Self, PortError> {
        let _ = options;
        let path = device_path(name);
        let raw = unsafe {
            CreateFileW(
                path.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0,
                ptr::null_mut(),
                OPEN_EXISTING,
                FILE_FLAG_OVERLAPPED,
                ptr::null_mut(),
            )
        };
        if raw == INVALID_HANDLE_VALUE {
            return Err(PortError::device_unavailable(name, io::Error::last_os_error()));
        }
        let handle = Handle(raw);

        let mut saved: DCB = unsafe { mem::zeroed() };
        saved.DCBlength = mem::size_of::<DCB>() as DWORD;
        check(unsafe { GetCommState(raw, &mut saved) })
            .map_err(|e| PortError::configuration_rejected(name, e))?;

        let mut dcb = saved;
        apply_line_settings(config, &mut dcb);
        if let Err(e) = check(unsafe { SetCommState(raw, &mut dcb) }) {
            let _ = check(unsafe { SetCommState(raw, &mut saved) });
            return Err(PortError::configuration_rejected(name, e));
        }

        let handshake = check(unsafe { EscapeCommFunction(raw, CLRDTR) }).and_then(|()| {
            if config.hardware_flow_control() {
                Ok(())
            } else {
                check(unsafe { EscapeCommFunction(raw, SETRTS) })
            }
        });
        if let Err(e) = handshake {
            let _ = check(unsafe { SetCommState(raw, &mut saved) });
            return Err(PortError::handshake_setup_failed(name, e));
        }

        let event = unsafe { CreateEventW(ptr::null_mut(), TRUE, FALSE, ptr::null()) };
        if event.is_null() {
            let e = io::Error::last_os_error();
            let _ = check(unsafe { SetCommState(raw, &mut saved) });
            return Err(PortError::device_unavailable(name, e));
        }
        let event = Handle(event);

        if let Err(e) = check(unsafe { SetCommMask(raw, EV_ERR) }) {
            warn!(device = name, "could not set comm event mask: {e}");
        }

        debug!(device = name, line = %config, "port opened");
        Ok(Self {
            handle,
            event,
            name: name.to_string(),
            timeouts: None,
        })
    }

    fn set_timeouts(&mut self, timeouts: COMMTIMEOUTS) -> io::Result<()> {
        if let Some(current) = &self.timeouts {
            if same_timeouts(current, &timeouts) {
                return Ok(());
            }
        }
        let mut timeouts = timeouts;
        check(unsafe { SetCommTimeouts(self.handle.0, &mut timeouts) })?;
        self.timeouts = Some(timeouts);
        Ok(())
    }

    /// Run one overlapped transfer to completion.
    fn overlapped<F>(&mut self, start: F) -> io::Result<DWORD>
    where
        F: FnOnce(HANDLE, *mut DWORD, *mut OVERLAPPED) -> i32,
    {
        let mut overlapped: OVERLAPPED = unsafe { mem::zeroed() };
        overlapped.hEvent = self.event.0;
        let mut count: DWORD = 0;

        if start(self.handle.0, &mut count, &mut overlapped) != 0 {
            return Ok(count);
        }
        let pending = unsafe { GetLastError() };
        if pending != ERROR_IO_PENDING {
            return Err(io::Error::from_raw_os_error(pending as i32));
        }
        check(unsafe { GetOverlappedResult(self.handle.0, &mut overlapped, &mut count, TRUE) })?;
        Ok(count)
    }

    fn escape(&self, function: DWORD) -> io::Result<()> {
        check(unsafe { EscapeCommFunction(self.handle.0, function) })
    }

    fn teardown(&mut self) -> Result<(), PortError> {
        if self.handle.0.is_null() {
            return Ok(());
        }
        let mut first: Option<PortError> = None;

        for (function, operation) in [(CLRDTR, "lower DTR on close"), (CLRRTS, "lower RTS on close")] {
            if let Err(e) = self.escape(function) {
                warn!(device = %self.name, "could not {operation}: {e}");
                first.get_or_insert(PortError::control(operation)(e));
            }
        }
        if let Err(e) = self.event.close() {
            first.get_or_insert(PortError::control("close event handle")(e));
        }
        if let Err(e) = self.handle.close() {
            first.get_or_insert(PortError::control("close device")(e));
        }

        debug!(device = %self.name, "port closed");
        first.map_or(Ok(()), Err)
    }
}

/// `COM10` and above need the device namespace prefix.
fn device_path(name: &str) -> Vec<u16> {
    let full = if name.starts_with(r"\\.\") {
        name.to_string()
    } else {
        format!(r"\\.\{name}")
    };
    OsStr::new(&full).encode_wide().chain(Some(0)).collect()
}

impl TimedIo for WindowsPort {
    fn try_read(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<Attempt> {
        self.set_timeouts(read_timeouts(timeout))?;
        let len = buffer.len().min(MAXDWORD as usize) as DWORD;
        let n = self.overlapped(|handle, count, overlapped| unsafe {
            ReadFile(handle, buffer.as_mut_ptr().cast(), len, count, overlapped)
        })?;
        Ok(if n == 0 {
            Attempt::TimedOut
        } else {
            Attempt::Transferred(n as usize)
        })
    }

    fn try_write(&mut self, data: &[u8], timeout: Duration) -> io::Result<Attempt> {
        self.set_timeouts(write_timeouts(timeout))?;
        let len = data.len().min(MAXDWORD as usize) as DWORD;
        let n = self.overlapped(|handle, count, overlapped| unsafe {
            WriteFile(handle, data.as_ptr().cast(), len, count, overlapped)
        })?;
        Ok(if n == 0 && !data.is_empty() {
            Attempt::TimedOut
        } else {
            Attempt::Transferred(n as usize)
        })
    }
}

impl ModemControl for WindowsPort {
    fn modem_lines(&self) -> io::Result<ModemLines> {
        let mut status: DWORD = 0;
        check(unsafe { GetCommModemStatus(self.handle.0, &mut status) })?;
        Ok(ModemLines {
            cts: status & MS_CTS_ON != 0,
            dsr: status & MS_DSR_ON != 0,
            dcd: status & MS_RLSD_ON != 0,
            ring: status & MS_RING_ON != 0,
        })
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.escape(if level { SETDTR } else { CLRDTR })
    }

    fn set_rts(&mut self, level: bool) -> io::Result<()> {
        self.escape(if level { SETRTS } else { CLRRTS })
    }

    fn set_break(&mut self, on: bool) -> io::Result<()> {
        let handle = self.handle.0;
        check(unsafe {
            if on {
                SetCommBreak(handle)
            } else {
                ClearCommBreak(handle)
            }
        })
    }

    fn flush(&mut self, queue: FlushQueue) -> io::Result<()> {
        let flags = match queue {
            FlushQueue::Input => PURGE_RXCLEAR | PURGE_RXABORT,
            FlushQueue::Output => PURGE_TXCLEAR | PURGE_TXABORT,
            FlushQueue::Both => PURGE_RXCLEAR | PURGE_RXABORT | PURGE_TXCLEAR | PURGE_TXABORT,
        };
        check(unsafe { PurgeComm(self.handle.0, flags) })
    }
}

impl PortBackend for WindowsPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(mut self) -> Result<(), PortError> {
        self.teardown()
    }
}

impl Drop for WindowsPort {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

impl fmt::Debug for WindowsPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowsPort")
            .field("name", &self.name)
            .field("handle", &self.handle.0)
            .finish()
    }
}
