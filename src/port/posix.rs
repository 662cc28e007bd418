//! POSIX backend: termios line control and `poll(2)` readiness waits.
//!
//! The descriptor is opened non-blocking with `VMIN = VTIME = 0`, so every
//! transfer is a single `read(2)`/`write(2)` gated by one `poll` bounded by
//! the attempt's timeout.

use super::error::PortError;
use super::line::{DataBits, FlowControl, LineConfig, OpenOptions, Parity, StopBits};
use super::traits::{Attempt, FlushQueue, ModemControl, ModemLines, PortBackend, TimedIo};
use libc::{c_int, speed_t, termios};
use std::ffi::CString;
use std::fmt;
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(any(target_os = "linux", target_os = "android"))]
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115200, 230400, 460800, 500000, 576000, 921600, 1000000, 1152000, 1500000, 2000000, 2500000,
    3000000, 3500000, 4000000,
];

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115200, 230400,
];

fn speed_for(baud_rate: u32) -> Option<speed_t> {
    let speed = match baud_rate {
        50 => libc::B50,
        75 => libc::B75,
        110 => libc::B110,
        134 => libc::B134,
        150 => libc::B150,
        200 => libc::B200,
        300 => libc::B300,
        600 => libc::B600,
        1200 => libc::B1200,
        1800 => libc::B1800,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        460800 => libc::B460800,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        500000 => libc::B500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        576000 => libc::B576000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        921600 => libc::B921600,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        1000000 => libc::B1000000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        1152000 => libc::B1152000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        1500000 => libc::B1500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        2000000 => libc::B2000000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        2500000 => libc::B2500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        3000000 => libc::B3000000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        3500000 => libc::B3500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        4000000 => libc::B4000000,
        _ => return None,
    };
    Some(speed)
}

/// Translate a validated configuration into a raw-mode `termios`.
///
/// Pure: builds the structure without touching any descriptor.
pub fn line_settings(config: &LineConfig) -> Result<termios, PortError> {
    let speed =
        speed_for(config.baud_rate()).ok_or(PortError::UnsupportedBaudRate(config.baud_rate()))?;

    let size = match config.data_bits() {
        DataBits::Five => libc::CS5,
        DataBits::Six => libc::CS6,
        DataBits::Seven => libc::CS7,
        DataBits::Eight => libc::CS8,
    };
    let (cpar, ipar) = match config.parity() {
        Parity::None => (0, libc::IGNPAR),
        Parity::Even => (libc::PARENB, libc::INPCK),
        Parity::Odd => (libc::PARENB | libc::PARODD, libc::INPCK),
    };
    let stop = match config.stop_bits() {
        StopBits::One => 0,
        StopBits::Two => libc::CSTOPB,
    };

    // SAFETY: termios is a plain C struct for which all-zero is valid.
    let mut settings: termios = unsafe { mem::zeroed() };
    settings.c_cflag = size | cpar | stop | libc::CLOCAL | libc::CREAD;
    if config.flow_control() == FlowControl::Hardware {
        settings.c_cflag |= libc::CRTSCTS;
    }
    settings.c_iflag = ipar;
    settings.c_oflag = 0;
    settings.c_lflag = 0;
    settings.c_cc[libc::VMIN] = 0;
    settings.c_cc[libc::VTIME] = 0;

    // SAFETY: `settings` is a valid termios and `speed` a B* constant.
    unsafe {
        libc::cfsetispeed(&mut settings, speed);
        libc::cfsetospeed(&mut settings, speed);
    }

    Ok(settings)
}

fn cvt(rc: c_int) -> io::Result<c_int> {
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

fn get_attr(fd: RawFd) -> io::Result<termios> {
    // SAFETY: all-zero termios is valid; tcgetattr overwrites it.
    let mut settings: termios = unsafe { mem::zeroed() };
    cvt(unsafe { libc::tcgetattr(fd, &mut settings) })?;
    Ok(settings)
}

fn set_attr(fd: RawFd, settings: &termios) -> io::Result<()> {
    cvt(unsafe { libc::tcsetattr(fd, libc::TCSANOW, settings) }).map(drop)
}

fn modem_bits(fd: RawFd) -> io::Result<c_int> {
    let mut bits: c_int = 0;
    cvt(unsafe { libc::ioctl(fd, libc::TIOCMGET, &mut bits as *mut c_int) })?;
    Ok(bits)
}

fn set_modem_bits(fd: RawFd, bits: c_int) -> io::Result<()> {
    cvt(unsafe { libc::ioctl(fd, libc::TIOCMSET, &bits as *const c_int) }).map(drop)
}

fn update_modem_bits(fd: RawFd, mask: c_int, level: bool) -> io::Result<()> {
    let bits = modem_bits(fd)?;
    let bits = if level { bits | mask } else { bits & !mask };
    set_modem_bits(fd, bits)
}

fn lock(fd: RawFd) -> io::Result<()> {
    cvt(unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) }).map(drop)
}

fn unlock(fd: RawFd) -> io::Result<()> {
    cvt(unsafe { libc::flock(fd, libc::LOCK_UN) }).map(drop)
}

fn poll_timeout(timeout: Duration) -> c_int {
    let mut millis = timeout.as_millis();
    if timeout.subsec_nanos() % 1_000_000 != 0 {
        millis += 1;
    }
    if millis >= c_int::MAX as u128 {
        -1
    } else {
        millis as c_int
    }
}

/// Wait for `events` on `fd`. `Ok(false)` means the wait timed out.
fn wait(fd: RawFd, events: libc::c_short, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };

    let rc = unsafe { libc::poll(&mut pfd, 1, poll_timeout(timeout)) };
    if rc == -1 {
        let err = io::Error::last_os_error();
        return if err.kind() == io::ErrorKind::Interrupted {
            Ok(false)
        } else {
            Err(err)
        };
    }
    if rc == 0 {
        return Ok(false);
    }

    if pfd.revents & libc::POLLNVAL != 0 {
        return Err(io::Error::from_raw_os_error(libc::EBADF));
    }
    if pfd.revents & events != 0 {
        return Ok(true);
    }
    if pfd.revents & libc::POLLHUP != 0 {
        return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device hung up"));
    }
    if pfd.revents & libc::POLLERR != 0 {
        return Err(io::Error::new(io::ErrorKind::Other, "error condition on device"));
    }
    Ok(false)
}

/// A single transfer result, with "try again" folded into zero bytes.
fn transferred(rc: isize) -> io::Result<Attempt> {
    if rc >= 0 {
        return Ok(Attempt::Transferred(rc as usize));
    }
    let err = io::Error::last_os_error();
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(Attempt::Transferred(0)),
        _ => Err(err),
    }
}

/// An open tty descriptor.
pub struct PosixPort {
    fd: Option<OwnedFd>,
    name: String,
    locked: bool,
}

impl PosixPort {
    /// Open `name`, apply `config` and set the initial modem lines.
    ///
    /// Every failure after the descriptor is acquired rolls back: the saved
    /// termios is restored if it was read, the lock is dropped and the
    /// descriptor closed.
    pub fn open(name: &str, config: &LineConfig, options: &OpenOptions) -> Result<Self, PortError> {
        let settings = line_settings(config)?;
        let path = CString::new(name)
            .map_err(|_| PortError::invalid_argument("device name contains a NUL byte"))?;

        let raw = unsafe {
            libc::open(
                path.as_ptr(),
                libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK | libc::O_CLOEXEC,
            )
        };
        if raw == -1 {
            return Err(PortError::device_unavailable(name, io::Error::last_os_error()));
        }
        // SAFETY: `raw` was just returned by open(2) and is owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        if options.exclusive_lock {
            lock(raw).map_err(|e| PortError::device_unavailable(name, e))?;
        }
        let abandon = |saved: Option<&termios>| {
            if let Some(saved) = saved {
                let _ = set_attr(raw, saved);
            }
            if options.exclusive_lock {
                let _ = unlock(raw);
            }
        };

        let saved = match get_attr(raw) {
            Ok(saved) => saved,
            Err(e) => {
                abandon(None);
                return Err(PortError::configuration_rejected(name, e));
            }
        };
        if let Err(e) = set_attr(raw, &settings) {
            abandon(Some(&saved));
            return Err(PortError::configuration_rejected(name, e));
        }

        let handshake = modem_bits(raw).and_then(|bits| {
            let mut bits = bits & !libc::TIOCM_DTR;
            if !config.hardware_flow_control() {
                bits |= libc::TIOCM_RTS;
            }
            set_modem_bits(raw, bits)
        });
        if let Err(e) = handshake {
            abandon(Some(&saved));
            return Err(PortError::handshake_setup_failed(name, e));
        }

        debug!(device = name, line = %config, locked = options.exclusive_lock, "port opened");
        Ok(Self {
            fd: Some(fd),
            name: name.to_string(),
            locked: options.exclusive_lock,
        })
    }

    /// Wrap an already-open descriptor, switching it to non-blocking mode.
    ///
    /// No line settings are applied. Used for pipes and pseudo-terminals.
    #[cfg(test)]
    pub(crate) fn from_owned_fd(fd: OwnedFd, name: impl Into<String>) -> io::Result<Self> {
        let raw = fd.as_raw_fd();
        let flags = cvt(unsafe { libc::fcntl(raw, libc::F_GETFL) })?;
        cvt(unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) })?;
        Ok(Self {
            fd: Some(fd),
            name: name.into(),
            locked: false,
        })
    }

    fn raw(&self) -> RawFd {
        self.fd.as_ref().map_or(-1, AsRawFd::as_raw_fd)
    }

    /// Lower DTR and RTS, drop the lock, close. Runs every step.
    fn teardown(&mut self) -> Result<(), PortError> {
        let Some(fd) = self.fd.take() else {
            return Ok(());
        };
        let raw = fd.as_raw_fd();
        let mut first: Option<PortError> = None;

        let lines = modem_bits(raw)
            .and_then(|bits| set_modem_bits(raw, bits & !(libc::TIOCM_DTR | libc::TIOCM_RTS)));
        if let Err(e) = lines {
            warn!(device = %self.name, "could not lower DTR/RTS on close: {e}");
            first.get_or_insert(PortError::control("lower DTR/RTS on close")(e));
        }

        if self.locked {
            if let Err(e) = unlock(raw) {
                warn!(device = %self.name, "could not release lock on close: {e}");
                first.get_or_insert(PortError::control("release device lock")(e));
            }
            self.locked = false;
        }

        if let Err(e) = cvt(unsafe { libc::close(fd.into_raw_fd()) }) {
            first.get_or_insert(PortError::control("close device")(e));
        }

        debug!(device = %self.name, "port closed");
        first.map_or(Ok(()), Err)
    }
}

impl TimedIo for PosixPort {
    fn try_read(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<Attempt> {
        let fd = self.raw();
        if !wait(fd, libc::POLLIN, timeout)? {
            return Ok(Attempt::TimedOut);
        }
        let rc = unsafe { libc::read(fd, buffer.as_mut_ptr().cast(), buffer.len()) };
        if rc == 0 && !buffer.is_empty() {
            // Readable with nothing to read: the other end is gone.
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "device hung up"));
        }
        transferred(rc)
    }

    fn try_write(&mut self, data: &[u8], timeout: Duration) -> io::Result<Attempt> {
        let fd = self.raw();
        if !wait(fd, libc::POLLOUT, timeout)? {
            return Ok(Attempt::TimedOut);
        }
        let rc = unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) };
        transferred(rc)
    }
}

impl ModemControl for PosixPort {
    fn modem_lines(&self) -> io::Result<ModemLines> {
        let bits = modem_bits(self.raw())?;
        Ok(ModemLines {
            cts: bits & libc::TIOCM_CTS != 0,
            dsr: bits & libc::TIOCM_DSR != 0,
            dcd: bits & libc::TIOCM_CAR != 0,
            ring: bits & libc::TIOCM_RNG != 0,
        })
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        update_modem_bits(self.raw(), libc::TIOCM_DTR, level)
    }

    fn set_rts(&mut self, level: bool) -> io::Result<()> {
        update_modem_bits(self.raw(), libc::TIOCM_RTS, level)
    }

    fn set_break(&mut self, on: bool) -> io::Result<()> {
        let request = if on { libc::TIOCSBRK } else { libc::TIOCCBRK };
        cvt(unsafe { libc::ioctl(self.raw(), request) }).map(drop)
    }

    fn flush(&mut self, queue: FlushQueue) -> io::Result<()> {
        let selector = match queue {
            FlushQueue::Input => libc::TCIFLUSH,
            FlushQueue::Output => libc::TCOFLUSH,
            FlushQueue::Both => libc::TCIOFLUSH,
        };
        cvt(unsafe { libc::tcflush(self.raw(), selector) }).map(drop)
    }
}

impl PortBackend for PosixPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(mut self) -> Result<(), PortError> {
        self.teardown()
    }
}

impl Drop for PosixPort {
    fn drop(&mut self) {
        if self.fd.is_some() {
            let _ = self.teardown();
        }
    }
}

impl fmt::Debug for PosixPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PosixPort")
            .field("name", &self.name)
            .field("fd", &self.raw())
            .field("locked", &self.locked)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::clock::MonotonicClock;
    use crate::port::deadline::read_within;
    use crate::port::line::OpenFlags;
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::time::Instant;

    fn pipe() -> (PosixPort, PosixPort) {
        let mut fds = [0 as c_int; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (rx, tx) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        (
            PosixPort::from_owned_fd(rx, "pipe-rx").unwrap(),
            PosixPort::from_owned_fd(tx, "pipe-tx").unwrap(),
        )
    }

    #[test]
    fn test_line_settings_8n1() {
        let config = LineConfig::new(115200, "8N1", OpenFlags::NONE).unwrap();
        let t = line_settings(&config).unwrap();

        assert_eq!(t.c_cflag & libc::CSIZE, libc::CS8);
        assert_eq!(t.c_cflag & libc::PARENB, 0);
        assert_eq!(t.c_cflag & libc::CSTOPB, 0);
        assert_eq!(t.c_cflag & libc::CRTSCTS, 0);
        assert_ne!(t.c_cflag & libc::CLOCAL, 0);
        assert_ne!(t.c_cflag & libc::CREAD, 0);
        assert_eq!(t.c_iflag, libc::IGNPAR);
        assert_eq!(t.c_lflag, 0);
        assert_eq!(t.c_cc[libc::VMIN], 0);
        assert_eq!(unsafe { libc::cfgetospeed(&t) }, libc::B115200);
        assert_eq!(unsafe { libc::cfgetispeed(&t) }, libc::B115200);
    }

    #[test]
    fn test_line_settings_7o2_hw() {
        let config = LineConfig::new(9600, "7o2", OpenFlags::HW_FLOW_CONTROL).unwrap();
        let t = line_settings(&config).unwrap();

        assert_eq!(t.c_cflag & libc::CSIZE, libc::CS7);
        assert_ne!(t.c_cflag & libc::PARENB, 0);
        assert_ne!(t.c_cflag & libc::PARODD, 0);
        assert_ne!(t.c_cflag & libc::CSTOPB, 0);
        assert_ne!(t.c_cflag & libc::CRTSCTS, 0);
        assert_eq!(t.c_iflag, libc::INPCK);
    }

    #[test]
    fn test_every_supported_rate_has_a_speed() {
        for &rate in SUPPORTED_BAUD_RATES {
            assert!(speed_for(rate).is_some(), "{rate}");
        }
    }

    #[test]
    fn test_poll_timeout_rounding() {
        assert_eq!(poll_timeout(Duration::ZERO), 0);
        assert_eq!(poll_timeout(Duration::from_micros(1)), 1);
        assert_eq!(poll_timeout(Duration::from_millis(250)), 250);
        assert_eq!(poll_timeout(Duration::MAX), -1);
    }

    #[test]
    fn test_open_missing_device_is_unavailable() {
        let config = LineConfig::new(9600, "8N1", OpenFlags::NONE).unwrap();
        let err = PosixPort::open("/dev/does-not-exist-rs232", &config, &OpenOptions::default())
            .unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }

    #[test]
    fn test_open_rejects_interior_nul() {
        let config = LineConfig::new(9600, "8N1", OpenFlags::NONE).unwrap();
        let err = PosixPort::open("/dev/tty\0S0", &config, &OpenOptions::default()).unwrap_err();
        assert!(matches!(err, PortError::InvalidArgument(_)));
    }

    #[test]
    fn test_nonblocking_poll_returns_immediately() {
        let (mut rx, _tx) = pipe();
        let mut buf = [0u8; 16];

        let started = Instant::now();
        let attempt = rx.try_read(&mut buf, Duration::ZERO).unwrap();
        assert_eq!(attempt, Attempt::TimedOut);
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_read_waits_for_timeout() {
        let (mut rx, _tx) = pipe();
        let mut buf = [0u8; 16];

        let started = Instant::now();
        let attempt = rx.try_read(&mut buf, Duration::from_millis(60)).unwrap();
        assert_eq!(attempt, Attempt::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(55));
    }

    #[test]
    fn test_pipe_transfer() {
        let (mut rx, mut tx) = pipe();

        let attempt = tx.try_write(b"hello", Duration::from_millis(100)).unwrap();
        assert_eq!(attempt, Attempt::Transferred(5));

        let mut buf = [0u8; 16];
        let attempt = rx.try_read(&mut buf, Duration::from_millis(100)).unwrap();
        assert_eq!(attempt, Attempt::Transferred(5));
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn test_closed_writer_is_an_error_not_a_timeout() {
        let (mut rx, tx) = pipe();
        drop(tx);

        let mut buf = [0u8; 4];
        let err = rx.try_read(&mut buf, Duration::from_millis(100)).unwrap_err();
        // POLLHUP alone, or POLLIN|POLLHUP followed by end-of-file.
        assert!(
            matches!(err.kind(), io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof),
            "{err}"
        );
    }

    fn hung_up_socket() -> PosixPort {
        let (local, peer) = UnixStream::pair().unwrap();
        drop(peer);
        PosixPort::from_owned_fd(OwnedFd::from(local), "socket").unwrap()
    }

    #[test]
    fn test_hung_up_peer_fails_the_attempt() {
        let mut port = hung_up_socket();
        let mut buf = [0u8; 8];
        let err = port.try_read(&mut buf, Duration::from_millis(100)).unwrap_err();
        assert!(
            matches!(err.kind(), io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof),
            "{err}"
        );
    }

    #[test]
    fn test_hung_up_peer_does_not_spin_until_deadline() {
        let mut port = hung_up_socket();
        let clock = MonotonicClock::new();
        let mut buf = [0u8; 8];

        let started = Instant::now();
        let err = read_within(&mut port, &clock, &mut buf, Duration::from_millis(300)).unwrap_err();
        assert!(matches!(err, PortError::Io { transferred: 0, .. }), "{err}");
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_hung_up_peer_fails_an_unbounded_read() {
        let mut port = hung_up_socket();
        let clock = MonotonicClock::new();
        let mut buf = [0u8; 8];
        assert!(read_within(&mut port, &clock, &mut buf, Duration::MAX).is_err());
    }

    #[test]
    fn test_empty_read_buffer_is_not_a_hang_up() {
        let (local, _peer) = UnixStream::pair().unwrap();
        let mut port = PosixPort::from_owned_fd(OwnedFd::from(local), "socket").unwrap();
        let mut empty = [0u8; 0];
        assert_eq!(
            port.try_read(&mut empty, Duration::ZERO).unwrap(),
            Attempt::TimedOut
        );
    }

    #[test]
    fn test_modem_queries_fail_on_non_tty() {
        let (rx, _tx) = pipe();
        assert!(rx.modem_lines().is_err());
    }

    #[test]
    fn test_pty_accepts_line_settings() {
        let (mut master, slave) = serialport::TTYPort::pair().expect("pty pair");
        let config = LineConfig::new(9600, "7E2", OpenFlags::NONE).unwrap();
        let settings = line_settings(&config).unwrap();

        let fd = slave.as_raw_fd();
        set_attr(fd, &settings).unwrap();
        let applied = get_attr(fd).unwrap();
        // Character size and parity are forced by the pty driver; speed, stop
        // bits and raw mode are kept.
        assert_eq!(unsafe { libc::cfgetospeed(&applied) }, libc::B9600);
        assert_ne!(applied.c_cflag & libc::CSTOPB, 0);
        assert_eq!(applied.c_lflag & libc::ICANON, 0);

        let dup = cvt(unsafe { libc::dup(fd) }).unwrap();
        let mut port =
            PosixPort::from_owned_fd(unsafe { OwnedFd::from_raw_fd(dup) }, "pty").unwrap();

        master.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        let attempt = port.try_read(&mut buf, Duration::from_secs(1)).unwrap();
        assert!(matches!(attempt, Attempt::Transferred(n) if n > 0));
    }
}
