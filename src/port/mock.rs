//! Mock serial port implementation for testing.
//!
//! Provides a `MockPort` backend that simulates a serial channel in memory,
//! driven by a [`ManualClock`] so deadline behavior is deterministic. Two
//! mocks made with [`MockPort::pair`] behave like a null-modem cable.

use super::clock::ManualClock;
use super::error::PortError;
use super::traits::{Attempt, FlushQueue, ModemControl, ModemLines, PortBackend, TimedIo};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Inner state of the mock port, shared between clones.
#[derive(Debug)]
struct MockPortState {
    /// Bytes waiting to be returned by reads.
    read_queue: VecDeque<u8>,
    /// Every successful write, one entry per attempt.
    write_log: Vec<Vec<u8>>,
    /// Most bytes a single attempt may move.
    chunk_limit: Option<usize>,
    /// Clock advance per attempt. `None` charges a timed-out attempt its
    /// full timeout and a transfer nothing.
    elapsed_per_attempt: Option<Duration>,
    /// Timeout handed to each read or write attempt, in order.
    attempt_timeouts: Vec<Duration>,
    /// Fail attempt number `n` (1-based, reads and writes together).
    fail_on_attempt: Option<(usize, io::ErrorKind)>,
    fail_control: bool,
    stall_writes: bool,
    lines: ModemLines,
    dtr: bool,
    rts: bool,
    break_on: bool,
    flushes: Vec<FlushQueue>,
    closed: bool,
}

impl Default for MockPortState {
    fn default() -> Self {
        Self {
            read_queue: VecDeque::new(),
            write_log: Vec::new(),
            chunk_limit: None,
            elapsed_per_attempt: None,
            attempt_timeouts: Vec::new(),
            fail_on_attempt: None,
            fail_control: false,
            stall_writes: false,
            lines: ModemLines::default(),
            dtr: false,
            rts: true,
            break_on: false,
            flushes: Vec::new(),
            closed: false,
        }
    }
}

impl MockPortState {
    /// Record an attempt; returns the injected failure if this is the one.
    fn begin_attempt(&mut self, timeout: Duration) -> io::Result<()> {
        self.attempt_timeouts.push(timeout);
        match self.fail_on_attempt {
            Some((n, kind)) if n == self.attempt_timeouts.len() => {
                Err(io::Error::new(kind, "injected failure"))
            }
            _ => Ok(()),
        }
    }

    fn cost(&self, attempt: Attempt, timeout: Duration) -> Duration {
        match (self.elapsed_per_attempt, attempt) {
            (Some(fixed), _) => fixed,
            (None, Attempt::TimedOut) => timeout,
            (None, Attempt::Transferred(_)) => Duration::ZERO,
        }
    }

    fn limit(&self, len: usize) -> usize {
        self.chunk_limit.map_or(len, |k| len.min(k))
    }

    fn control(&self) -> io::Result<()> {
        if self.fail_control {
            Err(io::Error::new(io::ErrorKind::Other, "injected control failure"))
        } else {
            Ok(())
        }
    }
}

/// In-memory serial backend.
///
/// Clones share state, so a test can keep a clone to inspect the port after
/// handing the original to a [`SerialPort`](super::SerialPort).
///
/// # Example
/// ```
/// use rs232_transport::port::{MockPort, SerialPort};
/// use std::time::Duration;
///
/// let mock = MockPort::new("MOCK0");
/// mock.enqueue_read(b"Hello");
///
/// let mut port = SerialPort::from_backend(mock.clone()).with_clock(mock.clock());
/// let mut buffer = [0u8; 5];
/// assert_eq!(port.read(&mut buffer, Duration::from_millis(100)).unwrap(), 5);
/// assert_eq!(&buffer, b"Hello");
///
/// port.write(b"ack", Duration::from_millis(100)).unwrap();
/// assert_eq!(mock.written(), b"ack");
/// ```
#[derive(Clone)]
pub struct MockPort {
    name: String,
    state: Arc<Mutex<MockPortState>>,
    peer: Option<Arc<Mutex<MockPortState>>>,
    clock: ManualClock,
}

impl MockPort {
    /// Create a standalone mock with its own clock. Lines start as after a
    /// real open without flow control: DTR low, RTS high.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, ManualClock::new())
    }

    pub fn with_clock(name: impl Into<String>, clock: ManualClock) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockPortState::default())),
            peer: None,
            clock,
        }
    }

    /// Two mocks wired back to back on one shared clock.
    ///
    /// Writes on one side arrive in the other's read queue, RTS drives the
    /// peer's CTS, DTR drives the peer's DSR and DCD, and raising break
    /// delivers a zero byte to the peer.
    pub fn pair(a: impl Into<String>, b: impl Into<String>) -> (Self, Self) {
        let clock = ManualClock::new();
        let mut left = Self::with_clock(a, clock.clone());
        let mut right = Self::with_clock(b, clock);

        left.state.lock().lines.cts = true;
        right.state.lock().lines.cts = true;
        left.peer = Some(right.state.clone());
        right.peer = Some(left.state.clone());
        (left, right)
    }

    /// The clock this mock advances. Hand it to the port handle.
    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    /// Enqueue bytes to be returned by subsequent reads.
    pub fn enqueue_read(&self, data: &[u8]) {
        self.state.lock().read_queue.extend(data);
    }

    /// Number of bytes waiting to be read.
    pub fn available_bytes(&self) -> usize {
        self.state.lock().read_queue.len()
    }

    /// All written bytes, concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().write_log.concat()
    }

    /// Written bytes, one entry per write attempt.
    pub fn write_log(&self) -> Vec<Vec<u8>> {
        self.state.lock().write_log.clone()
    }

    /// Forget logged writes and attempts. Attempt numbering restarts at 1.
    pub fn clear_logs(&self) {
        let mut state = self.state.lock();
        state.write_log.clear();
        state.attempt_timeouts.clear();
    }

    /// Cap every attempt at `limit` bytes, forcing short transfers.
    pub fn set_chunk_limit(&self, limit: Option<usize>) {
        self.state.lock().chunk_limit = limit;
    }

    /// Charge a fixed duration to the clock for every attempt.
    pub fn set_elapsed_per_attempt(&self, elapsed: Option<Duration>) {
        self.state.lock().elapsed_per_attempt = elapsed;
    }

    /// Timeouts handed to each read and write attempt so far.
    pub fn attempt_timeouts(&self) -> Vec<Duration> {
        self.state.lock().attempt_timeouts.clone()
    }

    /// Make attempt number `attempt` (counting from 1) fail with `kind`.
    pub fn fail_on_attempt(&self, attempt: usize, kind: io::ErrorKind) {
        self.state.lock().fail_on_attempt = Some((attempt, kind));
    }

    /// Make modem-control, break, flush and close calls fail.
    pub fn set_fail_control(&self, fail: bool) {
        self.state.lock().fail_control = fail;
    }

    /// Make writes time out as if flow control were holding them back.
    pub fn set_stall_writes(&self, stall: bool) {
        self.state.lock().stall_writes = stall;
    }

    /// Drive the status lines directly. Used for standalone mocks.
    pub fn set_modem_lines(&self, lines: ModemLines) {
        self.state.lock().lines = lines;
    }

    pub fn dtr(&self) -> bool {
        self.state.lock().dtr
    }

    pub fn rts(&self) -> bool {
        self.state.lock().rts
    }

    pub fn break_enabled(&self) -> bool {
        self.state.lock().break_on
    }

    /// Flush requests received, in order.
    pub fn flushes(&self) -> Vec<FlushQueue> {
        self.state.lock().flushes.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn with_peer(&self, update: impl FnOnce(&mut MockPortState)) {
        if let Some(peer) = &self.peer {
            update(&mut peer.lock());
        }
    }
}

impl TimedIo for MockPort {
    fn try_read(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<Attempt> {
        let mut state = self.state.lock();
        state.begin_attempt(timeout)?;

        let n = state.limit(buffer.len()).min(state.read_queue.len());
        for (slot, byte) in buffer.iter_mut().zip(state.read_queue.drain(..n)) {
            *slot = byte;
        }

        let attempt = if n == 0 {
            Attempt::TimedOut
        } else {
            Attempt::Transferred(n)
        };
        self.clock.advance(state.cost(attempt, timeout));
        Ok(attempt)
    }

    fn try_write(&mut self, data: &[u8], timeout: Duration) -> io::Result<Attempt> {
        let chunk = {
            let mut state = self.state.lock();
            state.begin_attempt(timeout)?;

            if state.stall_writes {
                self.clock.advance(state.cost(Attempt::TimedOut, timeout));
                return Ok(Attempt::TimedOut);
            }

            let n = state.limit(data.len());
            state.write_log.push(data[..n].to_vec());
            self.clock.advance(state.cost(Attempt::Transferred(n), timeout));
            &data[..n]
        };

        self.with_peer(|peer| peer.read_queue.extend(chunk));
        Ok(Attempt::Transferred(chunk.len()))
    }
}

impl ModemControl for MockPort {
    fn modem_lines(&self) -> io::Result<ModemLines> {
        let state = self.state.lock();
        state.control()?;
        Ok(state.lines)
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        {
            let mut state = self.state.lock();
            state.control()?;
            state.dtr = level;
        }
        self.with_peer(|peer| {
            peer.lines.dsr = level;
            peer.lines.dcd = level;
        });
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> io::Result<()> {
        {
            let mut state = self.state.lock();
            state.control()?;
            state.rts = level;
        }
        self.with_peer(|peer| peer.lines.cts = level);
        Ok(())
    }

    fn set_break(&mut self, on: bool) -> io::Result<()> {
        let rising = {
            let mut state = self.state.lock();
            state.control()?;
            let rising = on && !state.break_on;
            state.break_on = on;
            rising
        };
        if rising {
            self.with_peer(|peer| peer.read_queue.push_back(0x00));
        }
        Ok(())
    }

    fn flush(&mut self, queue: FlushQueue) -> io::Result<()> {
        let mut state = self.state.lock();
        state.control()?;
        if matches!(queue, FlushQueue::Input | FlushQueue::Both) {
            state.read_queue.clear();
        }
        state.flushes.push(queue);
        Ok(())
    }
}

impl PortBackend for MockPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(self) -> Result<(), PortError> {
        let failure = {
            let mut state = self.state.lock();
            let failure = state.control().err();
            state.dtr = false;
            state.rts = false;
            state.break_on = false;
            state.closed = true;
            failure
        };
        self.with_peer(|peer| {
            peer.lines.cts = false;
            peer.lines.dsr = false;
            peer.lines.dcd = false;
        });

        match failure {
            Some(e) => Err(PortError::control("lower DTR/RTS on close")(e)),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for MockPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockPort")
            .field("name", &self.name)
            .field("available_bytes", &self.available_bytes())
            .field("paired", &self.peer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::clock::Clock;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_enqueue_and_read() {
        let mut port = MockPort::new("MOCK0");
        port.enqueue_read(b"Hello");

        let mut buffer = [0u8; 10];
        let attempt = port.try_read(&mut buffer, ms(10)).unwrap();
        assert_eq!(attempt, Attempt::Transferred(5));
        assert_eq!(&buffer[..5], b"Hello");
    }

    #[test]
    fn test_empty_read_times_out_and_charges_clock() {
        let mut port = MockPort::new("MOCK0");
        let clock = port.clock();

        let mut buffer = [0u8; 4];
        assert_eq!(port.try_read(&mut buffer, ms(25)).unwrap(), Attempt::TimedOut);
        assert_eq!(clock.elapsed(), ms(25));
    }

    #[test]
    fn test_chunk_limit_forces_short_reads() {
        let mut port = MockPort::new("MOCK0");
        port.enqueue_read(b"Hello, World!");
        port.set_chunk_limit(Some(4));

        let mut buffer = [0u8; 16];
        assert_eq!(port.try_read(&mut buffer, ms(10)).unwrap(), Attempt::Transferred(4));
        assert_eq!(port.available_bytes(), 9);
    }

    #[test]
    fn test_write_logging() {
        let mut port = MockPort::new("MOCK0");
        port.try_write(b"Test1", ms(10)).unwrap();
        port.try_write(b"Test2", ms(10)).unwrap();

        let log = port.write_log();
        assert_eq!(log, vec![b"Test1".to_vec(), b"Test2".to_vec()]);
        assert_eq!(port.written(), b"Test1Test2");
    }

    #[test]
    fn test_injected_failure_hits_exact_attempt() {
        let mut port = MockPort::new("MOCK0");
        port.fail_on_attempt(2, io::ErrorKind::BrokenPipe);

        assert!(port.try_write(b"a", ms(10)).is_ok());
        let err = port.try_write(b"b", ms(10)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(port.try_write(b"c", ms(10)).is_ok());
    }

    #[test]
    fn test_pair_carries_data_and_lines() {
        let (mut a, mut b) = MockPort::pair("A", "B");

        a.try_write(b"ping", ms(10)).unwrap();
        let mut buffer = [0u8; 4];
        assert_eq!(b.try_read(&mut buffer, ms(10)).unwrap(), Attempt::Transferred(4));
        assert_eq!(&buffer, b"ping");

        assert!(b.modem_lines().unwrap().cts);
        a.set_rts(false).unwrap();
        assert!(!b.modem_lines().unwrap().cts);

        a.set_dtr(true).unwrap();
        let lines = b.modem_lines().unwrap();
        assert!(lines.dsr && lines.dcd);
    }

    #[test]
    fn test_break_delivers_single_zero() {
        let (mut a, b) = MockPort::pair("A", "B");
        a.set_break(true).unwrap();
        a.set_break(true).unwrap();
        a.set_break(false).unwrap();
        assert_eq!(b.available_bytes(), 1);
    }

    #[test]
    fn test_flush_input_discards_queue() {
        let mut port = MockPort::new("MOCK0");
        port.enqueue_read(b"stale");
        port.flush(FlushQueue::Output).unwrap();
        assert_eq!(port.available_bytes(), 5);
        port.flush(FlushQueue::Both).unwrap();
        assert_eq!(port.available_bytes(), 0);
        assert_eq!(port.flushes(), vec![FlushQueue::Output, FlushQueue::Both]);
    }

    #[test]
    fn test_close_releases_even_when_control_fails() {
        let port = MockPort::new("MOCK0");
        let view = port.clone();
        port.set_fail_control(true);

        assert!(port.close().is_err());
        assert!(view.is_closed());
        assert!(!view.rts());
    }
}
