//! Null-modem loopback checks.
//!
//! Each check drives two open ports whose data and handshake lines are
//! crossed (TX to RX, RTS to CTS, DTR to DSR/DCD) and reports the first
//! mismatch. The same checks run against hardware from `rs232-loopback` and
//! against [`MockPort::pair`](crate::port::MockPort::pair) in tests.

use crate::port::{PortBackend, PortError, SerialPort};
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Which check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    CtsAsserted,
    RoundTrip,
    NonBlockingRoundTrip,
    RtsCts,
    DtrDsr,
    Break,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CtsAsserted => "cts asserted",
            Self::RoundTrip => "round trip",
            Self::NonBlockingRoundTrip => "non-blocking round trip",
            Self::RtsCts => "rts/cts",
            Self::DtrDsr => "dtr/dsr",
            Self::Break => "break",
        })
    }
}

#[derive(Debug, Error)]
pub enum LoopbackError {
    #[error(transparent)]
    Port(#[from] PortError),

    #[error("{check} check failed: {detail}")]
    Mismatch { check: Check, detail: String },
}

impl LoopbackError {
    fn mismatch(check: Check, detail: impl Into<String>) -> Self {
        Self::Mismatch {
            check,
            detail: detail.into(),
        }
    }
}

pub type LoopbackResult<T = ()> = Result<T, LoopbackError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopbackOptions {
    /// Bytes sent by the round-trip checks.
    pub payload_len: usize,
    /// Per-call read/write timeout.
    pub timeout: Duration,
    /// Break conditions raised by the break check.
    pub break_count: usize,
    /// How long each break is held.
    pub break_pulse: Duration,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            payload_len: 256,
            timeout: Duration::from_millis(1000),
            break_count: 256,
            break_pulse: Duration::from_millis(1),
        }
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

fn expect_level(
    check: Check,
    line: &str,
    side: &str,
    actual: bool,
    expected: bool,
) -> LoopbackResult {
    if actual == expected {
        Ok(())
    } else {
        Err(LoopbackError::mismatch(
            check,
            format!("{line} on {side} is {actual}, expected {expected}"),
        ))
    }
}

fn expect_payload(check: Check, sent: &[u8], received: &[u8]) -> LoopbackResult {
    if received.len() != sent.len() {
        return Err(LoopbackError::mismatch(
            check,
            format!("received {} of {} bytes", received.len(), sent.len()),
        ));
    }
    match sent.iter().zip(received).position(|(a, b)| a != b) {
        Some(at) => Err(LoopbackError::mismatch(
            check,
            format!("byte {at}: sent {:#04x}, received {:#04x}", sent[at], received[at]),
        )),
        None => Ok(()),
    }
}

/// Both sides see CTS, i.e. the peer raised RTS on open.
pub fn cts_asserted<B: PortBackend>(src: &SerialPort<B>, dst: &SerialPort<B>) -> LoopbackResult {
    expect_level(Check::CtsAsserted, "CTS", src.name(), src.is_cts_enabled()?, true)?;
    expect_level(Check::CtsAsserted, "CTS", dst.name(), dst.is_cts_enabled()?, true)
}

/// One timed write of the payload, one timed read on the other side.
pub fn round_trip<B: PortBackend>(
    src: &mut SerialPort<B>,
    dst: &mut SerialPort<B>,
    options: &LoopbackOptions,
) -> LoopbackResult {
    let sent = pattern(options.payload_len);
    let written = src.write(&sent, options.timeout)?;
    if written != sent.len() {
        return Err(LoopbackError::mismatch(
            Check::RoundTrip,
            format!("wrote {written} of {} bytes", sent.len()),
        ));
    }

    let mut received = vec![0u8; sent.len()];
    let n = dst.read(&mut received, options.timeout)?;
    expect_payload(Check::RoundTrip, &sent, &received[..n])
}

/// The payload moved with zero-timeout calls only, looping on short counts.
///
/// Gives up once `options.timeout` of wall time has passed without
/// completing.
pub fn round_trip_nonblocking<B: PortBackend>(
    src: &mut SerialPort<B>,
    dst: &mut SerialPort<B>,
    options: &LoopbackOptions,
) -> LoopbackResult {
    let sent = pattern(options.payload_len);
    let started = Instant::now();

    let mut written = 0;
    while written < sent.len() {
        written += src.write(&sent[written..], Duration::ZERO)?;
        if started.elapsed() > options.timeout && written < sent.len() {
            return Err(LoopbackError::mismatch(
                Check::NonBlockingRoundTrip,
                format!("wrote {written} of {} bytes", sent.len()),
            ));
        }
    }

    let mut received = vec![0u8; sent.len()];
    let mut read = 0;
    while read < received.len() {
        read += dst.read(&mut received[read..], Duration::ZERO)?;
        if started.elapsed() > options.timeout && read < received.len() {
            break;
        }
    }
    expect_payload(Check::NonBlockingRoundTrip, &sent, &received[..read])
}

/// RTS on each side drives CTS on the other.
pub fn rts_cts<B: PortBackend>(src: &mut SerialPort<B>, dst: &mut SerialPort<B>) -> LoopbackResult {
    src.disable_rts()?;
    dst.disable_rts()?;
    expect_level(Check::RtsCts, "CTS", src.name(), src.is_cts_enabled()?, false)?;
    expect_level(Check::RtsCts, "CTS", dst.name(), dst.is_cts_enabled()?, false)?;

    src.enable_rts()?;
    dst.enable_rts()?;
    expect_level(Check::RtsCts, "CTS", src.name(), src.is_cts_enabled()?, true)?;
    expect_level(Check::RtsCts, "CTS", dst.name(), dst.is_cts_enabled()?, true)
}

/// DTR on each side drives DSR on the other.
pub fn dtr_dsr<B: PortBackend>(src: &mut SerialPort<B>, dst: &mut SerialPort<B>) -> LoopbackResult {
    src.disable_dtr()?;
    dst.disable_dtr()?;
    expect_level(Check::DtrDsr, "DSR", src.name(), src.is_dsr_enabled()?, false)?;
    expect_level(Check::DtrDsr, "DSR", dst.name(), dst.is_dsr_enabled()?, false)?;

    src.enable_dtr()?;
    dst.enable_dtr()?;
    expect_level(Check::DtrDsr, "DSR", src.name(), src.is_dsr_enabled()?, true)?;
    expect_level(Check::DtrDsr, "DSR", dst.name(), dst.is_dsr_enabled()?, true)
}

/// Every break pulse arrives as one zero byte, and a flush afterwards leaves
/// nothing to read.
pub fn break_zeroes<B: PortBackend>(
    src: &mut SerialPort<B>,
    dst: &mut SerialPort<B>,
    options: &LoopbackOptions,
) -> LoopbackResult {
    src.disable_break()?;
    dst.disable_break()?;
    src.flush_rxtx()?;
    dst.flush_rxtx()?;

    for _ in 0..options.break_count {
        src.enable_break()?;
        thread::sleep(options.break_pulse);
        src.disable_break()?;
    }

    let mut received = vec![0xFFu8; options.break_count];
    let mut read = 0;
    while read < received.len() {
        let n = dst.read(&mut received[read..], options.timeout)?;
        if n == 0 {
            break;
        }
        read += n;
    }
    expect_payload(Check::Break, &vec![0u8; options.break_count], &received[..read])?;

    src.flush_rxtx()?;
    dst.flush_rxtx()?;
    let mut probe = [0u8; 16];
    let stale = dst.read(&mut probe, options.timeout)?;
    if stale != 0 {
        return Err(LoopbackError::mismatch(
            Check::Break,
            format!("{stale} byte(s) readable after flush"),
        ));
    }
    Ok(())
}

/// The full suite for a pair opened without flow control, in order.
pub fn run_all<B: PortBackend>(
    src: &mut SerialPort<B>,
    dst: &mut SerialPort<B>,
    options: &LoopbackOptions,
) -> LoopbackResult {
    let started = Instant::now();

    cts_asserted(src, dst)?;
    debug!(check = %Check::CtsAsserted, "passed");
    round_trip(src, dst, options)?;
    debug!(check = %Check::RoundTrip, "passed");
    round_trip_nonblocking(src, dst, options)?;
    debug!(check = %Check::NonBlockingRoundTrip, "passed");
    rts_cts(src, dst)?;
    debug!(check = %Check::RtsCts, "passed");
    dtr_dsr(src, dst)?;
    debug!(check = %Check::DtrDsr, "passed");
    break_zeroes(src, dst, options)?;
    debug!(check = %Check::Break, "passed");

    info!(
        src = src.name(),
        dst = dst.name(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "loopback suite passed"
    );
    Ok(())
}
