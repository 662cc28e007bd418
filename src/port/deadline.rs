//! Deadline-accumulating reads and writes.
//!
//! A single OS wait cannot track a time budget across several short
//! transfers, so the loop here measures each attempt against a [`Clock`] and
//! hands the engine only what is left of the budget.
//!
//! ```text
//! remaining = timeout
//! while bytes outstanding:
//!     attempt(remaining)            // one wait + one transfer
//!     remaining -= elapsed          // saturating at zero, unless unbounded
//!     error      -> stop, report bytes so far
//!     remaining == 0 -> stop
//! ```

use super::clock::Clock;
use super::error::PortError;
use super::traits::{Attempt, TimedIo};
use std::io;
use std::time::Duration;
use tracing::trace;

/// Timeouts at or above this never run out.
pub const UNBOUNDED: Duration = Duration::from_millis(i32::MAX as u64);

/// The unspent part of a read or write timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    remaining: Duration,
}

impl Budget {
    pub fn new(timeout: Duration) -> Self {
        Self { remaining: timeout }
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    pub fn is_unbounded(&self) -> bool {
        self.remaining >= UNBOUNDED
    }

    /// Charge `elapsed` against the budget, clamping at zero. Unbounded
    /// budgets are left as they are.
    pub fn consume(&mut self, elapsed: Duration) {
        if !self.is_unbounded() {
            self.remaining = self.remaining.saturating_sub(elapsed);
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining.is_zero()
    }
}

/// Read up to `buffer.len()` bytes within `timeout`.
///
/// Returns the number of bytes read, which is short (possibly zero) when the
/// budget runs out. `Duration::ZERO` makes exactly one non-blocking attempt.
///
/// # Errors
///
/// `PortError::Io` if an attempt fails; its `transferred` field carries the
/// bytes already placed in `buffer`.
pub fn read_within<E, C>(
    engine: &mut E,
    clock: &C,
    buffer: &mut [u8],
    timeout: Duration,
) -> Result<usize, PortError>
where
    E: TimedIo + ?Sized,
    C: Clock + ?Sized,
{
    accumulate(clock, buffer.len(), timeout, |done, remaining| {
        engine.try_read(&mut buffer[done..], remaining)
    })
}

/// Write up to `data.len()` bytes within `timeout`.
///
/// Same contract as [`read_within`].
pub fn write_within<E, C>(
    engine: &mut E,
    clock: &C,
    data: &[u8],
    timeout: Duration,
) -> Result<usize, PortError>
where
    E: TimedIo + ?Sized,
    C: Clock + ?Sized,
{
    accumulate(clock, data.len(), timeout, |done, remaining| {
        engine.try_write(&data[done..], remaining)
    })
}

fn accumulate<C, F>(clock: &C, len: usize, timeout: Duration, mut attempt: F) -> Result<usize, PortError>
where
    C: Clock + ?Sized,
    F: FnMut(usize, Duration) -> io::Result<Attempt>,
{
    let mut budget = Budget::new(timeout);
    let mut done = 0;

    while done < len {
        let started = clock.elapsed();
        let outcome = attempt(done, budget.remaining());
        budget.consume(clock.elapsed().saturating_sub(started));

        match outcome {
            Ok(Attempt::Transferred(n)) => done += n.min(len - done),
            Ok(Attempt::TimedOut) => {}
            Err(source) => {
                trace!(done, error = %source, "attempt failed");
                return Err(PortError::Io {
                    transferred: done,
                    source,
                });
            }
        }

        trace!(done, len, remaining_ms = budget.remaining().as_millis() as u64, "attempt finished");

        if budget.is_exhausted() {
            break;
        }
    }

    Ok(done)
}
