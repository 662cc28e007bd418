//! Bounded retry of `open` for devices that are briefly unavailable.
//!
//! A USB serial adapter that was just closed can take a moment before the
//! OS lets it be opened again. Only [`PortError::DeviceUnavailable`] is
//! retried; every other failure is deterministic and surfaces immediately.

use super::clock::{Clock, MonotonicClock};
use super::error::PortError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_OPEN_ATTEMPTS: u32 = 15;
pub const DEFAULT_OPEN_INTERVAL: Duration = Duration::from_secs(1);

/// How many times to try, and how long to sleep between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub attempts: u32,
    /// Sleep between consecutive attempts. No sleep follows the last one.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_OPEN_ATTEMPTS,
            interval: DEFAULT_OPEN_INTERVAL,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries once and never sleeps.
    pub fn once() -> Self {
        Self {
            attempts: 1,
            interval: Duration::ZERO,
        }
    }

    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }
}

/// Call `open` until it succeeds, fails for a non-retryable reason, or the
/// policy's attempts are used up.
///
/// `open` receives the 1-based attempt number. On exhaustion the last
/// `DeviceUnavailable` error is returned.
pub fn open_with_retry<T, F>(policy: &RetryPolicy, open: F) -> Result<T, PortError>
where
    F: FnMut(u32) -> Result<T, PortError>,
{
    open_with_retry_on(policy, &MonotonicClock::new(), open)
}

/// [`open_with_retry`], sleeping between attempts on `clock`.
pub fn open_with_retry_on<T, C, F>(policy: &RetryPolicy, clock: &C, mut open: F) -> Result<T, PortError>
where
    C: Clock + ?Sized,
    F: FnMut(u32) -> Result<T, PortError>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match open(attempt) {
            Ok(port) => {
                if attempt > 1 {
                    debug!(attempt, "device became available");
                }
                return Ok(port);
            }
            Err(err) if err.is_retryable() && attempt < attempts => {
                warn!(
                    attempt,
                    attempts,
                    retry_in_ms = policy.interval.as_millis() as u64,
                    "open failed: {err}"
                );
                clock.sleep(policy.interval);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
