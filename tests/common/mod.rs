//! Shared test utilities for the transport tests.
//!
//! This module provides common test infrastructure including:
//! - Mock port pairs wired as a null-modem cable
//! - Handles bound to the mock's manual clock
//! - Common payload builders

#![allow(dead_code)]

use rs232_transport::port::{ManualClock, MockPort, SerialPort};
use std::time::Duration;

pub type MockHandle = SerialPort<MockPort>;

/// A handle on `mock` that measures deadlines with the mock's own clock.
pub fn handle(mock: &MockPort) -> MockHandle {
    SerialPort::from_backend(mock.clone()).with_clock(mock.clock())
}

/// Two handles joined like a null-modem cable, plus views of both mocks.
pub struct MockPair {
    pub src: MockHandle,
    pub dst: MockHandle,
    pub src_mock: MockPort,
    pub dst_mock: MockPort,
}

impl MockPair {
    pub fn new() -> Self {
        let (a, b) = MockPort::pair("MOCK-A", "MOCK-B");
        Self {
            src: handle(&a),
            dst: handle(&b),
            src_mock: a,
            dst_mock: b,
        }
    }

    pub fn clock(&self) -> ManualClock {
        self.src_mock.clock()
    }
}

/// `0, 1, 2, ...` wrapping at 256.
pub fn counting_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}
