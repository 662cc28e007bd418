//! Loopback checks over a real null-modem cable.

use crate::require_pair;
use rs232_transport::loopback::{self, LoopbackOptions};
use rs232_transport::port::OpenFlags;
use std::time::Duration;

#[test]
#[ignore]
fn test_full_suite_without_flow_control() {
    let config = require_pair!();
    let (mut src, mut dst) = config.open("8N1", OpenFlags::NONE);

    loopback::run_all(&mut src, &mut dst, &LoopbackOptions::default()).unwrap();

    src.close().unwrap();
    dst.close().unwrap();
}

#[test]
#[ignore]
fn test_hardware_flow_control_round_trip() {
    let config = require_pair!();
    for mode in ["8E1", "8O1", "8N1"] {
        let (mut src, mut dst) = config.open(mode, OpenFlags::HW_FLOW_CONTROL);

        loopback::cts_asserted(&src, &dst).unwrap();
        loopback::round_trip(&mut src, &mut dst, &LoopbackOptions::default()).unwrap();

        src.close().unwrap();
        dst.close().unwrap();
    }
}

#[test]
#[ignore]
fn test_read_timeout_is_honored() {
    let config = require_pair!();
    let (mut src, dst) = config.open("8N1", OpenFlags::NONE);
    src.flush_rxtx().unwrap();

    let started = std::time::Instant::now();
    let mut buffer = [0u8; 16];
    let n = src.read(&mut buffer, Duration::from_millis(300)).unwrap();

    assert_eq!(n, 0);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(290), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(800), "{elapsed:?}");

    src.close().unwrap();
    dst.close().unwrap();
}

#[test]
#[ignore]
fn test_reopen_after_close() {
    let config = require_pair!();
    for _ in 0..3 {
        let (src, dst) = config.open("8N1", OpenFlags::NONE);
        src.close().unwrap();
        dst.close().unwrap();
    }
}
