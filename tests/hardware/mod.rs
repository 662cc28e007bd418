//! Hardware-specific tests requiring real serial devices.
//!
//! These tests are ignored by default and require actual hardware to run.
//! They should be run manually with the `--ignored` flag and the
//! `TEST_PORT`, `TEST_PEER_PORT` and optionally `TEST_BAUD` environment
//! variables set.

pub mod loopback_tests;
pub mod utils;
