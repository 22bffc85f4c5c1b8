//! Fuzz target for `Frame::decode`.
//!
//! Exercises the Request/Response frame header parser with arbitrary byte
//! sequences. Every write to the Request characteristic reaches this path
//! straight from an untrusted BLE central, so it must never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use nettool_proto::Frame;

fuzz_target!(|data: &[u8]| {
    let _ = Frame::decode(data);
});
