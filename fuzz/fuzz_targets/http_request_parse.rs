//! Fuzz target for `http::parse_request`.
//!
//! A reassembled request body is attacker-controlled: it is whatever a BLE
//! central chose to frame, byte for byte. Malformed request lines, header
//! lines without a colon, and truncated messages must all surface as
//! `HttpParseError`, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use nettool_proto::http;

fuzz_target!(|data: &[u8]| {
    let _ = http::parse_request(data);
});
