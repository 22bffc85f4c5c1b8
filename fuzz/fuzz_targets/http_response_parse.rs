//! Fuzz target for `http::parse_response`.
//!
//! Less security-critical than the request parser (the origin is a local,
//! trusted server), but shares the same `httparse`-backed implementation
//! and the same never-panic contract.

#![no_main]

use libfuzzer_sys::fuzz_target;
use nettool_proto::http;

fuzz_target!(|data: &[u8]| {
    let _ = http::parse_response(data);
});
