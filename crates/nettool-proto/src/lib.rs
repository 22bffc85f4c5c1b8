//! Wire framing and HTTP/1.1 message types shared between the NetTool BLE
//! proxy's GATT server and its HTTP origin client.
//!
//! This crate has no knowledge of D-Bus, BlueZ, or Tokio. It is pure data:
//! the 17-byte frame prefix used on both the Request and Response
//! characteristics (`frame`), and the HTTP/1.1 request/response records
//! reassembled frames are parsed into and serialized back out of (`http`).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod frame;
pub mod http;

pub use frame::{CorrelationId, Frame, FrameError, FrameFlags};
pub use http::{HeaderList, HttpParseError, HttpRequest, HttpResponse};
