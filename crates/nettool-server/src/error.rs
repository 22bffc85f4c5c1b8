//! Top-level error type composing every layer's errors.
//!
//! Following the teacher's per-layer-enum-plus-composing-top-level pattern,
//! frame and HTTP parsing errors come from `nettool-proto`, reassembly
//! errors from `nettool-core`, and this crate adds `OriginError` (the HTTP
//! origin client) and `ProxyError` (the driver/executor boundary).

use thiserror::Error;

/// Failure modes when forwarding a request to the local HTTP origin.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OriginError {
    /// The connection to the origin could not be established.
    #[error("origin unreachable at 127.0.0.1:{port}: {reason}")]
    Unreachable {
        /// The configured upstream port.
        port: u16,
        /// The underlying I/O error message.
        reason: String,
    },

    /// The request/response exchange did not complete within the 10s
    /// budget.
    #[error("origin timed out after {budget_secs}s")]
    Timeout {
        /// The configured timeout, in seconds.
        budget_secs: u64,
    },

    /// The origin's response could not be parsed as HTTP/1.1.
    #[error("origin sent a malformed response: {0}")]
    MalformedResponse(String),

    /// The origin's response body exceeded the 8 MiB read cap.
    #[error("origin response body exceeded {limit} bytes")]
    ResponseTooLarge {
        /// The configured limit, in bytes.
        limit: usize,
    },
}

/// Top-level error for the proxy driver and its executor.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Error decoding a frame from the Request characteristic.
    #[error(transparent)]
    Frame(#[from] nettool_proto::FrameError),

    /// Error parsing a reassembled payload as an HTTP/1.1 request.
    #[error(transparent)]
    HttpParse(#[from] nettool_proto::HttpParseError),

    /// Error forwarding a request to the HTTP origin.
    #[error(transparent)]
    Origin(#[from] OriginError),

    /// Error from the underlying D-Bus / BlueZ object bus.
    #[error("object bus error: {0}")]
    Bus(String),

    /// Error writing the status file or advertising the service.
    #[error("lifecycle error: {0}")]
    Lifecycle(String),
}

impl From<bluer::Error> for ProxyError {
    fn from(err: bluer::Error) -> Self {
        Self::Bus(err.to_string())
    }
}
