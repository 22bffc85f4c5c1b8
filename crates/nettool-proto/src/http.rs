//! HTTP/1.1 request and response records, with ordered, case-insensitive,
//! duplicate-preserving headers.
//!
//! Parsing goes through `httparse` for the start-line and header
//! tokenizing, but the records kept here retain header order and
//! duplicates exactly as received so the origin client can forward them
//! faithfully rather than through a normalizing abstraction.

use thiserror::Error;

/// Maximum number of headers parsed from a single message.
const MAX_HEADERS: usize = 64;

/// Errors from parsing an HTTP/1.1 request or response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpParseError {
    /// The buffer does not contain a complete, well-formed start line and
    /// header block.
    #[error("malformed HTTP message: {0}")]
    Malformed(String),

    /// More headers were present than [`MAX_HEADERS`] allows.
    #[error("too many headers (limit is {MAX_HEADERS})")]
    TooManyHeaders,

    /// The message was truncated before the header block terminated.
    #[error("incomplete HTTP message")]
    Incomplete,

    /// A header name or value was not valid UTF-8.
    #[error("non-UTF-8 header: {0}")]
    InvalidHeaderEncoding(String),
}

/// An ordered list of `(name, value)` header pairs.
///
/// Preserves insertion order and duplicate names; lookups are
/// case-insensitive per RFC 7230 §3.2.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList(Vec<(String, String)>);

impl HeaderList {
    /// An empty header list.
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a header, preserving any existing header of the same name.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Iterate headers in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// The first value for a header name, case-insensitive.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for a header name, in wire order, case-insensitive.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.0.iter().filter(move |(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    /// Whether any header with this name is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of header lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drop every header matching `name`, case-insensitive.
    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }
}

/// A parsed HTTP/1.1 request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Request target as sent on the wire (origin-form path + query).
    pub target: String,
    /// HTTP version minor number (0 or 1).
    pub version_minor: u8,
    /// Headers in wire order.
    pub headers: HeaderList,
    /// Request body, if any.
    pub body: Vec<u8>,
}

/// A parsed HTTP/1.1 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP version minor number (0 or 1).
    pub version_minor: u8,
    /// Status code, e.g. 200.
    pub status: u16,
    /// Reason phrase, e.g. `OK`.
    pub reason: String,
    /// Headers in wire order.
    pub headers: HeaderList,
    /// Response body, if any.
    pub body: Vec<u8>,
}

fn headers_from_parsed(raw: &[httparse::Header<'_>]) -> Result<HeaderList, HttpParseError> {
    let mut headers = HeaderList::new();
    for h in raw {
        let value = std::str::from_utf8(h.value)
            .map_err(|_| HttpParseError::InvalidHeaderEncoding(h.name.to_string()))?;
        headers.push(h.name, value);
    }
    Ok(headers)
}

/// Parse a complete HTTP/1.1 request (start line, headers, and body) from
/// `buf`. The body must already be delimited by the caller (this module
/// does not interpret `Content-Length` or `Transfer-Encoding` to find the
/// body boundary in a streaming buffer).
pub fn parse_request(buf: &[u8]) -> Result<HttpRequest, HttpParseError> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut header_storage);

    let header_len = match req.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Err(HttpParseError::Incomplete),
        Err(httparse::Error::TooManyHeaders) => return Err(HttpParseError::TooManyHeaders),
        Err(e) => return Err(HttpParseError::Malformed(e.to_string())),
    };

    let method = req.method.ok_or_else(|| HttpParseError::Malformed("missing method".into()))?;
    let target = req.path.ok_or_else(|| HttpParseError::Malformed("missing target".into()))?;
    let version_minor = req.version.ok_or_else(|| HttpParseError::Malformed("missing version".into()))?;

    Ok(HttpRequest {
        method: method.to_string(),
        target: target.to_string(),
        version_minor,
        headers: headers_from_parsed(req.headers)?,
        body: buf[header_len..].to_vec(),
    })
}

/// Parse a complete HTTP/1.1 response (status line, headers, and body)
/// from `buf`, under the same body-delimiting contract as
/// [`parse_request`].
pub fn parse_response(buf: &[u8]) -> Result<HttpResponse, HttpParseError> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut header_storage);

    let header_len = match resp.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Err(HttpParseError::Incomplete),
        Err(httparse::Error::TooManyHeaders) => return Err(HttpParseError::TooManyHeaders),
        Err(e) => return Err(HttpParseError::Malformed(e.to_string())),
    };

    let status = resp.code.ok_or_else(|| HttpParseError::Malformed("missing status".into()))?;
    let version_minor = resp.version.ok_or_else(|| HttpParseError::Malformed("missing version".into()))?;
    let reason = resp.reason.unwrap_or("").to_string();

    Ok(HttpResponse {
        version_minor,
        status,
        reason,
        headers: headers_from_parsed(resp.headers)?,
        body: buf[header_len..].to_vec(),
    })
}

/// Serialize a request back to wire bytes (start line, headers, blank
/// line, body), preserving header order and duplicates exactly.
#[must_use]
pub fn serialize_request(req: &HttpRequest) -> Vec<u8> {
    let mut out = Vec::with_capacity(req.body.len() + 256);
    out.extend_from_slice(req.method.as_bytes());
    out.push(b' ');
    out.extend_from_slice(req.target.as_bytes());
    out.extend_from_slice(format!(" HTTP/1.{}\r\n", req.version_minor).as_bytes());
    for (name, value) in req.headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&req.body);
    out
}

/// Serialize a response back to wire bytes, preserving header order and
/// duplicates exactly.
#[must_use]
pub fn serialize_response(resp: &HttpResponse) -> Vec<u8> {
    let mut out = Vec::with_capacity(resp.body.len() + 256);
    out.extend_from_slice(format!("HTTP/1.{} {} ", resp.version_minor, resp.status).as_bytes());
    out.extend_from_slice(resp.reason.as_bytes());
    out.extend_from_slice(b"\r\n");
    for (name, value) in resp.headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&resp.body);
    out
}

/// Header names that are meaningful only to a single hop and must never
/// be forwarded by a proxy (RFC 7230 §6.1, plus the historical
/// `Proxy-*` pair).
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Proxy-Authenticate",
    "Proxy-Authorization",
    "Transfer-Encoding",
    "Upgrade",
    "TE",
    "Trailer",
];

/// Remove hop-by-hop headers in place, following the set named by the
/// `Connection` header as well as the fixed [`HOP_BY_HOP_HEADERS`] list.
pub fn strip_hop_by_hop(headers: &mut HeaderList) {
    let connection_named: Vec<String> = headers
        .get_all("Connection")
        .flat_map(|v| v.split(','))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
    for name in connection_named {
        headers.remove(&name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request_preserves_header_order_and_duplicates() {
        let raw = b"GET /widgets?x=1 HTTP/1.1\r\nHost: example.com\r\nX-Trace: a\r\nX-Trace: b\r\n\r\n";
        let req = parse_request(raw).expect("parses");

        assert_eq!(req.method, "GET");
        assert_eq!(req.target, "/widgets?x=1");
        assert_eq!(req.version_minor, 1);
        assert_eq!(req.headers.get_all("x-trace").collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(req.headers.get("host"), Some("example.com"));
        assert!(req.body.is_empty());
    }

    #[test]
    fn parse_request_with_body() {
        let raw = b"POST /submit HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let req = parse_request(raw).expect("parses");
        assert_eq!(req.body, b"hello");
    }

    #[test]
    fn parse_response_round_trips_through_serialize() {
        let raw = b"HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\n\r\nnope";
        let resp = parse_response(raw).expect("parses");
        assert_eq!(resp.status, 404);
        assert_eq!(resp.reason, "Not Found");

        let wire = serialize_response(&resp);
        let reparsed = parse_response(&wire).expect("reparses");
        assert_eq!(reparsed, resp);
    }

    #[test]
    fn incomplete_request_is_reported() {
        let raw = b"GET / HTTP/1.1\r\nHost: example";
        assert_eq!(parse_request(raw), Err(HttpParseError::Incomplete));
    }

    #[test]
    fn strip_hop_by_hop_removes_fixed_and_connection_named_headers() {
        let mut headers = HeaderList::new();
        headers.push("Host", "example.com");
        headers.push("Connection", "close, X-Custom");
        headers.push("X-Custom", "drop-me");
        headers.push("Transfer-Encoding", "chunked");
        headers.push("Content-Type", "text/plain");

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.get("Host"), Some("example.com"));
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert!(!headers.contains("Connection"));
        assert!(!headers.contains("X-Custom"));
        assert!(!headers.contains("Transfer-Encoding"));
    }
}
