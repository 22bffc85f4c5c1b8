//! HTTP origin client: forwards a reassembled request to
//! `127.0.0.1:<http_port>` over a raw TCP connection and reads back the
//! full response.
//!
//! A raw socket plus `httparse` is used instead of a high-level HTTP
//! client so header order and duplicates survive the round trip exactly;
//! a client built for ergonomics would normalize both away.

use std::time::Duration;

use nettool_proto::{HttpRequest, HttpResponse, http};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

use crate::error::OriginError;

/// Overall budget for a single origin round trip.
pub const ORIGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Hard cap on the response body read into memory.
pub const MAX_RESPONSE_BODY: usize = 8 * 1024 * 1024;

/// Forwards `request` to the local HTTP origin on `http_port`, returning
/// its response.
///
/// `Host` is set to `localhost:<http_port>` when the central omitted it.
/// Hop-by-hop headers are stripped before the request leaves the proxy.
pub async fn forward(request: &HttpRequest, http_port: u16) -> Result<HttpResponse, OriginError> {
    timeout(ORIGIN_TIMEOUT, forward_inner(request, http_port)).await.unwrap_or(Err(
        OriginError::Timeout { budget_secs: ORIGIN_TIMEOUT.as_secs() },
    ))
}

async fn forward_inner(request: &HttpRequest, http_port: u16) -> Result<HttpResponse, OriginError> {
    let mut outgoing = request.clone();
    http::strip_hop_by_hop(&mut outgoing.headers);
    if !outgoing.headers.contains("Host") {
        outgoing.headers.push("Host", format!("localhost:{http_port}"));
    }

    let mut stream = TcpStream::connect(("127.0.0.1", http_port)).await.map_err(|e| {
        OriginError::Unreachable { port: http_port, reason: e.to_string() }
    })?;

    let wire = http::serialize_request(&outgoing);
    stream
        .write_all(&wire)
        .await
        .map_err(|e| OriginError::Unreachable { port: http_port, reason: e.to_string() })?;

    read_response(&mut stream).await
}

/// Header count cap mirroring [`nettool_proto::http`]'s own limit, used
/// here only to probe whether the header block has fully arrived yet.
const MAX_HEADERS: usize = 64;

/// Reads from `stream` until the full response (headers and, per
/// `Content-Length` or EOF, the complete body) is buffered, then parses it.
///
/// `httparse::Response::parse` reports `Status::Complete` as soon as the
/// header block's terminating blank line is seen; it says nothing about
/// the body. Stopping there would silently truncate any response whose
/// body didn't happen to land in the same read as the headers, so the
/// header-complete and body-complete conditions are tracked separately.
async fn read_response(stream: &mut TcpStream) -> Result<HttpResponse, OriginError> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    let header_len = loop {
        if let Some(n) = complete_header_len(&buf)? {
            break n;
        }

        if buf.len() > MAX_RESPONSE_BODY {
            return Err(OriginError::ResponseTooLarge { limit: MAX_RESPONSE_BODY });
        }

        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| OriginError::Unreachable { port: 0, reason: e.to_string() })?;
        if n == 0 {
            return Err(OriginError::MalformedResponse(
                "origin closed the connection before the response headers completed".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    // A response without `Content-Length` (and any chunked response, which
    // this client does not decode) is close-delimited: read until EOF.
    let target_len = content_length(&buf, header_len)?.map(|body_len| header_len + body_len);

    loop {
        if target_len.is_some_and(|target| buf.len() >= target) {
            break;
        }

        if buf.len() > MAX_RESPONSE_BODY {
            return Err(OriginError::ResponseTooLarge { limit: MAX_RESPONSE_BODY });
        }

        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| OriginError::Unreachable { port: 0, reason: e.to_string() })?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    if let Some(target) = target_len {
        buf.truncate(target.min(buf.len()));
    }

    http::parse_response(&buf).map_err(|e| OriginError::MalformedResponse(e.to_string()))
}

/// Returns the byte offset just past the header block once `buf` holds a
/// complete start line and headers, or `None` while still partial.
fn complete_header_len(buf: &[u8]) -> Result<Option<usize>, OriginError> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut header_storage);
    match resp.parse(buf) {
        Ok(httparse::Status::Complete(n)) => Ok(Some(n)),
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(OriginError::MalformedResponse(e.to_string())),
    }
}

/// Extracts `Content-Length` from the already-complete header block at
/// `buf[..header_len]`, if present.
fn content_length(buf: &[u8], header_len: usize) -> Result<Option<usize>, OriginError> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut header_storage);
    resp.parse(&buf[..header_len]).map_err(|e| OriginError::MalformedResponse(e.to_string()))?;

    resp.headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
        .map(|h| {
            std::str::from_utf8(h.value)
                .ok()
                .and_then(|s| s.trim().parse::<usize>().ok())
                .ok_or_else(|| OriginError::MalformedResponse("invalid Content-Length".to_string()))
        })
        .transpose()
}

/// Synthesize an error response for a failure that must still produce a
/// valid HTTP/1.1 reply to the central.
#[must_use]
pub fn synthesize_error(status: u16, reason: &str, body: &str) -> HttpResponse {
    let mut headers = http::HeaderList::new();
    headers.push("Content-Type", "text/plain; charset=utf-8");
    headers.push("Content-Length", body.len().to_string());
    headers.push("Connection", "close");

    HttpResponse {
        version_minor: 1,
        status,
        reason: reason.to_string(),
        headers,
        body: body.as_bytes().to_vec(),
    }
}

/// `413 Payload Too Large`, for a reassembly entry that exceeded its size
/// cap.
#[must_use]
pub fn oversize_response() -> HttpResponse {
    synthesize_error(413, "Payload Too Large", "request exceeded the 1 MiB reassembly cap")
}

/// `400 Bad Request`, for a payload that failed HTTP parsing.
#[must_use]
pub fn bad_request_response(detail: &str) -> HttpResponse {
    synthesize_error(400, "Bad Request", detail)
}

/// `502 Bad Gateway`, for an unreachable origin.
#[must_use]
pub fn bad_gateway_response() -> HttpResponse {
    synthesize_error(502, "Bad Gateway", "could not reach the local HTTP origin")
}

/// `504 Gateway Timeout`, for an origin call that exceeded its budget.
#[must_use]
pub fn gateway_timeout_response() -> HttpResponse {
    synthesize_error(504, "Gateway Timeout", "the local HTTP origin did not respond in time")
}

/// `500 Internal Server Error`, for any other internal failure.
#[must_use]
pub fn internal_error_response() -> HttpResponse {
    synthesize_error(500, "Internal Server Error", "the proxy encountered an internal error")
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    /// Reproduces the case that originally truncated the response: the
    /// status line and headers arrive in one read, the body trickles in
    /// across several more, each smaller than the `Content-Length`.
    #[tokio::test]
    async fn read_response_waits_for_full_body_split_across_reads() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("binds ephemeral port");
        let port = listener.local_addr().expect("has local addr").port();
        let body = "x".repeat(20_000);

        tokio::spawn({
            let body = body.clone();
            async move {
                let (mut stream, _) = listener.accept().await.expect("accepts");
                let mut request_buf = vec![0u8; 4096];
                let _ = stream.read(&mut request_buf).await;

                let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len());
                stream.write_all(head.as_bytes()).await.expect("writes headers");
                for chunk in body.as_bytes().chunks(1024) {
                    stream.write_all(chunk).await.expect("writes body chunk");
                }
                stream.shutdown().await.expect("shuts down");
            }
        });

        let request = HttpRequest {
            method: "GET".to_string(),
            target: "/".to_string(),
            version_minor: 1,
            headers: http::HeaderList::new(),
            body: Vec::new(),
        };

        let response = forward(&request, port).await.expect("origin reachable");
        assert_eq!(response.status, 200);
        assert_eq!(response.body.len(), body.len());
        assert_eq!(response.body, body.as_bytes());
    }

    /// When the origin omits `Content-Length` and just closes the
    /// connection, the body is whatever arrived before EOF.
    #[tokio::test]
    async fn read_response_reads_to_eof_when_content_length_absent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("binds ephemeral port");
        let port = listener.local_addr().expect("has local addr").port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accepts");
            let mut request_buf = vec![0u8; 4096];
            let _ = stream.read(&mut request_buf).await;
            stream.write_all(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\nclose-delimited").await.expect("writes");
            stream.shutdown().await.expect("shuts down");
        });

        let request = HttpRequest {
            method: "GET".to_string(),
            target: "/".to_string(),
            version_minor: 1,
            headers: http::HeaderList::new(),
            body: Vec::new(),
        };

        let response = forward(&request, port).await.expect("origin reachable");
        assert_eq!(response.body, b"close-delimited");
    }

    #[test]
    fn synthesized_responses_are_self_consistent() {
        let resp = oversize_response();
        assert_eq!(resp.status, 413);
        assert_eq!(resp.headers.get("Content-Length"), Some(resp.body.len().to_string().as_str()));
    }

    #[test]
    fn every_synthesized_kind_has_the_documented_status() {
        assert_eq!(oversize_response().status, 413);
        assert_eq!(bad_request_response("x").status, 400);
        assert_eq!(bad_gateway_response().status, 502);
        assert_eq!(gateway_timeout_response().status, 504);
        assert_eq!(internal_error_response().status, 500);
    }

    #[tokio::test]
    async fn forward_against_closed_port_yields_unreachable() {
        // Port 0 never accepts connections; exercises the error path
        // without requiring a live HTTP server in the test environment.
        let request = HttpRequest {
            method: "GET".to_string(),
            target: "/".to_string(),
            version_minor: 1,
            headers: http::HeaderList::new(),
            body: Vec::new(),
        };

        let result = forward(&request, 1).await;
        assert!(matches!(result, Err(OriginError::Unreachable { .. })));
    }
}
