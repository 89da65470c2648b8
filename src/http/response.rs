//! Response assembly.
//!
//! HTTP/1.0 without keep-alive: the status line and a blank line, then the
//! body, and connection close marks the end. No Content-Length framing.

use std::io::{self, Write};
use std::net::TcpStream;

/// Fixed chunk size for streamed bodies.
pub const CHUNK_SIZE: usize = 4096;

/// Reason phrase for the small set of status codes this server emits.
pub fn reason(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        502 => "Bad Gateway",
        _ => "Unknown",
    }
}

/// Build the response head: status line plus the header-terminating blank
/// line.
pub fn head(code: u16) -> Vec<u8> {
    format!("HTTP/1.0 {} {}\r\n\r\n", code, reason(code)).into_bytes()
}

/// Build a complete short response with a text body.
pub fn with_body(code: u16, body: &str) -> Vec<u8> {
    let mut out = head(code);
    out.extend_from_slice(body.as_bytes());
    out
}

/// Where response bytes go: the client socket, or a shared-memory slot.
///
/// `finish` signals end-of-stream; on a socket that is a no-op because
/// close is the terminator, on a slot it sends the zero-length chunk.
pub trait ResponseSink {
    fn send(&mut self, chunk: &[u8]) -> io::Result<()>;
    fn finish(&mut self) -> io::Result<()>;
}

/// Sink writing straight to the client socket.
pub struct SocketSink<'a> {
    stream: &'a mut TcpStream,
}

impl<'a> SocketSink<'a> {
    pub fn new(stream: &'a mut TcpStream) -> Self {
        Self { stream }
    }
}

impl ResponseSink for SocketSink<'_> {
    fn send(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.stream.write_all(chunk)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_format() {
        assert_eq!(head(200), b"HTTP/1.0 200 OK\r\n\r\n");
        assert_eq!(head(404), b"HTTP/1.0 404 Not Found\r\n\r\n");
    }

    #[test]
    fn test_with_body_appends_after_blank_line() {
        let resp = with_body(403, "Forbidden path");
        let text = String::from_utf8(resp).unwrap();
        assert!(text.starts_with("HTTP/1.0 403 Forbidden\r\n\r\n"));
        assert!(text.ends_with("Forbidden path"));
    }
}
