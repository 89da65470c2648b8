//! Accepted-connection lifecycle.
//!
//! # Responsibilities
//! - Own exactly one socket from accept to close
//! - Generate unique connection IDs for tracing
//! - Read the request head (through the blank-line terminator)
//!
//! A connection never outlives one request/response cycle; the worker that
//! dequeues it closes it by dropping it.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global atomic counter for connection IDs.
/// Relaxed ordering is sufficient since we only need uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Upper bound on the request head. Anything larger is malformed for the
/// HTTP/1.0 subset this server speaks.
const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One accepted client connection.
///
/// Created by the boss thread on accept, owned by exactly one worker once
/// dequeued, closed when dropped.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    id: ConnectionId,
    peer: SocketAddr,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            id: ConnectionId::new(),
            peer,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Read bytes until the head terminator `\r\n\r\n` arrives.
    ///
    /// Returns everything read, including the terminator. Errors on EOF
    /// before the terminator or on an oversized head.
    pub fn read_head(&mut self) -> io::Result<Vec<u8>> {
        let mut head = Vec::with_capacity(512);
        let mut buf = [0u8; 512];
        loop {
            let n = self.stream.read(&mut buf)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before request head completed",
                ));
            }
            head.extend_from_slice(&buf[..n]);
            if head.windows(4).any(|w| w == b"\r\n\r\n") {
                return Ok(head);
            }
            if head.len() > MAX_HEAD_BYTES {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "request head exceeds limit",
                ));
            }
        }
    }

    /// Write the full buffer to the client.
    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)
    }

    /// Access the underlying stream, for response streaming.
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}
