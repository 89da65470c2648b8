//! Upstream fetch over a plain socket.
//!
//! # Responsibilities
//! - Connect with a bounded timeout; a dead upstream must never park a
//!   worker indefinitely
//! - Forward the rebuilt request
//! - Read the response until the upstream closes (HTTP/1.0 has no length
//!   framing), into a growable buffer
//!
//! A timeout mid-transfer fails the whole request; the client gets a 502
//! rather than a silently truncated body.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Error type for upstream fetches.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("cannot resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        source: std::io::Error,
    },
    #[error("connect to {0} failed: {1}")]
    Connect(SocketAddr, std::io::Error),
    #[error("upstream IO failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolve `host:port` to its first address.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr, UpstreamError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|source| UpstreamError::Resolve {
            host: host.to_string(),
            port,
            source,
        })?
        .next()
        .ok_or_else(|| UpstreamError::Resolve {
            host: host.to_string(),
            port,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
        })
}

/// Open a connection with connect/send/receive timeouts applied.
pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, UpstreamError> {
    let stream =
        TcpStream::connect_timeout(&addr, timeout).map_err(|e| UpstreamError::Connect(addr, e))?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    Ok(stream)
}

/// Send `request` and read the full response until close.
pub fn fetch(
    host: &str,
    port: u16,
    request: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>, UpstreamError> {
    let addr = resolve(host, port)?;
    let mut stream = connect(addr, timeout)?;
    stream.write_all(request)?;

    let mut response = Vec::with_capacity(4096);
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => response.extend_from_slice(&buf[..n]),
            Err(e) => return Err(UpstreamError::Io(e)),
        }
    }
    Ok(response)
}
