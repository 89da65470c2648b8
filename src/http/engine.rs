//! The per-connection HTTP engine.
//!
//! Reads and parses the request head, then hands the request to a
//! [`BodySource`] to produce the response. Origin and proxy are both just
//! body sources; the engine and the thread pool never know which one they
//! are running.

use std::io;
use std::sync::Arc;

use crate::http::request::Request;
use crate::http::response;
use crate::net::Connection;
use crate::pool::ConnectionHandler;

/// Capability interface implemented by the origin and the proxy.
pub trait BodySource: Send + Sync + 'static {
    /// Resolve the request and write the full response to the connection.
    fn fetch(&self, req: &Request, conn: &mut Connection) -> io::Result<()>;
}

/// Parses requests and dispatches them to the configured body source.
pub struct HttpEngine {
    source: Arc<dyn BodySource>,
}

impl HttpEngine {
    pub fn new(source: Arc<dyn BodySource>) -> Self {
        Self { source }
    }
}

impl ConnectionHandler for HttpEngine {
    fn handle(&self, mut conn: Connection) {
        let id = conn.id();
        let head = match conn.read_head() {
            Ok(head) => head,
            Err(e) => {
                tracing::debug!(%id, error = %e, "Dropping connection before request completed");
                return;
            }
        };

        let req = match Request::parse(&head) {
            Ok(req) => req,
            Err(e) => {
                tracing::debug!(%id, error = %e, "Malformed request");
                let _ = conn.write_all(&response::with_body(400, "Malformed request\n"));
                return;
            }
        };

        tracing::debug!(%id, method = %req.method, target = %req.target, "Request parsed");

        if let Err(e) = self.source.fetch(&req, &mut conn) {
            tracing::warn!(%id, target = %req.target, error = %e, "Request failed");
        }
        // Dropping the connection closes the socket; close is the
        // HTTP/1.0 end-of-body marker.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    struct EchoTarget;

    impl BodySource for EchoTarget {
        fn fetch(&self, req: &Request, conn: &mut Connection) -> io::Result<()> {
            conn.write_all(&response::with_body(200, &req.target))
        }
    }

    fn roundtrip(request: &[u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let engine = HttpEngine::new(Arc::new(EchoTarget));

        let req = request.to_vec();
        let client = thread::spawn(move || {
            let mut s = TcpStream::connect(addr).unwrap();
            s.write_all(&req).unwrap();
            let mut out = String::new();
            s.read_to_string(&mut out).unwrap();
            out
        });

        let (stream, peer) = listener.accept().unwrap();
        engine.handle(Connection::new(stream, peer));
        client.join().unwrap()
    }

    #[test]
    fn test_dispatches_to_source() {
        let out = roundtrip(b"GET /hello HTTP/1.0\r\n\r\n");
        assert!(out.starts_with("HTTP/1.0 200 OK"));
        assert!(out.ends_with("/hello"));
    }

    #[test]
    fn test_malformed_request_gets_400() {
        let out = roundtrip(b"\r\n\r\n");
        assert!(out.starts_with("HTTP/1.0 400 Bad Request"));
    }
}
