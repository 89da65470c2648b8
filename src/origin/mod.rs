//! Origin server: serves files from a document root.
//!
//! # Responsibilities
//! - Resolve request paths under the configured document root
//! - Reject directory-escape attempts with 403, before touching the disk
//! - Stream file bytes in fixed-size chunks; missing files get 404
//! - Serve `SHBUFF` requests through a shared-memory slot instead of the
//!   socket
//!
//! The response travels through a [`ResponseSink`] so the socket and the
//! shared-slot paths share every byte of the resolution logic.

use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use crate::http::engine::BodySource;
use crate::http::request::Request;
use crate::http::response::{self, ResponseSink, SocketSink, CHUNK_SIZE};
use crate::net::Connection;
use crate::shm::{SlotPool, SlotSink};

/// Method a cooperating proxy uses to request the shared-memory path.
pub const SHBUFF_METHOD: &str = "SHBUFF";

/// File-serving body source for the origin server.
pub struct OriginService {
    document_root: PathBuf,
    slots: Option<Arc<SlotPool>>,
}

impl OriginService {
    pub fn new(document_root: impl Into<PathBuf>, slots: Option<Arc<SlotPool>>) -> Self {
        Self {
            document_root: document_root.into(),
            slots,
        }
    }

    /// Write the full response for `req` into `sink`.
    fn respond(&self, req: &Request, sink: &mut dyn ResponseSink) -> io::Result<()> {
        // Escape guard runs before any filesystem access and regardless
        // of whether the target exists.
        if req.target.contains("..") || req.target.contains('~') {
            tracing::debug!(target = %req.target, "Rejected path escape attempt");
            sink.send(&response::with_body(403, "Forbidden\n"))?;
            return sink.finish();
        }

        let path = self.document_root.join(req.target.trim_start_matches('/'));
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                sink.send(&response::with_body(403, "Forbidden\n"))?;
                return sink.finish();
            }
            Err(_) => {
                tracing::debug!(path = %path.display(), "File not found");
                sink.send(&response::with_body(404, "File not found\n"))?;
                return sink.finish();
            }
        };

        sink.send(&response::head(200))?;
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            sink.send(&buf[..n])?;
        }
        sink.finish()
    }

    /// Service one `SHBUFF` request: acquire a slot, tell the consumer
    /// which one over the socket, then stream the response through it.
    fn respond_via_slot(
        &self,
        pool: &SlotPool,
        req: &Request,
        conn: &mut Connection,
    ) -> io::Result<()> {
        let id = pool
            .acquire()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        // Same-host peers share byte order; the index crosses the socket
        // in native endianness.
        let result = match conn.write_all(&(id.0 as u32).to_ne_bytes()) {
            Ok(()) => {
                let outcome = self.respond(req, &mut SlotSink::new(pool, id));
                if outcome.is_err() {
                    // A consumer is draining the slot; terminate the
                    // stream so it stops waiting for the next chunk.
                    let _ = pool.send(id, &[]);
                }
                outcome
            }
            // Consumer never learned the index, so nothing will ever
            // drain this slot. Publishing anything (even a terminator)
            // would strand it in Modified; leave it untouched and let
            // release() free it directly.
            Err(e) => Err(e),
        };
        pool.release(id);
        result
    }
}

impl BodySource for OriginService {
    fn fetch(&self, req: &Request, conn: &mut Connection) -> io::Result<()> {
        if req.method == SHBUFF_METHOD {
            match &self.slots {
                Some(pool) => return self.respond_via_slot(pool, req, conn),
                None => {
                    // Only a confused peer sends SHBUFF at an origin
                    // without a pool; never start the slot handshake.
                    return conn.write_all(&response::with_body(
                        400,
                        "Shared transport unavailable\n",
                    ));
                }
            }
        }
        let mut sink = SocketSink::new(conn.stream_mut());
        self.respond(req, &mut sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct VecSink(Vec<u8>, bool);

    impl ResponseSink for VecSink {
        fn send(&mut self, chunk: &[u8]) -> io::Result<()> {
            self.0.extend_from_slice(chunk);
            Ok(())
        }
        fn finish(&mut self) -> io::Result<()> {
            self.1 = true;
            Ok(())
        }
    }

    fn request(method: &str, target: &str) -> Request {
        Request::parse(format!("{method} {target} HTTP/1.0\r\n\r\n").as_bytes()).unwrap()
    }

    #[test]
    fn test_serves_existing_file_byte_identical() {
        let root = tempfile::tempdir().unwrap();
        let content: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::File::create(root.path().join("data.bin"))
            .unwrap()
            .write_all(&content)
            .unwrap();

        let origin = OriginService::new(root.path(), None);
        let mut sink = VecSink(Vec::new(), false);
        origin.respond(&request("GET", "/data.bin"), &mut sink).unwrap();

        let expected_head = response::head(200);
        assert_eq!(&sink.0[..expected_head.len()], &expected_head[..]);
        assert_eq!(&sink.0[expected_head.len()..], &content[..]);
        assert!(sink.1);
    }

    #[test]
    fn test_missing_file_is_404_with_body() {
        let root = tempfile::tempdir().unwrap();
        let origin = OriginService::new(root.path(), None);
        let mut sink = VecSink(Vec::new(), false);
        origin.respond(&request("GET", "/nope.txt"), &mut sink).unwrap();
        let text = String::from_utf8(sink.0).unwrap();
        assert!(text.starts_with("HTTP/1.0 404 Not Found"));
        assert!(!text.ends_with("\r\n\r\n")); // body is non-empty
    }

    #[test]
    fn test_failed_index_handshake_returns_slot_to_pool() {
        let ns = format!("origintest{}.handshake", std::process::id());
        let pool = SlotPool::open(&ns, 1, 64).unwrap();
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("f.txt"), "x").unwrap();
        let origin = OriginService::new(root.path(), None);

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::thread::spawn(move || std::net::TcpStream::connect(addr).unwrap());
        let (stream, peer) = listener.accept().unwrap();
        let _peer_stream = client.join().unwrap();
        // Writing the slot index must fail before any chunk moves.
        stream.shutdown(std::net::Shutdown::Write).unwrap();
        let mut conn = Connection::new(stream, peer);

        let result = origin.respond_via_slot(&pool, &request(SHBUFF_METHOD, "/f.txt"), &mut conn);
        assert!(result.is_err());

        // The grant was returned in full: nothing held, and the slot is
        // immediately re-acquirable.
        assert_eq!(pool.held(), 0);
        let id = pool.acquire().unwrap();
        pool.release(id);
    }

    #[test]
    fn test_escape_attempts_are_403_even_for_existing_files() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("real.txt"), "x").unwrap();
        let origin = OriginService::new(root.path(), None);

        for target in ["/../etc/passwd", "/~root/x", "/a/../real.txt"] {
            let mut sink = VecSink(Vec::new(), false);
            origin.respond(&request("GET", target), &mut sink).unwrap();
            let text = String::from_utf8(sink.0).unwrap();
            assert!(
                text.starts_with("HTTP/1.0 403 Forbidden"),
                "target {target} should be forbidden"
            );
        }
    }
}
