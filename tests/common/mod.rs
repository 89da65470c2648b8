//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shmgate::http::HttpEngine;
use shmgate::net::Listener;
use shmgate::origin::OriginService;
use shmgate::pool::{ConnectionHandler, ThreadPool};
use shmgate::shm::SlotPool;

/// A running boss/worker server bound to an ephemeral port.
pub struct TestServer {
    pool: ThreadPool,
    pub addr: SocketAddr,
}

impl TestServer {
    pub fn shutdown(mut self) {
        self.pool.shutdown();
    }

    pub fn queued(&self) -> usize {
        self.pool.queued()
    }
}

/// Start a server around an arbitrary handler.
pub fn start_with_handler(
    handler: Arc<dyn ConnectionHandler>,
    queue_capacity: usize,
    workers: usize,
) -> TestServer {
    let listener = Listener::bind(0).unwrap();
    let addr = listener.local_addr();
    let mut pool = ThreadPool::new(listener, queue_capacity, handler);
    pool.start_workers(workers);
    pool.start_accepting();
    TestServer { pool, addr }
}

/// Start a file-serving origin over `root`.
pub fn start_origin(
    root: &Path,
    slots: Option<Arc<SlotPool>>,
    queue_capacity: usize,
    workers: usize,
) -> TestServer {
    let service = Arc::new(OriginService::new(root.to_path_buf(), slots));
    start_with_handler(Arc::new(HttpEngine::new(service)), queue_capacity, workers)
}

/// Send one raw request and read the response until close.
pub fn raw_request(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(request).unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    out
}

/// GET a target, returning the full response bytes.
pub fn http_get(addr: SocketAddr, target: &str) -> Vec<u8> {
    raw_request(addr, format!("GET {target} HTTP/1.0\r\n\r\n").as_bytes())
}

/// Body bytes after the head terminator.
pub fn body_of(response: &[u8]) -> &[u8] {
    let at = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has no head terminator");
    &response[at + 4..]
}

/// Status line of a response.
pub fn status_line(response: &[u8]) -> String {
    let text = String::from_utf8_lossy(response);
    text.lines().next().unwrap_or_default().to_string()
}

/// Namespace unique to one test, so parallel tests never share segments.
pub fn unique_ns(tag: &str) -> String {
    static SEQ: AtomicUsize = AtomicUsize::new(0);
    format!(
        "it{}.{}.{}",
        std::process::id(),
        tag,
        SEQ.fetch_add(1, Ordering::Relaxed)
    )
}
