//! Load-generating benchmark client.
//!
//! Spawns a set of request threads, holds them at a barrier so they all
//! start together, then has each perform a fixed number of GET requests
//! with bounded socket timeouts. Reports elapsed time, error count, and
//! bytes transferred. An empty or errored response counts as one error;
//! a connection the server rejected at admission reads zero bytes and
//! lands in the same bucket.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

/// Per-run parameters.
#[derive(Debug, Clone)]
pub struct LoadSpec {
    pub host: String,
    pub port: u16,
    pub file: String,
    /// Optional Host header to send, for routing through a proxy.
    pub forward_host: Option<String>,
    pub threads: usize,
    pub loops: usize,
}

/// Aggregated result of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub elapsed: Duration,
    pub errors: usize,
    pub bytes_transferred: u64,
}

const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the load and block until every thread finishes.
pub fn run(spec: &LoadSpec) -> std::io::Result<LoadReport> {
    let addr: SocketAddr = (spec.host.as_str(), spec.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "destination did not resolve")
        })?;

    let mut request = format!("GET {} HTTP/1.0\r\n", spec.file);
    if let Some(host) = &spec.forward_host {
        request.push_str(&format!("Host: {host}\r\n"));
    }
    request.push_str("\r\n");
    let request = Arc::new(request.into_bytes());

    // All threads block here until the last one is ready, so the timed
    // window covers request traffic only.
    let start_gate = Arc::new(Barrier::new(spec.threads + 1));

    let mut workers = Vec::with_capacity(spec.threads);
    for _ in 0..spec.threads {
        let request = request.clone();
        let gate = start_gate.clone();
        let loops = spec.loops;
        workers.push(std::thread::spawn(move || {
            gate.wait();
            let mut errors = 0usize;
            let mut bytes = 0u64;
            for _ in 0..loops {
                match one_request(addr, &request) {
                    Ok(0) | Err(_) => errors += 1,
                    Ok(n) => bytes += n as u64,
                }
            }
            (errors, bytes)
        }));
    }

    start_gate.wait();
    let started = Instant::now();

    let mut errors = 0;
    let mut bytes_transferred = 0;
    for worker in workers {
        let (e, b) = worker.join().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::Other, "load thread panicked")
        })?;
        errors += e;
        bytes_transferred += b;
    }
    let elapsed = started.elapsed();

    tracing::info!(
        elapsed_us = elapsed.as_micros() as u64,
        errors,
        bytes_transferred,
        "Load run finished"
    );
    Ok(LoadReport {
        elapsed,
        errors,
        bytes_transferred,
    })
}

fn one_request(addr: SocketAddr, request: &[u8]) -> std::io::Result<usize> {
    let mut stream = TcpStream::connect_timeout(&addr, SOCKET_TIMEOUT)?;
    stream.set_read_timeout(Some(SOCKET_TIMEOUT))?;
    stream.set_write_timeout(Some(SOCKET_TIMEOUT))?;
    stream.write_all(request)?;

    let mut received = 0usize;
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => received += n,
            Err(e) => return Err(e),
        }
    }
    Ok(received)
}
