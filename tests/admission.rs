//! Admission-control behavior under simultaneous connections.

mod common;

use std::io::Read;
use std::net::TcpStream;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use shmgate::net::Connection;
use shmgate::pool::ConnectionHandler;

/// Handler that parks every connection until the test releases it.
struct GatedHandler {
    gate: std::sync::Mutex<mpsc::Receiver<()>>,
}

impl ConnectionHandler for GatedHandler {
    fn handle(&self, mut conn: Connection) {
        self.gate
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(10))
            .ok();
        let _ = conn.write_all(b"served");
    }
}

#[test]
fn excess_connections_closed_with_zero_bytes() {
    const CAPACITY: usize = 4;
    const EXCESS: usize = 3;

    let (release_tx, release_rx) = mpsc::channel();
    let handler = Arc::new(GatedHandler {
        gate: std::sync::Mutex::new(release_rx),
    });
    let server = common::start_with_handler(handler, CAPACITY, 1);

    // One connection occupies the single worker...
    let busy = TcpStream::connect(server.addr).unwrap();
    std::thread::sleep(Duration::from_millis(200));

    // ...the next CAPACITY fill the queue...
    let queued: Vec<TcpStream> = (0..CAPACITY)
        .map(|_| TcpStream::connect(server.addr).unwrap())
        .collect();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(server.queued(), CAPACITY);

    // ...and the k after that are rejected: immediate close, zero bytes.
    let mut rejected_with_zero_bytes = 0;
    for _ in 0..EXCESS {
        let mut stream = TcpStream::connect(server.addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut buf = Vec::new();
        match stream.read_to_end(&mut buf) {
            Ok(0) => rejected_with_zero_bytes += 1,
            other => panic!("rejected connection saw {other:?} ({} bytes)", buf.len()),
        }
    }
    assert_eq!(rejected_with_zero_bytes, EXCESS);

    // Admitted connections are eventually all served.
    for _ in 0..(CAPACITY + 1) {
        release_tx.send(()).unwrap();
    }
    for mut stream in queued.into_iter().chain(std::iter::once(busy)) {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"served");
    }

    server.shutdown();
}
