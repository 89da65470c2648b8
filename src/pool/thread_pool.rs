//! Boss/worker concurrency engine.
//!
//! # Responsibilities
//! - Boss thread: accept connections, apply admission control, enqueue
//! - Worker threads: dequeue and fully service one connection at a time
//! - Ordered shutdown that leaves no thread parked and no descriptor open
//!
//! # Design Decisions
//! - Backpressure by rejection: a full queue closes the new connection
//!   immediately instead of buffering it
//! - Transient accept errors are logged and retried, never fatal
//! - Shutdown order is fixed: unblock boss, close queue, join boss,
//!   join workers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::net::Listener;
use crate::pool::queue::RequestQueue;
use crate::pool::ConnectionHandler;

/// The boss/worker thread pool servicing one listening socket.
pub struct ThreadPool {
    /// Dropped in `shutdown`, after the boss joins, so the descriptor is
    /// really closed by the time `shutdown` returns.
    listener: Option<Arc<Listener>>,
    local_addr: std::net::SocketAddr,
    queue: Arc<RequestQueue>,
    handler: Arc<dyn ConnectionHandler>,
    accepting: Arc<AtomicBool>,
    boss: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Build a pool around an already-bound listener.
    ///
    /// Binding happens before construction so a bad port fails fast
    /// instead of surfacing from inside the boss thread.
    pub fn new(
        listener: Listener,
        queue_capacity: usize,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Self {
        Self {
            local_addr: listener.local_addr(),
            listener: Some(Arc::new(listener)),
            queue: Arc::new(RequestQueue::new(queue_capacity)),
            handler,
            accepting: Arc::new(AtomicBool::new(true)),
            boss: None,
            workers: Vec::new(),
        }
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Number of connections currently queued; used by tests.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Launch `n` persistent worker threads.
    pub fn start_workers(&mut self, n: usize) {
        for i in 0..n {
            let queue = self.queue.clone();
            let handler = self.handler.clone();
            let handle = thread::Builder::new()
                .name(format!("worker-{i}"))
                .spawn(move || {
                    // pop() returns None only once the queue is closed.
                    while let Some(conn) = queue.pop() {
                        let id = conn.id();
                        tracing::debug!(%id, peer = %conn.peer_addr(), "Servicing connection");
                        handler.handle(conn);
                    }
                    tracing::debug!("Worker exiting");
                })
                .expect("failed to spawn worker thread");
            self.workers.push(handle);
        }
    }

    /// Start the boss thread: accept, admit or reject, enqueue.
    ///
    /// Must not be called after `shutdown`.
    pub fn start_accepting(&mut self) {
        let listener = self
            .listener
            .clone()
            .expect("start_accepting called after shutdown");
        let queue = self.queue.clone();
        let accepting = self.accepting.clone();
        let handle = thread::Builder::new()
            .name("boss".to_string())
            .spawn(move || {
                loop {
                    match listener.accept() {
                        Ok(conn) => {
                            if let Err(rejected) = queue.try_push(conn) {
                                tracing::debug!(
                                    id = %rejected.id(),
                                    queued = queue.len(),
                                    capacity = queue.capacity(),
                                    "Admission queue full, rejecting connection"
                                );
                                // Dropping closes the socket with nothing written.
                                drop(rejected);
                            }
                        }
                        Err(e) => {
                            if !accepting.load(Ordering::SeqCst) {
                                break;
                            }
                            // Interrupted or transient failure; keep accepting.
                            tracing::warn!(error = %e, "Accept failed, retrying");
                        }
                    }
                }
                tracing::debug!("Boss exiting");
            })
            .expect("failed to spawn boss thread");
        self.boss = Some(handle);
    }

    /// Stop all threads and release the listening socket.
    ///
    /// Ordered so nothing is left parked: (1) unblock the boss's accept,
    /// (2) close the queue and broadcast to idle workers, (3) join the
    /// boss, (4) join every worker. Blocks until all threads terminate.
    pub fn shutdown(&mut self) {
        self.accepting.store(false, Ordering::SeqCst);
        if let Some(listener) = &self.listener {
            listener.unblock();
        }

        self.queue.close();

        if let Some(boss) = self.boss.take() {
            if boss.join().is_err() {
                tracing::error!("Boss thread panicked");
            }
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }
        // The boss held the only other reference; this close is final.
        self.listener = None;
        tracing::info!("Thread pool stopped");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if self.boss.is_some() || !self.workers.is_empty() {
            self.shutdown();
        }
    }
}
