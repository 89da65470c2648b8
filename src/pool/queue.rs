//! Bounded FIFO of accepted-but-unhandled connections.
//!
//! # Responsibilities
//! - Hold connections between the boss thread and the workers
//! - Enforce the admission capacity: a full queue rejects, never buffers
//! - Wake exactly one worker per enqueued connection
//!
//! The queue is process-private; its lock and condition never cross a
//! process boundary.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::net::Connection;

struct QueueState {
    conns: VecDeque<Connection>,
    running: bool,
}

/// Bounded FIFO with a shutdown flag folded into the same lock, so a
/// worker can never miss the transition while parked on the condition.
pub struct RequestQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    capacity: usize,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                conns: VecDeque::with_capacity(capacity),
                running: true,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue a connection unless the queue is at capacity or shut down.
    ///
    /// On rejection the connection comes back to the caller, which closes
    /// it by dropping it. Exactly one waiting worker is signalled on
    /// success.
    pub fn try_push(&self, conn: Connection) -> Result<(), Connection> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.running || state.conns.len() >= self.capacity {
            return Err(conn);
        }
        state.conns.push_back(conn);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Dequeue the oldest connection, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue has been closed; the running flag is
    /// re-checked after every wake so a shutdown broadcast is never lost.
    pub fn pop(&self) -> Option<Connection> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if !state.running {
                return None;
            }
            if let Some(conn) = state.conns.pop_front() {
                return Some(conn);
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Close the queue and wake every parked worker.
    ///
    /// Connections still queued are dropped (closed) here; no response is
    /// owed to a client the server never started servicing.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.running = false;
        state.conns.clear();
        drop(state);
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .conns
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
