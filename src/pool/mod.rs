//! Boss/worker thread pool and its admission queue.
//!
//! # Data Flow
//! ```text
//! listener socket
//!     → boss thread (accept, admission control)
//!     → RequestQueue (bounded FIFO)
//!     → worker thread (one connection per iteration)
//!     → ConnectionHandler (HTTP engine)
//! ```

pub mod queue;
pub mod thread_pool;

pub use queue::RequestQueue;
pub use thread_pool::ThreadPool;

use crate::net::Connection;

/// What a worker does with a dequeued connection.
///
/// Implemented by the HTTP engine; the pool itself knows nothing about
/// protocols.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Service the connection end-to-end and close it.
    fn handle(&self, conn: Connection);
}
