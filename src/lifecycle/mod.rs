//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Load config → bind listener → attach shared segments → start pool
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGINT/SIGTERM or explicit trigger
//!     → stop accepting, drain threads
//!     → unregister port, detach segments (last detacher unlinks)
//!     → exit
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
