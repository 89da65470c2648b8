//! Observability subsystem.
//!
//! Structured logging only; there is no metrics endpoint in this server.

pub mod logging;

pub use logging::init_logging;
