//! Minimal HTTP/1.0 machinery shared by origin and proxy.
//!
//! # Data Flow
//! ```text
//! Connection bytes
//!     → request.rs (parse head)
//!     → engine.rs (dispatch to BodySource)
//!     → response.rs (status line + body, via socket or shared slot)
//! ```

pub mod engine;
pub mod request;
pub mod response;

pub use engine::{BodySource, HttpEngine};
pub use request::{HostSpec, ParseError, Request};
pub use response::{ResponseSink, SocketSink};
