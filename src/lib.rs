//! HTTP origin server and reverse proxy with a shared-memory fast path.
//!
//! ```text
//! listener socket → boss thread → RequestQueue → worker thread
//!     → HttpEngine → (file read | upstream fetch)
//!     → response bytes → shared slot or raw socket write
//! ```

pub mod client;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod origin;
pub mod pool;
pub mod proxy;
pub mod shm;

pub use config::GateConfig;
pub use http::HttpEngine;
pub use lifecycle::Shutdown;
pub use pool::ThreadPool;
