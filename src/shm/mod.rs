//! Shared-memory transport between a proxy and an origin on one host.
//!
//! # Data Flow
//! ```text
//! origin worker                         proxy worker
//!     acquire() ──────── SlotPool ───────── (slot index over socket)
//!     send(chunk)  →  slot segment  →  recv() → chunk
//!     send(&[])    →  end-of-stream →  recv() → empty
//!     release()
//! ```
//!
//! # Design Decisions
//! - One POSIX segment per slot plus one control segment and one registry
//!   segment, all under a configurable namespace
//! - Synchronization primitives live inside the segments themselves, so
//!   any attaching process can operate them; the first attacher
//!   initializes them with process-shared attributes
//! - Teardown is attachment-counted: only the last detacher unlinks

pub mod pool;
pub mod registry;
pub mod segment;
pub mod slot;
pub mod sync;

pub use pool::{SlotId, SlotPool, SlotSink};
pub use registry::{ServerRegistry, MAX_SERVERS};
pub use segment::{Segment, ShmError};
pub use slot::{Slot, SlotState};
