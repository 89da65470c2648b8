//! OS signal handling.
//!
//! # Responsibilities
//! - Register handlers for SIGINT and SIGTERM
//! - Translate a signal into the shutdown trigger
//!
//! The actual teardown (thread pool stop, registry unregister, segment
//! detach) runs on the main thread after `Shutdown::wait` returns, never
//! inside a signal context.

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::lifecycle::Shutdown;

/// Spawn the signal-watching thread wired to `shutdown`.
pub fn register(shutdown: &Shutdown) -> std::io::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let shutdown = shutdown.clone();
    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                tracing::info!(signal, "Shutdown signal received");
                shutdown.trigger();
            }
        })?;
    Ok(())
}
