//! Shutdown coordination.

use std::sync::{Arc, Condvar, Mutex};

/// Coordinator for graceful shutdown.
///
/// An explicit handle passed to whoever needs it (signal thread, main
/// loop, tests); there is no process-global server singleton.
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Trigger the shutdown signal. Idempotent.
    pub fn trigger(&self) {
        let (flag, condvar) = &*self.inner;
        *flag.lock().unwrap_or_else(|e| e.into_inner()) = true;
        condvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until the signal fires.
    pub fn wait(&self) {
        let (flag, condvar) = &*self.inner;
        let mut triggered = flag.lock().unwrap_or_else(|e| e.into_inner());
        while !*triggered {
            triggered = condvar.wait(triggered).unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_releases_waiter() {
        let shutdown = Shutdown::new();
        let waiter = {
            let shutdown = shutdown.clone();
            std::thread::spawn(move || shutdown.wait())
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!shutdown.is_triggered());
        shutdown.trigger();
        waiter.join().unwrap();
        assert!(shutdown.is_triggered());
    }
}
