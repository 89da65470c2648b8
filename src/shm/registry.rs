//! Shared table of locally running origin ports.
//!
//! A proxy consults this table to decide whether a destination port
//! belongs to a cooperating origin on the same host, which makes the
//! connection eligible for the shared-memory transport. The table is a
//! fixed array of ports, zero meaning empty, scanned linearly; capacity
//! is small and contention is rare.

use crate::shm::segment::{segment_name, Segment, ShmError};
use crate::shm::sync::SharedMutex;

/// Maximum number of origins one host can register.
pub const MAX_SERVERS: usize = 32;

/// Shared layout of the registry segment.
#[repr(C)]
struct RegistryShared {
    mutex: libc::pthread_mutex_t,
    ports: [u32; MAX_SERVERS],
}

/// Handle to the shared registry segment.
pub struct ServerRegistry {
    seg: Segment,
    mutex: SharedMutex,
}

impl ServerRegistry {
    /// Create or attach to the registry for `namespace`.
    pub fn open(namespace: &str) -> Result<Self, ShmError> {
        let name = segment_name(namespace, "registry");
        let seg = Segment::open(&name, std::mem::size_of::<RegistryShared>(), |base| unsafe {
            let shared = base as *mut RegistryShared;
            (*shared).ports = [0; MAX_SERVERS];
            SharedMutex::init_at(std::ptr::addr_of_mut!((*shared).mutex))?;
            Ok(())
        })?;

        let shared = seg.payload_ptr() as *mut RegistryShared;
        let mutex = unsafe { SharedMutex::from_raw(std::ptr::addr_of_mut!((*shared).mutex)) };
        Ok(Self { seg, mutex })
    }

    fn shared(&self) -> *mut RegistryShared {
        self.seg.payload_ptr() as *mut RegistryShared
    }

    /// Record an origin port. Registering an already-present port is a
    /// no-op.
    pub fn register(&self, port: u16) -> Result<(), ShmError> {
        let _guard = self.mutex.lock();
        let shared = self.shared();
        unsafe {
            let ports = &mut (*shared).ports;
            if ports.iter().any(|&p| p == port as u32) {
                return Ok(());
            }
            match ports.iter_mut().find(|p| **p == 0) {
                Some(empty) => {
                    *empty = port as u32;
                    tracing::info!(port, "Origin registered");
                    Ok(())
                }
                None => Err(ShmError::RegistryFull),
            }
        }
    }

    /// Remove an origin port; absent ports are ignored.
    pub fn unregister(&self, port: u16) {
        let _guard = self.mutex.lock();
        let shared = self.shared();
        unsafe {
            for p in (*shared).ports.iter_mut() {
                if *p == port as u32 {
                    *p = 0;
                }
            }
        }
        tracing::info!(port, "Origin unregistered");
    }

    /// Whether `port` belongs to a registered origin.
    pub fn contains(&self, port: u16) -> bool {
        let _guard = self.mutex.lock();
        let shared = self.shared();
        unsafe { (*shared).ports.iter().any(|&p| p == port as u32) }
    }

    /// Processes currently attached to the registry segment.
    pub fn attached(&self) -> u32 {
        self.seg.attached()
    }
}
