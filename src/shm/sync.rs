//! Process-shared synchronization primitives embedded in shared memory.
//!
//! A pthread mutex or condition variable initialized with the
//! `PTHREAD_PROCESS_SHARED` attribute works for every process that maps
//! the memory holding it, not just the one that initialized it. These
//! wrappers operate such primitives in place; they never own or move them.
//!
//! Initialization must happen exactly once per segment lifetime, from the
//! first attacher, inside [`Segment::open`]'s init closure.
//!
//! [`Segment::open`]: crate::shm::Segment::open

use crate::shm::segment::ShmError;

/// View of a process-shared mutex living in a mapped segment.
pub struct SharedMutex {
    raw: *mut libc::pthread_mutex_t,
}

unsafe impl Send for SharedMutex {}
unsafe impl Sync for SharedMutex {}

impl SharedMutex {
    /// Initialize the mutex at `raw` with process-shared attributes.
    ///
    /// # Safety
    /// `raw` must point into a mapped segment, and no other process may
    /// have initialized or be using the same memory.
    pub unsafe fn init_at(raw: *mut libc::pthread_mutex_t) -> Result<(), ShmError> {
        let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
        if libc::pthread_mutexattr_init(&mut attr) != 0 {
            return Err(ShmError::SyncInit("pthread_mutexattr_init"));
        }
        if libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED) != 0 {
            libc::pthread_mutexattr_destroy(&mut attr);
            return Err(ShmError::SyncInit("pthread_mutexattr_setpshared"));
        }
        let rc = libc::pthread_mutex_init(raw, &attr);
        libc::pthread_mutexattr_destroy(&mut attr);
        if rc != 0 {
            return Err(ShmError::SyncInit("pthread_mutex_init"));
        }
        Ok(())
    }

    /// Wrap an already-initialized mutex.
    ///
    /// # Safety
    /// `raw` must point at a mutex initialized by [`SharedMutex::init_at`]
    /// (in this or another process) and stay mapped for the wrapper's life.
    pub unsafe fn from_raw(raw: *mut libc::pthread_mutex_t) -> Self {
        Self { raw }
    }

    pub fn lock(&self) -> SharedMutexGuard<'_> {
        let rc = unsafe { libc::pthread_mutex_lock(self.raw) };
        debug_assert_eq!(rc, 0, "pthread_mutex_lock");
        SharedMutexGuard { mutex: self }
    }
}

/// Lock guard; unlocks on drop.
pub struct SharedMutexGuard<'a> {
    mutex: &'a SharedMutex,
}

impl Drop for SharedMutexGuard<'_> {
    fn drop(&mut self) {
        let rc = unsafe { libc::pthread_mutex_unlock(self.mutex.raw) };
        debug_assert_eq!(rc, 0, "pthread_mutex_unlock");
    }
}

/// View of a process-shared condition variable living in a mapped segment.
pub struct SharedCondvar {
    raw: *mut libc::pthread_cond_t,
}

unsafe impl Send for SharedCondvar {}
unsafe impl Sync for SharedCondvar {}

impl SharedCondvar {
    /// Initialize the condition variable at `raw` with process-shared
    /// attributes.
    ///
    /// # Safety
    /// Same contract as [`SharedMutex::init_at`].
    pub unsafe fn init_at(raw: *mut libc::pthread_cond_t) -> Result<(), ShmError> {
        let mut attr: libc::pthread_condattr_t = std::mem::zeroed();
        if libc::pthread_condattr_init(&mut attr) != 0 {
            return Err(ShmError::SyncInit("pthread_condattr_init"));
        }
        if libc::pthread_condattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED) != 0 {
            libc::pthread_condattr_destroy(&mut attr);
            return Err(ShmError::SyncInit("pthread_condattr_setpshared"));
        }
        let rc = libc::pthread_cond_init(raw, &attr);
        libc::pthread_condattr_destroy(&mut attr);
        if rc != 0 {
            return Err(ShmError::SyncInit("pthread_cond_init"));
        }
        Ok(())
    }

    /// Wrap an already-initialized condition variable.
    ///
    /// # Safety
    /// Same contract as [`SharedMutex::from_raw`].
    pub unsafe fn from_raw(raw: *mut libc::pthread_cond_t) -> Self {
        Self { raw }
    }

    /// Atomically release the guarded mutex and park until signalled.
    pub fn wait(&self, guard: &mut SharedMutexGuard<'_>) {
        let rc = unsafe { libc::pthread_cond_wait(self.raw, guard.mutex.raw) };
        debug_assert_eq!(rc, 0, "pthread_cond_wait");
    }

    pub fn signal(&self) {
        let rc = unsafe { libc::pthread_cond_signal(self.raw) };
        debug_assert_eq!(rc, 0, "pthread_cond_signal");
    }

    pub fn broadcast(&self) {
        let rc = unsafe { libc::pthread_cond_broadcast(self.raw) };
        debug_assert_eq!(rc, 0, "pthread_cond_broadcast");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Prims {
        mutex: libc::pthread_mutex_t,
        cond: libc::pthread_cond_t,
        value: u32,
    }

    #[test]
    fn test_wait_and_signal_within_process() {
        // Process-shared primitives still work for plain threads.
        let mut prims: Box<Prims> = Box::new(unsafe { std::mem::zeroed() });
        unsafe {
            SharedMutex::init_at(&mut prims.mutex).unwrap();
            SharedCondvar::init_at(&mut prims.cond).unwrap();
        }
        let prims = Box::leak(prims);
        let mutex = Arc::new(unsafe { SharedMutex::from_raw(&mut prims.mutex) });
        let cond = Arc::new(unsafe { SharedCondvar::from_raw(&mut prims.cond) });
        let value: *mut u32 = &mut prims.value;
        let value_addr = value as usize;

        let (m2, c2) = (mutex.clone(), cond.clone());
        let setter = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            let _g = m2.lock();
            unsafe { *(value_addr as *mut u32) = 7 };
            c2.signal();
        });

        let mut guard = mutex.lock();
        while unsafe { *(value_addr as *const u32) } != 7 {
            cond.wait(&mut guard);
        }
        drop(guard);
        setter.join().unwrap();
    }
}
