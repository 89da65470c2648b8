//! One shared-memory mailbox slot.
//!
//! A slot carries one response, one chunk at a time, from a producer (the
//! origin) to a consumer (the proxy). Its segment layout, after the
//! generic segment header, is:
//!
//! ```text
//! [state: u32][mutex][condvar][len: u32][payload bytes]
//! ```
//!
//! The state tag cycles `Free → Locked → Modified → Read → Free`.
//! `Locked` marks a claimed slot awaiting its first chunk; `send` parks
//! while the previous chunk is still `Modified` (unconsumed); `receive`
//! parks until a chunk is `Modified`. A zero-length chunk terminates the
//! stream.

use crate::shm::segment::{segment_name, Segment, ShmError};
use crate::shm::sync::{SharedCondvar, SharedMutex};

/// Per-slot state tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SlotState {
    Free = 0,
    Locked = 1,
    Modified = 2,
    Read = 3,
}

impl SlotState {
    fn from_u32(v: u32) -> Self {
        match v {
            1 => SlotState::Locked,
            2 => SlotState::Modified,
            3 => SlotState::Read,
            _ => SlotState::Free,
        }
    }
}

/// Shared layout of one slot segment. `state` and `len` are guarded by
/// the embedded mutex; the payload bytes follow this struct directly.
#[repr(C)]
struct SlotShared {
    state: u32,
    mutex: libc::pthread_mutex_t,
    cond: libc::pthread_cond_t,
    len: u32,
}

/// Handle to one slot segment.
pub struct Slot {
    seg: Segment,
    capacity: usize,
    mutex: SharedMutex,
    cond: SharedCondvar,
}

impl Slot {
    /// Create or attach to slot `index` in `namespace`.
    pub fn open(namespace: &str, index: usize, capacity: usize) -> Result<Self, ShmError> {
        let name = segment_name(namespace, &format!("slot{index}"));
        let payload = std::mem::size_of::<SlotShared>() + capacity;
        let seg = Segment::open(&name, payload, |base| unsafe {
            let shared = base as *mut SlotShared;
            (*shared).state = SlotState::Free as u32;
            (*shared).len = 0;
            SharedMutex::init_at(std::ptr::addr_of_mut!((*shared).mutex))?;
            SharedCondvar::init_at(std::ptr::addr_of_mut!((*shared).cond))?;
            Ok(())
        })?;

        let shared = seg.payload_ptr() as *mut SlotShared;
        let (mutex, cond) = unsafe {
            (
                SharedMutex::from_raw(std::ptr::addr_of_mut!((*shared).mutex)),
                SharedCondvar::from_raw(std::ptr::addr_of_mut!((*shared).cond)),
            )
        };
        Ok(Self {
            seg,
            capacity,
            mutex,
            cond,
        })
    }

    fn shared(&self) -> *mut SlotShared {
        self.seg.payload_ptr() as *mut SlotShared
    }

    fn data(&self) -> *mut u8 {
        // Payload bytes start directly after the fixed fields.
        unsafe { self.seg.payload_ptr().add(std::mem::size_of::<SlotShared>()) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sample the current state. For probes and the pool's free-slot scan.
    pub fn state(&self) -> SlotState {
        let _guard = self.mutex.lock();
        SlotState::from_u32(unsafe { (*self.shared()).state })
    }

    /// Claim the slot if it is `Free`. Only called under the pool's
    /// control lock, so claims never race each other.
    pub fn try_claim(&self) -> bool {
        let _guard = self.mutex.lock();
        let shared = self.shared();
        unsafe {
            if SlotState::from_u32((*shared).state) == SlotState::Free {
                (*shared).state = SlotState::Locked as u32;
                true
            } else {
                false
            }
        }
    }

    /// Producer side: publish one chunk, blocking while the previous one
    /// is unconsumed. A zero-length chunk signals end-of-stream.
    pub fn send(&self, chunk: &[u8]) -> Result<(), ShmError> {
        if chunk.len() > self.capacity {
            return Err(ShmError::ChunkTooLarge {
                got: chunk.len(),
                capacity: self.capacity,
            });
        }
        let mut guard = self.mutex.lock();
        let shared = self.shared();
        unsafe {
            while SlotState::from_u32((*shared).state) == SlotState::Modified {
                self.cond.wait(&mut guard);
            }
            (*shared).len = chunk.len() as u32;
            std::ptr::copy_nonoverlapping(chunk.as_ptr(), self.data(), chunk.len());
            (*shared).state = SlotState::Modified as u32;
        }
        self.cond.signal();
        Ok(())
    }

    /// Consumer side: take the next chunk, blocking until one is
    /// published. An empty result is the stream terminator.
    pub fn recv(&self) -> Result<Vec<u8>, ShmError> {
        let mut guard = self.mutex.lock();
        let shared = self.shared();
        let chunk = unsafe {
            while SlotState::from_u32((*shared).state) != SlotState::Modified {
                self.cond.wait(&mut guard);
            }
            let len = (*shared).len as usize;
            let mut buf = vec![0u8; len];
            std::ptr::copy_nonoverlapping(self.data(), buf.as_mut_ptr(), len);
            (*shared).state = SlotState::Read as u32;
            buf
        };
        self.cond.signal();
        Ok(chunk)
    }

    /// Return the slot to `Free`, waiting first for the final chunk to be
    /// consumed so the terminator is never destroyed under the consumer.
    pub fn settle_free(&self) {
        let mut guard = self.mutex.lock();
        let shared = self.shared();
        unsafe {
            while SlotState::from_u32((*shared).state) == SlotState::Modified {
                self.cond.wait(&mut guard);
            }
            (*shared).state = SlotState::Free as u32;
            (*shared).len = 0;
        }
    }
}
