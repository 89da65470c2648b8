//! Slot pool with FIFO ticket-queue acquisition.
//!
//! # Responsibilities
//! - Hold S slot segments plus one control segment
//! - Grant slots in strict arrival order across every contending thread,
//!   in this process or any attached peer process
//! - Cap concurrent holders at the physical slot count
//!
//! # Design Decisions
//! - Ticket identities come from a monotonic counter in the control
//!   segment, so they are unique across processes; a thread id would only
//!   be unique within one process
//! - The ticket ring is larger than the slot count: waiters queue beyond
//!   the capacity cap, they just are not granted until `held < S`
//! - Lock order is control mutex, then slot mutex; nothing ever takes the
//!   control mutex while holding a slot mutex

use std::io;

use crate::http::response::ResponseSink;
use crate::shm::segment::{segment_name, Segment, ShmError};
use crate::shm::slot::{Slot, SlotState};
use crate::shm::sync::{SharedCondvar, SharedMutex};

/// Waiters that fit in the ticket ring. Beyond this, `acquire` blocks
/// before drawing a ticket, so ordering among more than `TICKET_RING`
/// simultaneous callers is decided by who gets ring space first.
const TICKET_RING: usize = 128;

/// Index of a granted slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId(pub usize);

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

/// Shared layout of the control segment. All fields are guarded by the
/// embedded mutex.
#[repr(C)]
struct ControlShared {
    mutex: libc::pthread_mutex_t,
    cond: libc::pthread_cond_t,
    /// Source of ticket identities, unique across attached processes.
    next_ticket: u64,
    /// Ring indices; `head == tail` means no waiters.
    head: u64,
    tail: u64,
    /// Slots currently granted and not yet released.
    held: u32,
    _pad: u32,
    ring: [u64; TICKET_RING],
}

/// Fixed-size pool of shared-memory slots with FIFO handout.
pub struct SlotPool {
    control: Segment,
    mutex: SharedMutex,
    cond: SharedCondvar,
    slots: Vec<Slot>,
}

impl SlotPool {
    /// Create or attach to the pool for `namespace`.
    ///
    /// Every attaching process must pass the same geometry; the segments
    /// are sized on first attach.
    pub fn open(namespace: &str, slots: usize, slot_capacity: usize) -> Result<Self, ShmError> {
        let name = segment_name(namespace, "ctl");
        let control = Segment::open(&name, std::mem::size_of::<ControlShared>(), |base| unsafe {
            let shared = base as *mut ControlShared;
            (*shared).next_ticket = 0;
            (*shared).head = 0;
            (*shared).tail = 0;
            (*shared).held = 0;
            SharedMutex::init_at(std::ptr::addr_of_mut!((*shared).mutex))?;
            SharedCondvar::init_at(std::ptr::addr_of_mut!((*shared).cond))?;
            Ok(())
        })?;

        let shared = control.payload_ptr() as *mut ControlShared;
        let (mutex, cond) = unsafe {
            (
                SharedMutex::from_raw(std::ptr::addr_of_mut!((*shared).mutex)),
                SharedCondvar::from_raw(std::ptr::addr_of_mut!((*shared).cond)),
            )
        };

        let slots = (0..slots)
            .map(|i| Slot::open(namespace, i, slot_capacity))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            namespace,
            slots = slots.len(),
            slot_capacity,
            "Slot pool attached"
        );

        Ok(Self {
            control,
            mutex,
            cond,
            slots,
        })
    }

    fn ctl(&self) -> *mut ControlShared {
        self.control.payload_ptr() as *mut ControlShared
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_capacity(&self) -> usize {
        self.slots.first().map(Slot::capacity).unwrap_or(0)
    }

    /// Processes currently attached to the control segment.
    pub fn attached(&self) -> u32 {
        self.control.attached()
    }

    /// Block until this caller is granted a slot.
    ///
    /// The caller takes a ticket, queues it, and is granted only when its
    /// ticket reaches the head of the queue while fewer than S slots are
    /// held. Grant order is therefore exactly arrival order.
    pub fn acquire(&self) -> Result<SlotId, ShmError> {
        let capacity = self.slots.len() as u32;
        let mut guard = self.mutex.lock();
        let c = self.ctl();
        unsafe {
            // The ticket is drawn only once ring space exists, in the
            // same critical section as the enqueue, so ticket order and
            // queue order can never diverge.
            while (*c).tail - (*c).head >= TICKET_RING as u64 {
                self.cond.wait(&mut guard);
            }
            let ticket = (*c).next_ticket;
            (*c).next_ticket += 1;
            let tail = (*c).tail;
            (*c).ring[(tail % TICKET_RING as u64) as usize] = ticket;
            (*c).tail = tail + 1;

            while !((*c).ring[((*c).head % TICKET_RING as u64) as usize] == ticket
                && (*c).held < capacity)
            {
                self.cond.wait(&mut guard);
            }
            (*c).head += 1;
            (*c).held += 1;
        }

        // held < S guarantees a Free slot exists; claims only happen here,
        // under the control mutex.
        let index = self
            .slots
            .iter()
            .position(Slot::try_claim)
            .ok_or(ShmError::NoFreeSlot)?;

        // Wake the next eligible waiter.
        self.cond.broadcast();
        drop(guard);

        tracing::trace!(slot = index, "Slot granted");
        Ok(SlotId(index))
    }

    /// Return a slot to the pool.
    ///
    /// Waits for the consumer to drain the final chunk, frees the slot,
    /// then lowers the held count and wakes waiters.
    pub fn release(&self, id: SlotId) {
        self.slots[id.0].settle_free();

        let guard = self.mutex.lock();
        unsafe {
            (*self.ctl()).held -= 1;
        }
        self.cond.broadcast();
        drop(guard);

        tracing::trace!(slot = id.0, "Slot released");
    }

    /// Producer side: publish one chunk into a granted slot.
    pub fn send(&self, id: SlotId, chunk: &[u8]) -> Result<(), ShmError> {
        self.slots[id.0].send(chunk)
    }

    /// Consumer side: take the next chunk; empty means end-of-stream.
    pub fn recv(&self, id: SlotId) -> Result<Vec<u8>, ShmError> {
        self.slots[id.0].recv()
    }

    /// Sample one slot's state. Probe interface for tests.
    pub fn slot_state(&self, id: SlotId) -> SlotState {
        self.slots[id.0].state()
    }

    /// Slots currently held, read under the control lock.
    pub fn held(&self) -> usize {
        let _guard = self.mutex.lock();
        unsafe { (*self.ctl()).held as usize }
    }
}

/// Response sink that streams through a granted slot instead of a socket.
///
/// Splits over-capacity chunks and emits the zero-length terminator from
/// `finish`. The sink borrows the grant; releasing stays with the caller.
pub struct SlotSink<'a> {
    pool: &'a SlotPool,
    id: SlotId,
}

impl<'a> SlotSink<'a> {
    pub fn new(pool: &'a SlotPool, id: SlotId) -> Self {
        Self { pool, id }
    }
}

impl ResponseSink for SlotSink<'_> {
    fn send(&mut self, chunk: &[u8]) -> io::Result<()> {
        let capacity = self.pool.slot_capacity().max(1);
        for part in chunk.chunks(capacity) {
            self.pool
                .send(self.id, part)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        }
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.pool
            .send(self.id, &[])
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    fn unique_ns() -> String {
        static SEQ: AtomicUsize = AtomicUsize::new(0);
        format!(
            "pooltest{}.{}",
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn test_acquire_release_cycle() {
        let pool = SlotPool::open(&unique_ns(), 2, 32).unwrap();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.held(), 2);
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.held(), 0);
    }

    #[test]
    fn test_capacity_cap_blocks_third_acquirer() {
        let pool = Arc::new(SlotPool::open(&unique_ns(), 2, 32).unwrap());
        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();

        let p2 = pool.clone();
        let blocked = std::thread::spawn(move || p2.acquire().unwrap());
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(!blocked.is_finished());

        pool.release(a);
        let c = blocked.join().unwrap();
        assert_eq!(pool.held(), 2);
        pool.release(c);
    }

    #[test]
    fn test_grants_follow_arrival_order() {
        // One slot, many threads entering in a controlled order; each
        // thread writes a monotone marker when granted.
        let pool = Arc::new(SlotPool::open(&unique_ns(), 1, 32).unwrap());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let start = Arc::new(Barrier::new(2));

        let holder = pool.acquire().unwrap();

        let mut waiters = Vec::new();
        for i in 0..6 {
            let pool = pool.clone();
            let order = order.clone();
            let thread_start = start.clone();
            waiters.push(std::thread::spawn(move || {
                thread_start.wait();
                let id = pool.acquire().unwrap();
                order.lock().unwrap().push(i);
                pool.release(id);
            }));
            // Serialize arrival so ticket order is the spawn order.
            start.wait();
            std::thread::sleep(std::time::Duration::from_millis(30));
        }

        pool.release(holder);
        for w in waiters {
            w.join().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_sink_splits_and_terminates() {
        let ns = unique_ns();
        let pool = Arc::new(SlotPool::open(&ns, 1, 8).unwrap());
        let id = pool.acquire().unwrap();

        let consumer_pool = pool.clone();
        let consumer = std::thread::spawn(move || {
            let mut out = Vec::new();
            loop {
                let chunk = consumer_pool.recv(id).unwrap();
                if chunk.is_empty() {
                    break;
                }
                out.extend_from_slice(&chunk);
            }
            out
        });

        let mut sink = SlotSink::new(&pool, id);
        sink.send(b"0123456789abcdef").unwrap(); // two slot-capacity chunks
        sink.finish().unwrap();
        assert_eq!(consumer.join().unwrap(), b"0123456789abcdef");
        pool.release(id);
    }
}
