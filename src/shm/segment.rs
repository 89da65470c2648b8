//! POSIX shared-memory segments with create-or-attach semantics.
//!
//! # Responsibilities
//! - `shm_open` + `ftruncate` + `mmap` a named segment
//! - Run one-time initialization in whichever process attaches first
//! - Track the attachment count; the last detacher unlinks the name
//!
//! Every segment starts with a [`SegmentHeader`]: an init gate and an
//! attach counter. `ftruncate` zero-fills new segments, so a raw gate
//! value of 0 reliably marks an uninitialized segment.

use std::ffi::CString;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Error type for the shared-memory transport.
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    #[error("shm_open({name}) failed: {source}")]
    Open { name: String, source: io::Error },
    #[error("ftruncate({name}) failed: {source}")]
    Size { name: String, source: io::Error },
    #[error("mmap({name}) failed: {source}")]
    Map { name: String, source: io::Error },
    #[error("segment {0} was created by an incompatible peer")]
    BadMagic(String),
    #[error("segment {0} never finished initializing")]
    InitTimeout(String),
    #[error("process-shared primitive init failed: {0}")]
    SyncInit(&'static str),
    #[error("chunk of {got} bytes exceeds slot capacity {capacity}")]
    ChunkTooLarge { got: usize, capacity: usize },
    #[error("slot accounting inconsistent: no free slot below capacity")]
    NoFreeSlot,
    #[error("server registry is full")]
    RegistryFull,
}

const SEGMENT_MAGIC: u32 = 0x5347_4154; // "SGAT"

const INIT_RAW: u32 = 0;
const INIT_IN_PROGRESS: u32 = 1;
const INIT_READY: u32 = 2;

/// How long an attacher will wait for the creator to finish initializing.
const INIT_WAIT: Duration = Duration::from_secs(5);

/// Lives at offset 0 of every segment.
#[repr(C)]
struct SegmentHeader {
    magic: AtomicU32,
    init: AtomicU32,
    attached: AtomicU32,
    _pad: u32,
}

/// A mapped shared-memory segment.
///
/// Dropping detaches; the process that drops the last attachment also
/// unlinks the name so the kernel can reclaim the memory.
pub struct Segment {
    ptr: *mut u8,
    total: usize,
    name: CString,
    /// Whether this handle has been counted in the header; only then may
    /// drop decrement and possibly unlink.
    counted: bool,
}

// The raw pointer targets shared memory that outlives any borrow handed
// out; cross-thread access is guarded by the embedded primitives.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Create or attach to the named segment with `payload` usable bytes.
    ///
    /// `init` runs exactly once per segment lifetime, in whichever process
    /// attaches first, and is where embedded synchronization primitives
    /// must be initialized with process-shared attributes.
    pub fn open<F>(name: &str, payload: usize, init: F) -> Result<Self, ShmError>
    where
        F: FnOnce(*mut u8) -> Result<(), ShmError>,
    {
        let total = std::mem::size_of::<SegmentHeader>() + payload;
        let c_name = CString::new(name).map_err(|_| ShmError::Open {
            name: name.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "segment name contains NUL"),
        })?;

        let ptr = unsafe {
            let fd = libc::shm_open(c_name.as_ptr(), libc::O_CREAT | libc::O_RDWR, 0o600);
            if fd < 0 {
                return Err(ShmError::Open {
                    name: name.to_string(),
                    source: io::Error::last_os_error(),
                });
            }
            if libc::ftruncate(fd, total as libc::off_t) < 0 {
                let source = io::Error::last_os_error();
                libc::close(fd);
                return Err(ShmError::Size {
                    name: name.to_string(),
                    source,
                });
            }
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                total,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            );
            libc::close(fd);
            if ptr == libc::MAP_FAILED {
                return Err(ShmError::Map {
                    name: name.to_string(),
                    source: io::Error::last_os_error(),
                });
            }
            ptr as *mut u8
        };

        let mut seg = Self {
            ptr,
            total,
            name: c_name,
            counted: false,
        };

        let header = seg.header();
        match header.init.compare_exchange(
            INIT_RAW,
            INIT_IN_PROGRESS,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                // This process attached first and owns initialization.
                if let Err(e) = init(seg.payload_ptr()) {
                    // The gate is stuck at in-progress; take the name
                    // with us so later attachers start from scratch.
                    unsafe { libc::shm_unlink(seg.name.as_ptr()) };
                    return Err(e);
                }
                header.magic.store(SEGMENT_MAGIC, Ordering::Release);
                header.init.store(INIT_READY, Ordering::Release);
                tracing::debug!(segment = name, "Initialized shared segment");
            }
            Err(_) => {
                // Another process got there first; wait for it to finish.
                let deadline = Instant::now() + INIT_WAIT;
                while header.init.load(Ordering::Acquire) != INIT_READY {
                    if Instant::now() > deadline {
                        return Err(ShmError::InitTimeout(name.to_string()));
                    }
                    std::thread::yield_now();
                }
                if header.magic.load(Ordering::Acquire) != SEGMENT_MAGIC {
                    return Err(ShmError::BadMagic(name.to_string()));
                }
                tracing::debug!(segment = name, "Attached to shared segment");
            }
        }

        header.attached.fetch_add(1, Ordering::AcqRel);
        seg.counted = true;
        Ok(seg)
    }

    fn header(&self) -> &SegmentHeader {
        // Safety: the mapping is at least header-sized and lives as long
        // as self.
        unsafe { &*(self.ptr as *const SegmentHeader) }
    }

    /// Start of the caller-usable bytes, after the header.
    pub fn payload_ptr(&self) -> *mut u8 {
        unsafe { self.ptr.add(std::mem::size_of::<SegmentHeader>()) }
    }

    /// Current number of attached processes.
    pub fn attached(&self) -> u32 {
        self.header().attached.load(Ordering::Acquire)
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        let last = self.counted && self.header().attached.fetch_sub(1, Ordering::AcqRel) == 1;
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.total);
            if last {
                libc::shm_unlink(self.name.as_ptr());
            }
        }
    }
}

/// Segment name for one component of a namespaced deployment.
pub fn segment_name(namespace: &str, component: &str) -> String {
    format!("/shmgate.{namespace}.{component}")
}
