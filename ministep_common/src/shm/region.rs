//! Page-locked mapping that hosts the [`ExchangeRegion`].
//!
//! The mapping is anonymous, prefaulted and `mlock`ed so the generator never
//! takes a page fault on it. Its length is the region size rounded up to
//! whole pages plus two guard pages, matching the length handed out by the
//! device `mmap` entry point.

use memmap2::{MmapMut, MmapOptions};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

use crate::shm::exchange::ExchangeRegion;
use crate::shm::ring::{RingConsumer, RingProducer};

/// Errors raised while mapping the exchange region.
#[derive(Debug, Error)]
pub enum RegionError {
    /// The anonymous mapping could not be created.
    #[error("Failed to map exchange region ({len} bytes): {source}")]
    Map {
        len: usize,
        #[source]
        source: std::io::Error,
    },
}

/// System page size, falling back to 4 KiB if `sysconf` fails.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

/// Length of the exchange mapping in bytes.
pub fn map_len() -> usize {
    let page = page_size();
    let size = core::mem::size_of::<ExchangeRegion>();
    size.div_ceil(page) * page + 2 * page
}

/// Owner of the exchange mapping.
///
/// Shared through `Arc` between the device, the ring handles and the
/// generator. The region itself is only reachable as `&ExchangeRegion`.
pub struct RegionMap {
    // Keeps the mapping alive; accessed only through `region`.
    _map: MmapMut,
    region: NonNull<ExchangeRegion>,
    len: usize,
    locked: bool,
    producer_taken: AtomicBool,
    consumer_taken: AtomicBool,
}

// SAFETY: `region` points into `_map`, which lives as long as `self`, and the
// region consists of atomics only.
unsafe impl Send for RegionMap {}
// SAFETY: see above; every access through `&ExchangeRegion` is atomic.
unsafe impl Sync for RegionMap {}

impl RegionMap {
    /// Map, prefault and lock a zeroed exchange region.
    ///
    /// A failed `mlock` is logged and tolerated; see [`RegionMap::is_locked`].
    ///
    /// # Errors
    ///
    /// `RegionError::Map` if the mapping cannot be created.
    pub fn open() -> Result<Arc<Self>, RegionError> {
        let len = map_len();
        let mut map = MmapOptions::new()
            .len(len)
            .populate()
            .map_anon()
            .map_err(|source| RegionError::Map { len, source })?;

        let base = map.as_mut_ptr();
        // SAFETY: `base` is non-null, page aligned and valid for `len` bytes.
        let locked = unsafe { libc::mlock(base.cast::<libc::c_void>(), len) } == 0;
        if !locked {
            warn!(
                len,
                error = %std::io::Error::last_os_error(),
                "mlock of exchange region failed, continuing unlocked"
            );
        }

        let region = NonNull::new(base.cast::<ExchangeRegion>()).ok_or_else(|| RegionError::Map {
            len,
            source: std::io::Error::other("null mapping"),
        })?;

        let this = Self {
            _map: map,
            region,
            len,
            locked,
            producer_taken: AtomicBool::new(false),
            consumer_taken: AtomicBool::new(false),
        };
        this.region().ring.init();
        debug!(len, locked, "exchange region mapped");
        Ok(Arc::new(this))
    }

    /// The shared layout.
    #[inline]
    pub fn region(&self) -> &ExchangeRegion {
        // SAFETY: the mapping is zero-initialised, large enough and aligned;
        // all-zero is a valid `ExchangeRegion` because it is made of atomics.
        unsafe { self.region.as_ref() }
    }

    /// Mapping length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the pages are locked in memory.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Claim the write side of the ring. `None` while another producer lives.
    pub fn take_producer(self: &Arc<Self>) -> Option<RingProducer> {
        self.producer_taken
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RingProducer::new(Arc::clone(self)))
    }

    /// Claim the read side of the ring. `None` while another consumer lives.
    pub fn take_consumer(self: &Arc<Self>) -> Option<RingConsumer> {
        self.consumer_taken
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RingConsumer::new(Arc::clone(self)))
    }

    pub(crate) fn release_producer(&self) {
        self.producer_taken.store(false, Ordering::Release);
    }

    pub(crate) fn release_consumer(&self) {
        self.consumer_taken.store(false, Ordering::Release);
    }
}

impl fmt::Debug for RegionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionMap")
            .field("len", &self.len)
            .field("locked", &self.locked)
            .finish_non_exhaustive()
    }
}
