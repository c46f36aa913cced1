//! Single-producer / single-consumer motion ring.
//!
//! The ring carries one [`Frame`] per generator tick. A frame holds one
//! [`AxisCommand`] for every axis so that all axes of a tick are committed
//! together.
//!
//! ## Protocol
//!
//! `put` and `get` are free-running `u32` counters; the slot of index `i`
//! is `i & (capacity - 1)`. Capacity is a power of two so the mapping stays
//! continuous across the `u32` wrap.
//!
//! - Producer: computes `free = capacity - (put - get)`, writes payload,
//!   then stores `put` with `Release`.
//! - Consumer: loads `put` with `Acquire`, reads payload, then stores `get`
//!   with `Release`.
//!
//! A batch that does not fit is rejected whole and counted; the ring never
//! overwrites unread frames. Exactly one [`RingProducer`] and one
//! [`RingConsumer`] can be alive at a time (see
//! [`RegionMap::take_producer`](crate::shm::region::RegionMap::take_producer)).

use static_assertions::{const_assert, const_assert_eq};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, Ordering};
use thiserror::Error;

use crate::consts::{MAX_ADDER, MAX_AXIS, RING_CAPACITY};
use crate::shm::region::RegionMap;

const_assert!(RING_CAPACITY.is_power_of_two());
const_assert!(RING_CAPACITY <= u32::MAX as usize / 2);

/// Motion ring errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingError {
    /// The batch does not fit into the free space; nothing was written.
    #[error("Ring backpressure: {requested} frames requested, {free} free")]
    Backpressure { requested: usize, free: u32 },

    /// Capacity must be a power of two in `1..=RING_CAPACITY`.
    #[error("Invalid ring capacity {0} (power of two up to {RING_CAPACITY} required)")]
    InvalidCapacity(u32),

    /// Capacity can only change while the ring is empty.
    #[error("Ring is not empty ({len} frames queued)")]
    NotEmpty { len: u32 },
}

// ─── Ring payload ───────────────────────────────────────────────────

/// Command for one axis for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisCommand {
    /// Phase increment magnitude (`0..=MAX_ADDER`).
    pub adder: i32,
    /// Move in the negative direction.
    pub reverse: bool,
    /// Absolute commanded position in steps.
    pub cmd_position: i64,
    /// Mirror this axis' DDS events on the scanner sync output.
    pub scan_sync: bool,
}

impl AxisCommand {
    /// Zero velocity, position 0.
    pub const IDLE: Self = Self {
        adder: 0,
        reverse: false,
        cmd_position: 0,
        scan_sync: false,
    };

    /// Build a command from a signed phase increment. Magnitude is clamped to
    /// [`MAX_ADDER`].
    pub fn from_signed(adder: i64, cmd_position: i64, scan_sync: bool) -> Self {
        let magnitude = adder.unsigned_abs().min(MAX_ADDER as u64) as i32;
        Self {
            adder: magnitude,
            reverse: adder < 0,
            cmd_position,
            scan_sync,
        }
    }

    /// Phase increment with the direction applied.
    #[inline]
    pub const fn signed_adder(&self) -> i32 {
        // A hand-built `adder` may be negative; only its magnitude counts.
        let magnitude = self.adder.saturating_abs();
        if self.reverse { -magnitude } else { magnitude }
    }
}

/// All axis commands of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Frame {
    pub axes: [AxisCommand; MAX_AXIS],
}

impl Frame {
    /// Frame with every axis idle.
    pub const IDLE: Self = Self {
        axes: [AxisCommand::IDLE; MAX_AXIS],
    };
}

const FLAG_REVERSE: u32 = 1 << 0;
const FLAG_SCAN_SYNC: u32 = 1 << 1;

/// Slot storage for one [`AxisCommand`] (16 bytes).
#[derive(Debug, Default)]
#[repr(C)]
pub struct RingEntry {
    adder: AtomicI32,
    flags: AtomicU32,
    cmd_position: AtomicI64,
}

const_assert_eq!(core::mem::size_of::<RingEntry>(), 16);

impl RingEntry {
    #[inline]
    fn write(&self, cmd: &AxisCommand) {
        let mut flags = 0;
        if cmd.reverse {
            flags |= FLAG_REVERSE;
        }
        if cmd.scan_sync {
            flags |= FLAG_SCAN_SYNC;
        }
        self.adder.store(cmd.adder, Ordering::Relaxed);
        self.flags.store(flags, Ordering::Relaxed);
        self.cmd_position.store(cmd.cmd_position, Ordering::Relaxed);
    }

    #[inline]
    fn read(&self) -> AxisCommand {
        let flags = self.flags.load(Ordering::Relaxed);
        AxisCommand {
            adder: self.adder.load(Ordering::Relaxed),
            reverse: flags & FLAG_REVERSE != 0,
            cmd_position: self.cmd_position.load(Ordering::Relaxed),
            scan_sync: flags & FLAG_SCAN_SYNC != 0,
        }
    }
}

// ─── Shared ring storage ────────────────────────────────────────────

#[derive(Debug)]
#[repr(C, align(64))]
struct ProducerLine {
    put: AtomicU32,
    rejected: AtomicU32,
}

#[derive(Debug)]
#[repr(C, align(64))]
struct ConsumerLine {
    get: AtomicU32,
}

/// Ring storage as laid out in the exchange region.
#[derive(Debug)]
#[repr(C, align(64))]
pub struct MotionRing {
    producer: ProducerLine,
    consumer: ConsumerLine,
    capacity: AtomicU32,
    slots: [[RingEntry; MAX_AXIS]; RING_CAPACITY],
}

impl MotionRing {
    /// Active capacity in frames.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Frames queued and not yet consumed.
    #[inline]
    pub fn len(&self) -> u32 {
        let get = self.consumer.get.load(Ordering::Acquire);
        let put = self.producer.put.load(Ordering::Acquire);
        put.wrapping_sub(get)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Batches rejected for lack of space since the region was mapped.
    #[inline]
    pub fn rejected(&self) -> u32 {
        self.producer.rejected.load(Ordering::Relaxed)
    }

    /// Change the active capacity.
    ///
    /// Only valid while the generator is disarmed and no producer is pushing.
    ///
    /// # Errors
    ///
    /// - `InvalidCapacity` unless `capacity` is a power of two in `1..=RING_CAPACITY`
    /// - `NotEmpty` if frames are still queued
    pub fn set_capacity(&self, capacity: u32) -> Result<(), RingError> {
        if capacity == 0 || !capacity.is_power_of_two() || capacity as usize > RING_CAPACITY {
            return Err(RingError::InvalidCapacity(capacity));
        }
        let len = self.len();
        if len != 0 {
            return Err(RingError::NotEmpty { len });
        }
        self.capacity.store(capacity, Ordering::Relaxed);
        Ok(())
    }

    /// Set the full capacity on a freshly zeroed ring.
    pub(crate) fn init(&self) {
        if self.capacity() == 0 {
            self.capacity.store(RING_CAPACITY as u32, Ordering::Relaxed);
        }
    }

    #[inline]
    fn free_from(&self, put: u32, get: u32) -> u32 {
        self.capacity().saturating_sub(put.wrapping_sub(get))
    }

    #[inline]
    fn slot(&self, index: u32) -> &[RingEntry; MAX_AXIS] {
        let mask = self.capacity().wrapping_sub(1);
        &self.slots[(index & mask) as usize]
    }
}

// ─── Producer handle ────────────────────────────────────────────────

/// Write side of the ring. Owned by the control-rate feeder.
#[derive(Debug)]
pub struct RingProducer {
    map: Arc<RegionMap>,
}

impl RingProducer {
    pub(crate) fn new(map: Arc<RegionMap>) -> Self {
        Self { map }
    }

    #[inline]
    fn ring(&self) -> &MotionRing {
        &self.map.region().ring
    }

    /// Frames that can be pushed without backpressure.
    pub fn free_space(&self) -> u32 {
        let ring = self.ring();
        let put = ring.producer.put.load(Ordering::Relaxed);
        let get = ring.consumer.get.load(Ordering::Acquire);
        ring.free_from(put, get)
    }

    /// Append a batch of frames.
    ///
    /// # Errors
    ///
    /// `Backpressure` if the batch does not fit. Nothing is written and the
    /// rejection counter is incremented.
    pub fn push(&mut self, frames: &[Frame]) -> Result<(), RingError> {
        let ring = self.ring();
        let put = ring.producer.put.load(Ordering::Relaxed);
        let get = ring.consumer.get.load(Ordering::Acquire);
        let free = ring.free_from(put, get);

        if frames.len() > free as usize {
            ring.producer.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(RingError::Backpressure {
                requested: frames.len(),
                free,
            });
        }

        for (offset, frame) in frames.iter().enumerate() {
            let slot = ring.slot(put.wrapping_add(offset as u32));
            for (entry, cmd) in slot.iter().zip(frame.axes.iter()) {
                entry.write(cmd);
            }
        }
        ring.producer
            .put
            .store(put.wrapping_add(frames.len() as u32), Ordering::Release);
        Ok(())
    }

    pub fn len(&self) -> u32 {
        self.ring().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u32 {
        self.ring().capacity()
    }

    pub fn rejected(&self) -> u32 {
        self.ring().rejected()
    }

    /// The region this producer writes into.
    pub fn region_map(&self) -> &Arc<RegionMap> {
        &self.map
    }
}

impl Drop for RingProducer {
    fn drop(&mut self) {
        self.map.release_producer();
    }
}

// ─── Consumer handle ────────────────────────────────────────────────

/// Read side of the ring. Owned by the generator.
#[derive(Debug)]
pub struct RingConsumer {
    map: Arc<RegionMap>,
}

impl RingConsumer {
    pub(crate) fn new(map: Arc<RegionMap>) -> Self {
        Self { map }
    }

    #[inline]
    fn ring(&self) -> &MotionRing {
        &self.map.region().ring
    }

    /// Take the oldest frame, or `None` when the ring is empty.
    #[inline]
    pub fn pop_for_tick(&mut self) -> Option<Frame> {
        let ring = self.ring();
        let get = ring.consumer.get.load(Ordering::Relaxed);
        let put = ring.producer.put.load(Ordering::Acquire);
        if put == get {
            return None;
        }

        let slot = ring.slot(get);
        let frame = Frame {
            axes: core::array::from_fn(|axis| slot[axis].read()),
        };
        ring.consumer
            .get
            .store(get.wrapping_add(1), Ordering::Release);
        Some(frame)
    }

    /// Drop every queued frame.
    pub fn flush(&mut self) {
        let ring = self.ring();
        let put = ring.producer.put.load(Ordering::Acquire);
        ring.consumer.get.store(put, Ordering::Release);
    }

    /// Free space as seen by the consumer, mirrored into the status block.
    #[inline]
    pub fn free_space(&self) -> u32 {
        let ring = self.ring();
        let get = ring.consumer.get.load(Ordering::Relaxed);
        let put = ring.producer.put.load(Ordering::Acquire);
        ring.free_from(put, get)
    }

    pub fn len(&self) -> u32 {
        self.ring().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The region this consumer reads from.
    pub fn region_map(&self) -> &Arc<RegionMap> {
        &self.map
    }
}

impl Drop for RingConsumer {
    fn drop(&mut self) {
        self.map.release_consumer();
    }
}
