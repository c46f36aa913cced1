//! Layout of the exchange region shared by the control path and the generator.
//!
//! The region is made of atomics only, so a zero-filled mapping is a valid
//! initial state: no axis configured, generator disarmed, ring empty.
//!
//! | Block          | Writer        | Reader        |
//! |----------------|---------------|---------------|
//! | `StaticConfig` | control path  | generator     |
//! | `StatusBlock`  | generator     | control path  |
//! | `CommandBlock` | control path  | generator     |
//! | `MotionRing`   | feeder (put)  | generator (get) |
//!
//! Single-word fields use relaxed ordering. The GPIO transfer sequence number
//! and the ring indices carry acquire/release ordering.

use bitflags::bitflags;
use static_assertions::{const_assert, const_assert_eq};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

use crate::consts::{MAX_AXIS, MAX_GPIO_PORTS, MAX_PWM};
use crate::shm::ring::MotionRing;

// ─── Plain values ───────────────────────────────────────────────────

/// A GPIO line addressed as port bank plus single-bit mask.
///
/// A zero mask means "not assigned".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortPin {
    /// Port bank index (`0..MAX_GPIO_PORTS`).
    pub port: u8,
    /// Bit mask inside the port word.
    pub mask: u32,
}

impl PortPin {
    /// Line that drives nothing.
    pub const UNASSIGNED: Self = Self { port: 0, mask: 0 };

    pub const fn new(port: u8, mask: u32) -> Self {
        Self { port, mask }
    }

    #[inline]
    pub const fn is_assigned(&self) -> bool {
        self.mask != 0
    }
}

/// Wiring of one generator axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisConfig {
    /// Axis takes part in pulse generation.
    pub configured: bool,
    /// Step output line.
    pub step: PortPin,
    /// Direction output line.
    pub dir: PortPin,
    /// Drive the direction line low for forward motion.
    pub dir_inverted: bool,
}

impl AxisConfig {
    /// An axis left untouched by `AXIS_SET`.
    pub const UNCONFIGURED: Self = Self {
        configured: false,
        step: PortPin::UNASSIGNED,
        dir: PortPin::UNASSIGNED,
        dir_inverted: false,
    };
}

/// Copy of the static configuration, as carried by `AXIS_SET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StaticSettings {
    /// Motion ring capacity in frames.
    pub ring_size: u32,
    /// Per-axis wiring.
    pub axes: [AxisConfig; MAX_AXIS],
    /// Scanner synchronisation output.
    pub scan: PortPin,
    /// Software PWM outputs.
    pub pwm: [PortPin; MAX_PWM],
}

// ─── Static configuration (control → generator) ─────────────────────

/// Atomic storage for one [`PortPin`].
#[derive(Debug, Default)]
#[repr(C)]
pub struct PinSlot {
    port: AtomicU32,
    mask: AtomicU32,
}

impl PinSlot {
    #[inline]
    pub fn load(&self) -> PortPin {
        PortPin {
            port: self.port.load(Ordering::Relaxed) as u8,
            mask: self.mask.load(Ordering::Relaxed),
        }
    }

    #[inline]
    pub fn store(&self, pin: PortPin) {
        self.port.store(u32::from(pin.port), Ordering::Relaxed);
        self.mask.store(pin.mask, Ordering::Relaxed);
    }
}

/// Atomic storage for one [`AxisConfig`].
#[derive(Debug, Default)]
#[repr(C)]
pub struct AxisWiring {
    configured: AtomicBool,
    dir_inverted: AtomicBool,
    step: PinSlot,
    dir: PinSlot,
}

impl AxisWiring {
    pub fn load(&self) -> AxisConfig {
        AxisConfig {
            configured: self.configured.load(Ordering::Relaxed),
            step: self.step.load(),
            dir: self.dir.load(),
            dir_inverted: self.dir_inverted.load(Ordering::Relaxed),
        }
    }

    pub fn store(&self, axis: &AxisConfig) {
        self.step.store(axis.step);
        self.dir.store(axis.dir);
        self.dir_inverted.store(axis.dir_inverted, Ordering::Relaxed);
        self.configured.store(axis.configured, Ordering::Relaxed);
    }
}

/// Static configuration block.
///
/// Written only while the generator is disarmed; the generator snapshots it
/// when it arms. The ring size lives in the [`MotionRing`] header.
#[derive(Debug, Default)]
#[repr(C, align(64))]
pub struct StaticConfig {
    pub axes: [AxisWiring; MAX_AXIS],
    pub scan: PinSlot,
    pub pwm: [PinSlot; MAX_PWM],
}

impl StaticConfig {
    /// Snapshot of wiring and PWM pins. `ring_size` is left at 0.
    pub fn load(&self) -> StaticSettings {
        StaticSettings {
            ring_size: 0,
            axes: core::array::from_fn(|i| self.axes[i].load()),
            scan: self.scan.load(),
            pwm: core::array::from_fn(|i| self.pwm[i].load()),
        }
    }
}

// ─── Status (generator → control) ───────────────────────────────────

bitflags! {
    /// Outputs touched by the generator since the control path last looked.
    ///
    /// Bits `0..MAX_GPIO_PORTS` name port banks; the upper bits name sources.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChangedOutputs: u32 {
        /// PWM channel 0 changed level.
        const PWM0     = 1 << 16;
        /// PWM channel 1 changed level.
        const PWM1     = 1 << 17;
        /// A bulk GPIO transfer was applied.
        const TRANSFER = 1 << 24;

        const _ = !0;
    }
}

impl ChangedOutputs {
    /// Mask of the per-port bits.
    pub const PORT_MASK: u32 = (1 << MAX_GPIO_PORTS) - 1;

    /// Flag for a single port bank.
    #[inline]
    pub const fn port(port: u8) -> Self {
        Self::from_bits_retain(1 << port)
    }

    /// Flag for a PWM channel.
    #[inline]
    pub const fn pwm(channel: usize) -> Self {
        Self::from_bits_retain(Self::PWM0.bits() << channel)
    }

    /// Per-port bits only.
    #[inline]
    pub const fn ports(self) -> u32 {
        self.bits() & Self::PORT_MASK
    }
}

/// Status block published by the generator every tick.
#[derive(Debug, Default)]
#[repr(C, align(64))]
pub struct StatusBlock {
    /// Ticks executed since the region was mapped.
    pub tick: AtomicU64,
    /// Last tick found the ring empty.
    pub underrun: AtomicBool,
    /// Generator is armed and driving outputs.
    pub armed: AtomicBool,
    /// Total number of underrun ticks.
    pub underrun_count: AtomicU32,
    /// Ring free space after the last pop.
    pub free_space: AtomicU32,
    /// [`ChangedOutputs`] accumulated since last [`StatusBlock::take_changed`].
    pub changed: AtomicU32,
    /// Sequence number of the last applied GPIO transfer.
    pub transfer_ack: AtomicU32,
    /// Output level of every port bank as last written.
    pub port_levels: [AtomicU32; MAX_GPIO_PORTS],
    /// Emitted steps per axis (signed).
    pub step_count: [AtomicI64; MAX_AXIS],
    /// `cmd_position - step_count` per axis.
    pub pos_error: [AtomicI64; MAX_AXIS],
}

/// Plain copy of the status block for logging and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusSnapshot {
    pub tick: u64,
    pub underrun: bool,
    pub armed: bool,
    pub underrun_count: u32,
    pub free_space: u32,
    pub changed: ChangedOutputs,
    pub step_count: [i64; MAX_AXIS],
    pub pos_error: [i64; MAX_AXIS],
}

impl StatusBlock {
    #[inline]
    pub fn step_count(&self, axis: usize) -> i64 {
        self.step_count[axis].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn pos_error(&self, axis: usize) -> i64 {
        self.pos_error[axis].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn mark_changed(&self, flags: ChangedOutputs) {
        if !flags.is_empty() {
            self.changed.fetch_or(flags.bits(), Ordering::Relaxed);
        }
    }

    /// Read and clear the changed-outputs bitmap.
    pub fn take_changed(&self) -> ChangedOutputs {
        ChangedOutputs::from_bits_retain(self.changed.swap(0, Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            tick: self.tick.load(Ordering::Relaxed),
            underrun: self.underrun.load(Ordering::Relaxed),
            armed: self.armed.load(Ordering::Relaxed),
            underrun_count: self.underrun_count.load(Ordering::Relaxed),
            free_space: self.free_space.load(Ordering::Relaxed),
            changed: ChangedOutputs::from_bits_retain(self.changed.load(Ordering::Relaxed)),
            step_count: core::array::from_fn(|i| self.step_count(i)),
            pos_error: core::array::from_fn(|i| self.pos_error(i)),
        }
    }
}

// ─── Commands (control → generator) ─────────────────────────────────

/// Command block written by the control path, read by the generator.
#[derive(Debug, Default)]
#[repr(C, align(64))]
pub struct CommandBlock {
    /// Generator should run.
    pub arm: AtomicBool,
    /// Sequence number of the posted GPIO transfer. Bumped with `Release`.
    pub transfer_seq: AtomicU32,
    /// Bits to drive high per port, valid for `transfer_seq`.
    pub gpio_set: [AtomicU32; MAX_GPIO_PORTS],
    /// Bits to drive low per port, valid for `transfer_seq`.
    pub gpio_clear: [AtomicU32; MAX_GPIO_PORTS],
    /// PWM duty per channel in percent (`0..=100`).
    pub pwm_duty: [AtomicU32; MAX_PWM],
}

impl CommandBlock {
    /// Publish a GPIO transfer and return its sequence number.
    ///
    /// The caller must not post again until the generator acknowledged the
    /// previous sequence through [`StatusBlock::transfer_ack`].
    pub fn post_transfer(
        &self,
        set: &[u32; MAX_GPIO_PORTS],
        clear: &[u32; MAX_GPIO_PORTS],
    ) -> u32 {
        for port in 0..MAX_GPIO_PORTS {
            self.gpio_set[port].store(set[port], Ordering::Relaxed);
            self.gpio_clear[port].store(clear[port], Ordering::Relaxed);
        }
        self.transfer_seq.fetch_add(1, Ordering::Release).wrapping_add(1)
    }

    /// Sequence number of a transfer not yet applied, if any.
    #[inline]
    pub fn pending_transfer(&self, acked: u32) -> Option<u32> {
        let seq = self.transfer_seq.load(Ordering::Acquire);
        (seq != acked).then_some(seq)
    }

    #[inline]
    pub fn set_pwm_duty(&self, channel: usize, percent: u32) {
        self.pwm_duty[channel].store(percent.min(100), Ordering::Relaxed);
    }
}

// ─── Whole region ───────────────────────────────────────────────────

/// Everything the control path and the generator share.
#[derive(Debug)]
#[repr(C)]
pub struct ExchangeRegion {
    pub config: StaticConfig,
    pub status: StatusBlock,
    pub command: CommandBlock,
    pub ring: MotionRing,
}

const_assert_eq!(core::mem::align_of::<StatusBlock>(), 64);
const_assert_eq!(core::mem::align_of::<CommandBlock>(), 64);
const_assert_eq!(core::mem::size_of::<PinSlot>(), 8);
const_assert!(core::mem::align_of::<ExchangeRegion>() <= 4096);
const_assert!(MAX_GPIO_PORTS <= 16);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_wiring_roundtrip() {
        let wiring = AxisWiring::default();
        assert_eq!(wiring.load(), AxisConfig::UNCONFIGURED);

        let axis = AxisConfig {
            configured: true,
            step: PortPin::new(6, 1 << 4),
            dir: PortPin::new(6, 1 << 5),
            dir_inverted: true,
        };
        wiring.store(&axis);
        assert_eq!(wiring.load(), axis);
    }

    #[test]
    fn changed_outputs_port_bits() {
        let flags = ChangedOutputs::port(0) | ChangedOutputs::port(9) | ChangedOutputs::PWM0;
        assert_eq!(flags.ports(), (1 << 0) | (1 << 9));
        assert!(flags.contains(ChangedOutputs::pwm(0)));
        assert!(!flags.contains(ChangedOutputs::pwm(1)));
    }

    #[test]
    fn take_changed_clears_bitmap() {
        let status = StatusBlock::default();
        status.mark_changed(ChangedOutputs::port(3));
        status.mark_changed(ChangedOutputs::TRANSFER);
        let taken = status.take_changed();
        assert_eq!(taken, ChangedOutputs::port(3) | ChangedOutputs::TRANSFER);
        assert!(status.take_changed().is_empty());
    }

    #[test]
    fn transfer_sequence_is_acknowledged_by_value() {
        let command = CommandBlock::default();
        assert_eq!(command.pending_transfer(0), None);

        let mut set = [0u32; MAX_GPIO_PORTS];
        set[2] = 0b1010;
        let seq = command.post_transfer(&set, &[0; MAX_GPIO_PORTS]);
        assert_eq!(seq, 1);
        assert_eq!(command.pending_transfer(0), Some(1));
        assert_eq!(command.pending_transfer(seq), None);
        assert_eq!(command.gpio_set[2].load(Ordering::Relaxed), 0b1010);
    }

    #[test]
    fn pwm_duty_is_clamped() {
        let command = CommandBlock::default();
        command.set_pwm_duty(1, 250);
        assert_eq!(command.pwm_duty[1].load(Ordering::Relaxed), 100);
    }
}
