//! Port mask helpers for GPIO banks.
//!
//! A GPIO line is addressed as `(port, mask)` where `mask` has exactly one
//! bit set. Levels of a whole port are kept as a `u32` word.
//!
//! All helpers are branch-light and inline, suitable for the generator tick.

use crate::consts::MAX_GPIO_PORTS;

/// Number of lines in one port word.
pub const PORT_WIDTH: u8 = 32;

/// Mask for a single bit of a port word.
///
/// # Panics
/// Panics in debug mode if `bit >= PORT_WIDTH`.
#[inline]
pub const fn bit_mask(bit: u8) -> u32 {
    debug_assert!(bit < PORT_WIDTH);
    1u32 << bit
}

/// Recover the bit index from a single-bit mask.
///
/// Returns `None` when `mask` is zero or has more than one bit set.
#[inline]
pub const fn mask_bit(mask: u32) -> Option<u8> {
    if mask.count_ones() == 1 {
        Some(mask.trailing_zeros() as u8)
    } else {
        None
    }
}

/// Apply a set/clear pair to a port word. Clear wins over set.
#[inline]
pub const fn apply_set_clear(level: u32, set: u32, clear: u32) -> u32 {
    (level | set) & !clear
}

/// `true` if any bit of `mask` is high in `level`.
#[inline]
pub const fn is_high(level: u32, mask: u32) -> bool {
    level & mask != 0
}

/// `true` if `port` addresses an existing port bank.
#[inline]
pub const fn port_in_range(port: u8) -> bool {
    (port as usize) < MAX_GPIO_PORTS
}
