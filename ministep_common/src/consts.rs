//! System-wide constants for the ministep workspace.
//!
//! Single source of truth for all numeric limits shared by the generator and
//! the control path. Imported by all crates; no duplication permitted.

/// Maximum number of step/direction axes driven by the generator.
pub const MAX_AXIS: usize = 6;

/// Maximum number of GPIO port banks addressable by the generator.
pub const MAX_GPIO_PORTS: usize = 10;

/// Physical capacity of the motion ring (frames). The configured size may be smaller.
pub const RING_CAPACITY: usize = 128;

/// Number of software PWM channels.
pub const MAX_PWM: usize = 2;

/// Number of base ticks in one software PWM period (duty resolution = 1 %).
pub const PWM_PERIOD_TICKS: u32 = 100;

/// Largest adder magnitude: bits 0–30 significant, bit 31 reserved for the
/// overflow test, giving at most one DDS event per tick.
pub const MAX_ADDER: i32 = i32::MAX;

/// One DDS event per tick corresponds to this accumulator increment (2^31).
pub const DDS_FULL_SCALE: f64 = 2_147_483_648.0;

/// Default generator base period in nanoseconds (20 µs, 50 kHz). The ring
/// holds two default servo periods at this rate.
pub const DEFAULT_BASE_PERIOD_NS: u32 = 20_000;

/// Default servo (control-rate) period in nanoseconds (1 ms).
pub const DEFAULT_SERVO_PERIOD_NS: u32 = 1_000_000;

/// Maximum length of a signal or parameter name.
pub const MAX_NAME_LEN: usize = 41;

/// Default number of signal/parameter slots in the registry arena.
pub const DEFAULT_MAX_SIGNALS: usize = 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(MAX_AXIS > 0 && MAX_AXIS <= 32);
        assert!(RING_CAPACITY.is_power_of_two());
        assert!(MAX_PWM <= 8);
        assert!(DEFAULT_SERVO_PERIOD_NS % DEFAULT_BASE_PERIOD_NS == 0);
    }

    #[test]
    fn ring_holds_two_default_servo_periods() {
        let frames = (DEFAULT_SERVO_PERIOD_NS / DEFAULT_BASE_PERIOD_NS) as usize;
        assert_eq!(frames, 50);
        assert!(RING_CAPACITY >= 2 * frames);
    }

    #[test]
    fn full_scale_matches_adder_range() {
        assert_eq!(DDS_FULL_SCALE, (MAX_ADDER as f64) + 1.0);
    }
}
