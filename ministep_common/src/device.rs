//! Device request codes and pin modes.
//!
//! The generator is configured through a small request surface modelled on a
//! character device: every request carries one of the opcodes below. Odd
//! values are kept so that configuration dumps line up with the register
//! map used by the board firmware.

use std::fmt;

/// Request code accepted by the motion device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DeviceOpcode {
    /// Install per-axis wiring, PWM pins, scan pin and ring size.
    AxisSet = 1,
    /// Reserved. Frames are pushed through the ring producer.
    PushBuff = 3,
    /// Reserve a GPIO line in a given mode.
    PinConf = 7,
    /// Post a bulk GPIO set/clear transfer to the generator.
    PinTransfer = 9,
    /// Dump the active static configuration to the log.
    ScanPinSetup = 11,
    /// Change the ring capacity.
    RbSize = 13,
    /// Release a previously reserved GPIO line.
    PinFree = 15,
}

impl DeviceOpcode {
    /// Convert from the raw request code. Returns `None` for unknown codes.
    #[inline]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::AxisSet),
            3 => Some(Self::PushBuff),
            7 => Some(Self::PinConf),
            9 => Some(Self::PinTransfer),
            11 => Some(Self::ScanPinSetup),
            13 => Some(Self::RbSize),
            15 => Some(Self::PinFree),
            _ => None,
        }
    }

    /// Upper-case mnemonic used in logs.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::AxisSet => "AXIS_SET",
            Self::PushBuff => "PUSH_BUFF",
            Self::PinConf => "PIN_CONF",
            Self::PinTransfer => "PIN_TRANSFER",
            Self::ScanPinSetup => "SCAN_PIN_SETUP",
            Self::RbSize => "RB_SIZE",
            Self::PinFree => "PIN_FREE",
        }
    }
}

impl fmt::Display for DeviceOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.mnemonic(), *self as u32)
    }
}

/// Direction a GPIO line is reserved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PinMode {
    /// Line is sampled by the control path.
    #[default]
    Input = 0,
    /// Line is driven by the generator.
    Output = 1,
    /// Line belongs to a board function and must not be reassigned.
    Reserved = 2,
}

impl PinMode {
    /// Convert from raw `u8` value. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Input),
            1 => Some(Self::Output),
            2 => Some(Self::Reserved),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_values_match_register_map() {
        assert_eq!(DeviceOpcode::AxisSet as u32, 1);
        assert_eq!(DeviceOpcode::PushBuff as u32, 3);
        assert_eq!(DeviceOpcode::PinConf as u32, 7);
        assert_eq!(DeviceOpcode::PinTransfer as u32, 9);
        assert_eq!(DeviceOpcode::ScanPinSetup as u32, 11);
        assert_eq!(DeviceOpcode::RbSize as u32, 13);
        assert_eq!(DeviceOpcode::PinFree as u32, 15);
    }

    #[test]
    fn unknown_opcodes_are_rejected() {
        for code in [0u32, 2, 4, 5, 6, 8, 10, 12, 14, 16, u32::MAX] {
            assert!(DeviceOpcode::from_u32(code).is_none(), "code {code}");
        }
        for code in [1u32, 3, 7, 9, 11, 13, 15] {
            let op = DeviceOpcode::from_u32(code).unwrap();
            assert_eq!(op as u32, code);
        }
    }

    #[test]
    fn display_includes_mnemonic_and_code() {
        assert_eq!(DeviceOpcode::RbSize.to_string(), "RB_SIZE(13)");
    }

    #[test]
    fn pin_mode_from_u8() {
        assert_eq!(PinMode::from_u8(1), Some(PinMode::Output));
        assert_eq!(PinMode::from_u8(3), None);
    }
}
