//! Prelude module for common re-exports.
//!
//! ```rust
//! use ministep_common::prelude::*;
//! ```

use std::time::Duration;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{
    DEFAULT_BASE_PERIOD_NS, DEFAULT_SERVO_PERIOD_NS, MAX_AXIS, MAX_GPIO_PORTS, MAX_PWM,
    RING_CAPACITY,
};

// ─── Device ─────────────────────────────────────────────────────────
pub use crate::device::{DeviceOpcode, PinMode};

// ─── Exchange region ────────────────────────────────────────────────
pub use crate::shm::exchange::{
    AxisConfig, ChangedOutputs, ExchangeRegion, PortPin, StaticSettings, StatusSnapshot,
};
pub use crate::shm::region::{RegionError, RegionMap};
pub use crate::shm::ring::{AxisCommand, Frame, RingConsumer, RingError, RingProducer};

/// Default generator base period as `Duration`.
pub const DEFAULT_BASE_PERIOD: Duration = Duration::from_nanos(DEFAULT_BASE_PERIOD_NS as u64);
