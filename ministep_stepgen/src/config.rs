//! Configuration of the `ministep` binary.
//!
//! ```toml
//! [shared]
//! service_name = "ministep-mill"
//!
//! [components.pid]
//! num_chan = 3
//!
//! [stepgen]
//! axes = "XYZ"
//! step_per_unit = [3200.0, 3200.0, 3200.0]
//! step_pins = [0, 2, 4]
//! dir_pins = [1, 3, 5]
//!
//! [[net]]
//! source = "pid.0.output"
//! sink = "stepgen.0.cmd-pos"
//! ```
//!
//! Every section is validated once, before anything is allocated.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use ministep_common::config::{ConfigError, SharedConfig};
use ministep_common::consts::{
    DEFAULT_BASE_PERIOD_NS, DEFAULT_MAX_SIGNALS, DEFAULT_SERVO_PERIOD_NS, MAX_AXIS, MAX_PWM,
    RING_CAPACITY,
};
use ministep_hal::{ComponentsConfig, SignalType, Value};

use crate::feeder::parse_axes;

/// Whole configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct MinistepConfig {
    pub shared: SharedConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub components: ComponentsConfig,
    pub stepgen: StepgenConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub net: Vec<NetConfig>,
    #[serde(default)]
    pub setp: Vec<SetpConfig>,
}

/// `[registry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_max_signals")]
    pub max_signals: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_signals: default_max_signals(),
        }
    }
}

/// `[stepgen]` section: axis wiring and feeder behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepgenConfig {
    /// Joint letters, e.g. `"XYZ"`.
    pub axes: String,
    /// Ring size in frames; a power of two.
    #[serde(default = "default_fifo_deep")]
    pub fifo_deep: u32,
    /// Mirror axis 0 DDS events on the scan output while `scan-sync-in` is high.
    #[serde(default)]
    pub scanner_compat: bool,
    /// Servo periods between two PWM updates.
    #[serde(default = "default_io_update_period")]
    pub io_update_period: u32,
    /// Steps per machine unit, per axis.
    pub step_per_unit: Vec<f64>,
    /// Board line index of each step output.
    pub step_pins: Vec<i32>,
    /// Board line index of each direction output; -1 for none.
    pub dir_pins: Vec<i32>,
    /// Invert the direction output, per axis.
    #[serde(default)]
    pub dir_polarity: Vec<bool>,
    /// Board line index of each PWM output.
    #[serde(default)]
    pub pwm_pins: Vec<i32>,
    /// Board line index of the scan output; -1 for none.
    #[serde(default = "default_scan_pin")]
    pub scan_pin: i32,
    /// PWM input value that maps to 100 % duty.
    #[serde(default = "default_max_pwm_value")]
    pub max_pwm_value: f64,
    /// Drive a memory-mapped register file instead of simulated ports.
    #[serde(default)]
    pub register_file: Option<PathBuf>,
}

/// `[timing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_base_period_ns")]
    pub base_period_ns: u32,
    #[serde(default = "default_servo_period_ns")]
    pub servo_period_ns: u32,
    #[serde(default = "default_slow_period_ns")]
    pub slow_period_ns: u32,
    /// Pin the generator thread to this core (`rt` feature).
    #[serde(default)]
    pub cpu_core: Option<usize>,
    /// SCHED_FIFO priority of the generator thread (`rt` feature).
    #[serde(default = "default_rt_priority")]
    pub rt_priority: i32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            base_period_ns: default_base_period_ns(),
            servo_period_ns: default_servo_period_ns(),
            slow_period_ns: default_slow_period_ns(),
            cpu_core: None,
            rt_priority: default_rt_priority(),
        }
    }
}

/// `[[net]]`: link an input pin to an output pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetConfig {
    pub source: String,
    pub sink: String,
}

/// `[[setp]]`: set a parameter or an unlinked input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetpConfig {
    pub name: String,
    pub value: SetpValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SetpValue {
    Bit(bool),
    Int(i64),
    Float(f64),
}

impl SetpValue {
    /// Convert to a registry value of type `declared`.
    ///
    /// Integers widen to floats. Returns `None` for an integer that does not
    /// fit in 32 bits; other mismatches are left for the registry to reject.
    pub fn to_value(self, declared: SignalType) -> Option<Value> {
        Some(match (self, declared) {
            (Self::Bit(b), _) => Value::Bit(b),
            (Self::Int(v), SignalType::Float) => Value::Float(v as f64),
            (Self::Int(v), _) => Value::S32(i32::try_from(v).ok()?),
            (Self::Float(v), _) => Value::Float(v),
        })
    }
}

fn default_max_signals() -> usize {
    DEFAULT_MAX_SIGNALS
}
fn default_fifo_deep() -> u32 {
    RING_CAPACITY as u32
}
fn default_io_update_period() -> u32 {
    1
}
fn default_scan_pin() -> i32 {
    -1
}
fn default_max_pwm_value() -> f64 {
    10_000.0
}
fn default_base_period_ns() -> u32 {
    DEFAULT_BASE_PERIOD_NS
}
fn default_servo_period_ns() -> u32 {
    DEFAULT_SERVO_PERIOD_NS
}
fn default_slow_period_ns() -> u32 {
    10 * DEFAULT_SERVO_PERIOD_NS
}
fn default_rt_priority() -> i32 {
    80
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(msg.into())
}

impl TimingConfig {
    /// Base ticks per servo period, i.e. frames pushed per feeder call.
    pub fn frames_per_servo(&self) -> u32 {
        self.servo_period_ns / self.base_period_ns.max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_period_ns == 0 || self.servo_period_ns == 0 || self.slow_period_ns == 0 {
            return Err(invalid("timing: periods must be positive"));
        }
        if self.servo_period_ns % self.base_period_ns != 0 {
            return Err(invalid(format!(
                "timing: servo_period_ns {} is not a multiple of base_period_ns {}",
                self.servo_period_ns, self.base_period_ns
            )));
        }
        let frames = self.frames_per_servo();
        if frames as usize > RING_CAPACITY {
            return Err(invalid(format!(
                "timing: {frames} frames per servo period exceed the ring ({RING_CAPACITY})"
            )));
        }
        if !(1..=99).contains(&self.rt_priority) {
            return Err(invalid(format!(
                "timing: rt_priority {} outside 1..=99",
                self.rt_priority
            )));
        }
        Ok(())
    }
}

impl StepgenConfig {
    /// Number of axes named by `axes`.
    pub fn num_axes(&self) -> Result<usize, ConfigError> {
        parse_axes(&self.axes)
            .map(|map| map.len())
            .map_err(|e| invalid(e.to_string()))
    }

    pub fn validate(&self, timing: &TimingConfig) -> Result<(), ConfigError> {
        let axes = self.num_axes()?;
        let per_axis = [
            ("step_per_unit", self.step_per_unit.len()),
            ("step_pins", self.step_pins.len()),
            ("dir_pins", self.dir_pins.len()),
        ];
        for (field, len) in per_axis {
            if len < axes {
                return Err(invalid(format!(
                    "stepgen.{field}: {len} entries for {axes} axes"
                )));
            }
        }
        if self.dir_polarity.len() > MAX_AXIS {
            return Err(invalid("stepgen.dir_polarity: too many entries"));
        }
        if let Some(bad) = self.step_per_unit[..axes]
            .iter()
            .find(|spu| !spu.is_finite() || **spu == 0.0)
        {
            return Err(invalid(format!("stepgen.step_per_unit: invalid value {bad}")));
        }
        if self.pwm_pins.len() > MAX_PWM {
            return Err(invalid(format!(
                "stepgen.pwm_pins: at most {MAX_PWM} channels"
            )));
        }
        if !self.fifo_deep.is_power_of_two() || self.fifo_deep as usize > RING_CAPACITY {
            return Err(invalid(format!(
                "stepgen.fifo_deep {} must be a power of two up to {RING_CAPACITY}",
                self.fifo_deep
            )));
        }
        // One servo period queued while the next is pushed.
        let frames = timing.frames_per_servo();
        if self.fifo_deep < 2 * frames {
            return Err(invalid(format!(
                "stepgen.fifo_deep {} cannot hold two servo periods ({frames} frames each)",
                self.fifo_deep
            )));
        }
        if self.io_update_period == 0 {
            return Err(invalid("stepgen.io_update_period must be at least 1"));
        }
        if !(self.max_pwm_value.is_finite() && self.max_pwm_value > 0.0) {
            return Err(invalid("stepgen.max_pwm_value must be positive"));
        }
        Ok(())
    }
}

impl MinistepConfig {
    /// Validate every section. Component sections are checked again, one by
    /// one, when the components are created.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        if self.registry.max_signals == 0 {
            return Err(invalid("registry.max_signals must be positive"));
        }
        self.timing.validate()?;
        self.stepgen.validate(&self.timing)?;
        for net in &self.net {
            if net.source.trim().is_empty() || net.sink.trim().is_empty() {
                return Err(invalid("net: source and sink are required"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ministep_common::config::ConfigLoader;

    const MINIMAL: &str = r#"
        [shared]
        service_name = "test"

        [stepgen]
        axes = "xz"
        step_per_unit = [100.0, 200.0]
        step_pins = [0, 2]
        dir_pins = [1, -1]
    "#;

    #[test]
    fn defaults_fill_optional_sections() {
        let config = MinistepConfig::from_toml_str(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.registry.max_signals, DEFAULT_MAX_SIGNALS);
        assert_eq!(config.stepgen.fifo_deep, 128);
        assert_eq!(config.stepgen.scan_pin, -1);
        assert_eq!(config.timing.frames_per_servo(), 50);
        assert!(config.components.pid.is_none());
        assert!(config.net.is_empty());
    }

    #[test]
    fn setp_values_are_untagged() {
        let text = format!(
            "{MINIMAL}\n[[setp]]\nname = \"a\"\nvalue = true\n\
             [[setp]]\nname = \"b\"\nvalue = -3\n[[setp]]\nname = \"c\"\nvalue = 2.5\n"
        );
        let config = MinistepConfig::from_toml_str(&text).unwrap();
        let values: Vec<_> = config.setp.iter().map(|s| s.value).collect();
        assert_eq!(
            values,
            [SetpValue::Bit(true), SetpValue::Int(-3), SetpValue::Float(2.5)]
        );
    }

    #[test]
    fn setp_integers_follow_declared_type() {
        assert_eq!(
            SetpValue::Int(3).to_value(SignalType::Float),
            Some(Value::Float(3.0))
        );
        assert_eq!(SetpValue::Int(-7).to_value(SignalType::S32), Some(Value::S32(-7)));
        assert_eq!(SetpValue::Int(1 << 40).to_value(SignalType::S32), None);
        assert_eq!(
            SetpValue::Float(0.5).to_value(SignalType::Bit),
            Some(Value::Float(0.5))
        );
    }

    #[test]
    fn short_pin_lists_are_rejected() {
        let mut config = MinistepConfig::from_toml_str(MINIMAL).unwrap();
        config.stepgen.axes = "XYZ".into();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn ring_must_hold_two_servo_periods() {
        let mut config = MinistepConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.timing.frames_per_servo(), 50);
        assert!(config.validate().is_ok());

        // 100 frames per period leave 28 free slots after a push.
        config.timing.base_period_ns = 10_000;
        assert_eq!(config.timing.frames_per_servo(), 100);
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        config.timing.base_period_ns = 20_000;
        config.stepgen.fifo_deep = 64;
        assert!(config.validate().is_err());

        config.timing.base_period_ns = 40_000;
        assert_eq!(config.timing.frames_per_servo(), 25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn servo_period_must_be_a_multiple_of_base() {
        let mut timing = TimingConfig::default();
        timing.base_period_ns = 30_000;
        assert!(timing.validate().is_err());
    }
}
