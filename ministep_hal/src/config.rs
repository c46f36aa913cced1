//! Load-time component configuration.
//!
//! Channel counts and debug flags are chosen once when the components are
//! created. They are validated before anything is allocated in the registry.
//!
//! ```toml
//! [components.pid]
//! num_chan = 3
//! debug = true
//! deadband_mode = "zero"
//!
//! [components.counter]
//! num_chan = 1
//!
//! [components.sim_encoder]
//! num_chan = 1
//! ```

use serde::{Deserialize, Serialize};

use crate::components::pid::DeadbandMode;
use crate::error::ComponentError;

/// Largest number of PID loops.
pub const MAX_PID_CHANNELS: u32 = 16;

/// Largest number of counter channels.
pub const MAX_COUNTER_CHANNELS: u32 = 8;

/// Largest number of simulated encoder channels.
pub const MAX_SIM_ENCODER_CHANNELS: u32 = 8;

fn default_pid_channels() -> u32 {
    3
}

fn default_one() -> u32 {
    1
}

/// PID loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidConfig {
    /// Number of loops (`1..=16`).
    #[serde(default = "default_pid_channels")]
    pub num_chan: u32,
    /// Export the internal `errorI`, `errorD`, `commandD`, `commandDD` parameters.
    #[serde(default)]
    pub debug: bool,
    /// How the deadband shapes the error.
    #[serde(default)]
    pub deadband_mode: DeadbandMode,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            num_chan: default_pid_channels(),
            debug: false,
            deadband_mode: DeadbandMode::default(),
        }
    }
}

/// Counter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterConfig {
    /// Number of channels (`1..=8`).
    #[serde(default = "default_one")]
    pub num_chan: u32,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self { num_chan: 1 }
    }
}

/// Simulated encoder settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimEncoderConfig {
    /// Number of channels (`1..=8`).
    #[serde(default = "default_one")]
    pub num_chan: u32,
}

impl Default for SimEncoderConfig {
    fn default() -> Self {
        Self { num_chan: 1 }
    }
}

/// `[components]` section. A missing sub-section disables that component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentsConfig {
    #[serde(default)]
    pub pid: Option<PidConfig>,
    #[serde(default)]
    pub counter: Option<CounterConfig>,
    #[serde(default)]
    pub sim_encoder: Option<SimEncoderConfig>,
}

fn check_channels(component: &'static str, requested: u32, max: u32) -> Result<(), ComponentError> {
    if requested == 0 || requested > max {
        return Err(ComponentError::InvalidChannelCount {
            component,
            requested,
            max,
        });
    }
    Ok(())
}

impl PidConfig {
    pub fn validate(&self) -> Result<(), ComponentError> {
        check_channels("pid", self.num_chan, MAX_PID_CHANNELS)
    }
}

impl CounterConfig {
    pub fn validate(&self) -> Result<(), ComponentError> {
        check_channels("counter", self.num_chan, MAX_COUNTER_CHANNELS)
    }
}

impl SimEncoderConfig {
    pub fn validate(&self) -> Result<(), ComponentError> {
        check_channels("sim-encoder", self.num_chan, MAX_SIM_ENCODER_CHANNELS)
    }
}

impl ComponentsConfig {
    /// Validate every configured component.
    ///
    /// Returns one result per configured component so that a bad section
    /// does not prevent the others from being set up.
    pub fn validate(&self) -> Vec<(&'static str, Result<(), ComponentError>)> {
        let mut results = Vec::with_capacity(3);
        if let Some(pid) = &self.pid {
            results.push(("pid", pid.validate()));
        }
        if let Some(counter) = &self.counter {
            results.push(("counter", counter.validate()));
        }
        if let Some(encoder) = &self.sim_encoder {
            results.push(("sim-encoder", encoder.validate()));
        }
        results
    }

    /// Number of registry slots the configured components need.
    pub fn required_slots(&self) -> usize {
        use crate::components::{counter, pid, sim_encoder};

        let pid = self
            .pid
            .as_ref()
            .map_or(0, |c| c.num_chan as usize * pid::slots_per_channel(c.debug));
        let counter = self
            .counter
            .as_ref()
            .map_or(0, |c| c.num_chan as usize * counter::SLOTS_PER_CHANNEL);
        let encoder = self
            .sim_encoder
            .as_ref()
            .map_or(0, |c| c.num_chan as usize * sim_encoder::SLOTS_PER_CHANNEL);
        pid + counter + encoder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_fields_omitted() {
        let config: ComponentsConfig = toml::from_str("[pid]\n[counter]\n").unwrap();
        let pid = config.pid.unwrap();
        assert_eq!(pid.num_chan, 3);
        assert!(!pid.debug);
        assert_eq!(pid.deadband_mode, DeadbandMode::Zero);
        assert_eq!(config.counter.unwrap().num_chan, 1);
        assert!(config.sim_encoder.is_none());
    }

    #[test]
    fn channel_limits() {
        let ok = PidConfig {
            num_chan: 16,
            ..PidConfig::default()
        };
        assert!(ok.validate().is_ok());

        let too_many = PidConfig {
            num_chan: 17,
            ..PidConfig::default()
        };
        assert_eq!(
            too_many.validate(),
            Err(ComponentError::InvalidChannelCount {
                component: "pid",
                requested: 17,
                max: 16
            })
        );
        assert!(CounterConfig { num_chan: 0 }.validate().is_err());
        assert!(SimEncoderConfig { num_chan: 9 }.validate().is_err());
    }

    #[test]
    fn one_bad_section_does_not_hide_the_others() {
        let config = ComponentsConfig {
            pid: Some(PidConfig {
                num_chan: 0,
                ..PidConfig::default()
            }),
            counter: Some(CounterConfig::default()),
            sim_encoder: None,
        };
        let results = config.validate();
        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_err());
        assert!(results[1].1.is_ok());
    }

    #[test]
    fn deadband_mode_parses_lowercase() {
        let pid: PidConfig = toml::from_str("deadband_mode = \"subtract\"").unwrap();
        assert_eq!(pid.deadband_mode, DeadbandMode::Subtract);
    }
}
