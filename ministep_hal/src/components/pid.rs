//! PID loop with deadband, per-term limits, anti-windup and feed-forward.
//!
//! Every limit uses 0 as "unlimited". The integrator does not accumulate
//! while the previous output was saturated in the direction of the error,
//! and is held at zero while the loop is disabled. A disabled loop outputs
//! exactly 0.
//!
//! ```text
//! output = bias + Pgain·e + Igain·∫e + Dgain·de/dt
//!        + FF0·cmd + FF1·dcmd/dt + FF2·d²cmd/dt²
//! ```

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::components::guard_period;
use crate::config::PidConfig;
use crate::error::ComponentError;
use crate::registry::{ParamAccess, PinDirection, Registry, SignalHandle, SignalType};
use crate::thread::RtFunction;

/// How errors inside and outside the deadband are shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadbandMode {
    /// Inside the band the error is 0; outside it passes unchanged.
    #[default]
    Zero,
    /// Inside the band the error is 0; outside it is moved toward 0 by the band width.
    Subtract,
}

/// Tunable parameters of one loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidParams {
    pub deadband: f64,
    pub max_error: f64,
    pub max_error_i: f64,
    pub max_error_d: f64,
    pub max_cmd_d: f64,
    pub max_cmd_dd: f64,
    pub bias: f64,
    pub p_gain: f64,
    pub i_gain: f64,
    pub d_gain: f64,
    pub ff0: f64,
    pub ff1: f64,
    pub ff2: f64,
    pub max_output: f64,
}

impl Default for PidParams {
    fn default() -> Self {
        Self {
            deadband: 0.0,
            max_error: 0.0,
            max_error_i: 0.0,
            max_error_d: 0.0,
            max_cmd_d: 0.0,
            max_cmd_dd: 0.0,
            bias: 0.0,
            p_gain: 1.0,
            i_gain: 0.0,
            d_gain: 0.0,
            ff0: 0.0,
            ff1: 0.0,
            ff2: 0.0,
            max_output: 0.0,
        }
    }
}

/// Internal state carried between calls.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidState {
    /// Integrated error.
    pub error_i: f64,
    /// Error derivative.
    pub error_d: f64,
    /// Command derivative.
    pub cmd_d: f64,
    /// Command second derivative.
    pub cmd_dd: f64,
    prev_error: f64,
    prev_cmd: f64,
    /// +1 / -1 when the last output hit the positive / negative limit.
    limit_state: f64,
}

impl PidState {
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// One call's inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidInput {
    pub enable: bool,
    pub command: f64,
    pub feedback: f64,
}

/// One call's outputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidOutput {
    /// Raw `command - feedback`, before limit and deadband.
    pub error: f64,
    pub output: f64,
}

/// Clamp to `±|limit|`; a zero limit leaves the value untouched.
#[inline]
fn apply_limit(value: f64, limit: f64) -> f64 {
    let limit = limit.abs();
    if limit == 0.0 {
        value
    } else if value > limit {
        limit
    } else if value < -limit {
        -limit
    } else {
        value
    }
}

#[inline]
fn apply_deadband(error: f64, deadband: f64, mode: DeadbandMode) -> f64 {
    if error > deadband {
        match mode {
            DeadbandMode::Zero => error,
            DeadbandMode::Subtract => error - deadband,
        }
    } else if error < -deadband {
        match mode {
            DeadbandMode::Zero => error,
            DeadbandMode::Subtract => error + deadband,
        }
    } else {
        0.0
    }
}

/// Compute one PID cycle.
///
/// A `period_ns` of zero or less is treated as 1 ns.
#[inline]
pub fn pid_compute(
    state: &mut PidState,
    params: &PidParams,
    mode: DeadbandMode,
    input: &PidInput,
    period_ns: i64,
) -> PidOutput {
    let period_s = guard_period(period_ns) as f64 * 1e-9;
    let period_recip = 1.0 / period_s;

    let raw_error = input.command - input.feedback;
    let error = apply_limit(raw_error, params.max_error);
    let error = apply_deadband(error, params.deadband, mode);

    // ── I term ──────────────────────────────────────────────
    if input.enable {
        if error * state.limit_state <= 0.0 {
            state.error_i += error * period_s;
        }
        state.error_i = apply_limit(state.error_i, params.max_error_i);
    } else {
        state.error_i = 0.0;
    }

    // ── D term ──────────────────────────────────────────────
    state.error_d = apply_limit((error - state.prev_error) * period_recip, params.max_error_d);
    state.prev_error = error;

    // ── Command derivatives ─────────────────────────────────
    let prev_cmd_d = state.cmd_d;
    state.cmd_d = apply_limit((input.command - state.prev_cmd) * period_recip, params.max_cmd_d);
    state.prev_cmd = input.command;
    state.cmd_dd = apply_limit((state.cmd_d - prev_cmd_d) * period_recip, params.max_cmd_dd);

    // ── Output ──────────────────────────────────────────────
    let output = if input.enable {
        let raw = params.bias
            + params.p_gain * error
            + params.i_gain * state.error_i
            + params.d_gain * state.error_d
            + params.ff0 * input.command
            + params.ff1 * state.cmd_d
            + params.ff2 * state.cmd_dd;
        let limited = apply_limit(raw, params.max_output);
        state.limit_state = if params.max_output == 0.0 || limited == raw {
            0.0
        } else {
            limited.signum()
        };
        limited
    } else {
        state.limit_state = 0.0;
        0.0
    };

    PidOutput {
        error: raw_error,
        output,
    }
}

// ─── Registry binding ───────────────────────────────────────────────

/// Registry slots used by one loop.
pub const fn slots_per_channel(debug: bool) -> usize {
    if debug { 5 + 14 + 4 } else { 5 + 14 }
}

struct PidPins {
    enable: SignalHandle,
    command: SignalHandle,
    feedback: SignalHandle,
    error: SignalHandle,
    output: SignalHandle,
}

struct PidParamPins {
    deadband: SignalHandle,
    max_error: SignalHandle,
    max_error_i: SignalHandle,
    max_error_d: SignalHandle,
    max_cmd_d: SignalHandle,
    max_cmd_dd: SignalHandle,
    bias: SignalHandle,
    p_gain: SignalHandle,
    i_gain: SignalHandle,
    d_gain: SignalHandle,
    ff0: SignalHandle,
    ff1: SignalHandle,
    ff2: SignalHandle,
    max_output: SignalHandle,
}

impl PidParamPins {
    #[inline]
    fn load(&self) -> PidParams {
        PidParams {
            deadband: self.deadband.get_f64(),
            max_error: self.max_error.get_f64(),
            max_error_i: self.max_error_i.get_f64(),
            max_error_d: self.max_error_d.get_f64(),
            max_cmd_d: self.max_cmd_d.get_f64(),
            max_cmd_dd: self.max_cmd_dd.get_f64(),
            bias: self.bias.get_f64(),
            p_gain: self.p_gain.get_f64(),
            i_gain: self.i_gain.get_f64(),
            d_gain: self.d_gain.get_f64(),
            ff0: self.ff0.get_f64(),
            ff1: self.ff1.get_f64(),
            ff2: self.ff2.get_f64(),
            max_output: self.max_output.get_f64(),
        }
    }
}

struct PidDebugPins {
    error_i: SignalHandle,
    error_d: SignalHandle,
    cmd_d: SignalHandle,
    cmd_dd: SignalHandle,
}

/// One exported PID loop (`pid.N.do-pid-calcs`).
pub struct PidLoop {
    function_name: String,
    pins: PidPins,
    params: PidParamPins,
    debug: Option<PidDebugPins>,
    mode: DeadbandMode,
    state: PidState,
}

impl PidLoop {
    fn export(
        registry: &Registry,
        owner: crate::registry::ComponentId,
        num: u32,
        config: &PidConfig,
    ) -> Result<Self, ComponentError> {
        let pin = |suffix: &str, ty, dir| {
            registry.create_signal(owner, &format!("pid.{num}.{suffix}"), ty, dir)
        };
        let pins = PidPins {
            enable: pin("enable", SignalType::Bit, PinDirection::In)?,
            command: pin("command", SignalType::Float, PinDirection::In)?,
            feedback: pin("feedback", SignalType::Float, PinDirection::In)?,
            error: pin("error", SignalType::Float, PinDirection::Out)?,
            output: pin("output", SignalType::Float, PinDirection::Out)?,
        };

        let param = |suffix: &str, access| {
            registry.create_parameter(owner, &format!("pid.{num}.{suffix}"), SignalType::Float, access)
        };
        let rw = ParamAccess::ReadWrite;
        let params = PidParamPins {
            deadband: param("deadband", rw)?,
            max_error: param("maxerror", rw)?,
            max_error_i: param("maxerrorI", rw)?,
            max_error_d: param("maxerrorD", rw)?,
            max_cmd_d: param("maxcmdD", rw)?,
            max_cmd_dd: param("maxcmdDD", rw)?,
            bias: param("bias", rw)?,
            p_gain: param("Pgain", rw)?,
            i_gain: param("Igain", rw)?,
            d_gain: param("Dgain", rw)?,
            ff0: param("FF0", rw)?,
            ff1: param("FF1", rw)?,
            ff2: param("FF2", rw)?,
            max_output: param("maxoutput", rw)?,
        };
        params.p_gain.set_f64(PidParams::default().p_gain);

        let debug = if config.debug {
            let ro = ParamAccess::ReadOnly;
            Some(PidDebugPins {
                error_i: param("errorI", ro)?,
                error_d: param("errorD", ro)?,
                cmd_d: param("commandD", ro)?,
                cmd_dd: param("commandDD", ro)?,
            })
        } else {
            None
        };

        Ok(Self {
            function_name: format!("pid.{num}.do-pid-calcs"),
            pins,
            params,
            debug,
            mode: config.deadband_mode,
            state: PidState::default(),
        })
    }

    /// Internal state, for diagnostics and tests.
    pub fn state(&self) -> &PidState {
        &self.state
    }
}

impl RtFunction for PidLoop {
    fn name(&self) -> &str {
        &self.function_name
    }

    fn call(&mut self, period_ns: i64) {
        let params = self.params.load();
        let input = PidInput {
            enable: self.pins.enable.get_bit(),
            command: self.pins.command.get_f64(),
            feedback: self.pins.feedback.get_f64(),
        };
        let out = pid_compute(&mut self.state, &params, self.mode, &input, period_ns);
        self.pins.error.set_f64(out.error);
        self.pins.output.set_f64(out.output);

        if let Some(debug) = &self.debug {
            debug.error_i.set_f64(self.state.error_i);
            debug.error_d.set_f64(self.state.error_d);
            debug.cmd_d.set_f64(self.state.cmd_d);
            debug.cmd_dd.set_f64(self.state.cmd_dd);
        }
    }
}

/// Register the `pid` component and export `config.num_chan` loops.
pub fn export(registry: &Registry, config: &PidConfig) -> Result<Vec<PidLoop>, ComponentError> {
    config.validate()?;
    let owner = registry.register_component("pid")?;
    let loops = (0..config.num_chan)
        .map(|num| PidLoop::export(registry, owner, num, config))
        .collect::<Result<Vec<_>, _>>()?;
    info!(loops = loops.len(), debug = config.debug, "PID: installed loops");
    Ok(loops)
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD_NS: i64 = 1_000_000;

    fn enabled(command: f64, feedback: f64) -> PidInput {
        PidInput {
            enable: true,
            command,
            feedback,
        }
    }

    fn p_only(p_gain: f64) -> PidParams {
        PidParams {
            p_gain,
            ..PidParams::default()
        }
    }

    #[test]
    fn proportional_only_is_steady() {
        let mut state = PidState::default();
        let params = p_only(2.0);
        for _ in 0..5 {
            let out = pid_compute(&mut state, &params, DeadbandMode::Zero, &enabled(10.0, 0.0), PERIOD_NS);
            assert_eq!(out.error, 10.0);
            assert_eq!(out.output, 20.0);
        }
    }

    #[test]
    fn disabled_loop_outputs_zero_and_clears_integral() {
        let mut state = PidState::default();
        let params = PidParams {
            i_gain: 5.0,
            bias: 3.0,
            ..PidParams::default()
        };
        for _ in 0..10 {
            pid_compute(&mut state, &params, DeadbandMode::Zero, &enabled(1.0, 0.0), PERIOD_NS);
        }
        assert!(state.error_i > 0.0);

        let input = PidInput {
            enable: false,
            command: 1.0,
            feedback: 0.0,
        };
        let out = pid_compute(&mut state, &params, DeadbandMode::Zero, &input, PERIOD_NS);
        assert_eq!(out.output, 0.0);
        assert_eq!(state.error_i, 0.0);
    }

    #[test]
    fn zero_deadband_mode_passes_error_unchanged() {
        let mut state = PidState::default();
        let params = PidParams {
            deadband: 0.5,
            ..p_only(1.0)
        };
        let inside = pid_compute(&mut state, &params, DeadbandMode::Zero, &enabled(0.4, 0.0), PERIOD_NS);
        assert_eq!(inside.output, 0.0);
        let outside = pid_compute(&mut state, &params, DeadbandMode::Zero, &enabled(2.0, 0.0), PERIOD_NS);
        assert_eq!(outside.output, 2.0);
    }

    #[test]
    fn subtract_deadband_mode_rebiases() {
        let mut state = PidState::default();
        let params = PidParams {
            deadband: 0.5,
            ..p_only(1.0)
        };
        let out = pid_compute(&mut state, &params, DeadbandMode::Subtract, &enabled(2.0, 0.0), PERIOD_NS);
        assert_eq!(out.output, 1.5);
        let out = pid_compute(&mut state, &params, DeadbandMode::Subtract, &enabled(-2.0, 0.0), PERIOD_NS);
        assert_eq!(out.output, -1.5);
    }

    #[test]
    fn output_limit_clamps_and_zero_means_unlimited() {
        let mut state = PidState::default();
        let unlimited = p_only(1000.0);
        let out = pid_compute(&mut state, &unlimited, DeadbandMode::Zero, &enabled(1e6, 0.0), PERIOD_NS);
        assert_eq!(out.output, 1e9);

        let mut state = PidState::default();
        let limited = PidParams {
            max_output: 10.0,
            ..p_only(1000.0)
        };
        let out = pid_compute(&mut state, &limited, DeadbandMode::Zero, &enabled(1e6, 0.0), PERIOD_NS);
        assert_eq!(out.output, 10.0);
        let out = pid_compute(&mut state, &limited, DeadbandMode::Zero, &enabled(-1e6, 0.0), PERIOD_NS);
        assert_eq!(out.output, -10.0);
    }

    #[test]
    fn integrator_freezes_while_saturated_in_error_direction() {
        let mut state = PidState::default();
        let params = PidParams {
            i_gain: 1.0,
            max_output: 1.0,
            ..p_only(100.0)
        };
        pid_compute(&mut state, &params, DeadbandMode::Zero, &enabled(5.0, 0.0), PERIOD_NS);
        let frozen = state.error_i;
        assert!(frozen > 0.0);

        // Saturated positive, error still positive: no accumulation.
        pid_compute(&mut state, &params, DeadbandMode::Zero, &enabled(5.0, 0.0), PERIOD_NS);
        assert_eq!(state.error_i, frozen);

        // Error reversed: integrator moves again.
        pid_compute(&mut state, &params, DeadbandMode::Zero, &enabled(-5.0, 0.0), PERIOD_NS);
        assert!(state.error_i < frozen);
    }

    #[test]
    fn integral_limit() {
        let mut state = PidState::default();
        let params = PidParams {
            i_gain: 1.0,
            max_error_i: 0.002,
            ..p_only(0.0)
        };
        for _ in 0..100 {
            pid_compute(&mut state, &params, DeadbandMode::Zero, &enabled(1.0, 0.0), PERIOD_NS);
        }
        assert_eq!(state.error_i, 0.002);
    }

    #[test]
    fn derivative_and_feed_forward() {
        let mut state = PidState::default();
        let params = PidParams {
            d_gain: 1.0,
            ff1: 1.0,
            ..p_only(0.0)
        };
        pid_compute(&mut state, &params, DeadbandMode::Zero, &enabled(0.0, 0.0), PERIOD_NS);
        // error and command both step by 1 over 1 ms: D = 1000, FF1 = 1000.
        let out = pid_compute(&mut state, &params, DeadbandMode::Zero, &enabled(1.0, 0.0), PERIOD_NS);
        assert!((out.output - 2000.0).abs() < 1e-6);
        assert!((state.cmd_d - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn zero_period_is_guarded() {
        let mut state = PidState::default();
        let params = PidParams {
            d_gain: 1.0,
            ..p_only(1.0)
        };
        let out = pid_compute(&mut state, &params, DeadbandMode::Zero, &enabled(1.0, 0.0), 0);
        assert!(out.output.is_finite());
    }

    #[test]
    fn reset_clears_state() {
        let mut state = PidState::default();
        let params = PidParams {
            i_gain: 1.0,
            d_gain: 1.0,
            ..p_only(1.0)
        };
        for _ in 0..10 {
            pid_compute(&mut state, &params, DeadbandMode::Zero, &enabled(3.0, 1.0), PERIOD_NS);
        }
        state.reset();
        assert_eq!(state, PidState::default());
    }

    #[test]
    fn export_creates_named_pins() {
        let registry = Registry::new(128);
        let config = PidConfig {
            num_chan: 2,
            debug: true,
            ..PidConfig::default()
        };
        let loops = export(&registry, &config).unwrap();
        assert_eq!(loops.len(), 2);
        assert_eq!(loops[1].name(), "pid.1.do-pid-calcs");
        assert_eq!(registry.len(), 2 * slots_per_channel(true));
        assert_eq!(
            registry.get_value("pid.0.Pgain"),
            Ok(crate::registry::Value::Float(1.0))
        );
        assert!(registry.info("pid.1.commandDD").is_ok());
    }
}
