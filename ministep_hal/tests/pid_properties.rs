//! Behavioural properties of the PID computation.

use ministep_hal::components::pid::{DeadbandMode, PidInput, PidParams, PidState, pid_compute};
use proptest::prelude::*;

const PERIOD_NS: i64 = 1_000_000;

proptest! {
    #[test]
    fn unlimited_proportional_loop_is_never_clamped(
        p_gain in -1.0e3f64..1.0e3,
        command in -1.0e6f64..1.0e6,
        feedback in -1.0e6f64..1.0e6,
    ) {
        let mut state = PidState::default();
        let params = PidParams { p_gain, ..PidParams::default() };
        let input = PidInput { enable: true, command, feedback };

        let out = pid_compute(&mut state, &params, DeadbandMode::Zero, &input, PERIOD_NS);
        prop_assert_eq!(out.error, command - feedback);
        prop_assert_eq!(out.output, p_gain * (command - feedback));
    }

    #[test]
    fn output_stays_within_max_output(
        max_output in prop_oneof![-100.0f64..-0.001, 0.001f64..100.0],
        p_gain in -50.0f64..50.0,
        i_gain in -50.0f64..50.0,
        d_gain in -1.0f64..1.0,
        commands in prop::collection::vec(-1.0e3f64..1.0e3, 1..40),
    ) {
        let mut state = PidState::default();
        let params = PidParams {
            p_gain,
            i_gain,
            d_gain,
            max_output,
            ..PidParams::default()
        };
        for command in commands {
            let input = PidInput { enable: true, command, feedback: 0.0 };
            let out = pid_compute(&mut state, &params, DeadbandMode::Zero, &input, PERIOD_NS);
            prop_assert!(out.output.abs() <= max_output.abs());
        }
    }

    #[test]
    fn disabled_loop_is_silent(
        p_gain in -1.0e3f64..1.0e3,
        bias in -1.0e3f64..1.0e3,
        command in -1.0e3f64..1.0e3,
    ) {
        let mut state = PidState::default();
        let params = PidParams { p_gain, bias, i_gain: 1.0, ..PidParams::default() };
        let input = PidInput { enable: false, command, feedback: 0.0 };
        for _ in 0..3 {
            let out = pid_compute(&mut state, &params, DeadbandMode::Subtract, &input, PERIOD_NS);
            prop_assert_eq!(out.output, 0.0);
            prop_assert_eq!(state.error_i, 0.0);
        }
    }
}

#[test]
fn integrator_stops_at_saturation() {
    let mut state = PidState::default();
    let params = PidParams {
        p_gain: 0.0,
        i_gain: 1.0,
        max_output: 1.0,
        ..PidParams::default()
    };
    let input = PidInput {
        enable: true,
        command: 10.0,
        feedback: 0.0,
    };

    for _ in 0..1000 {
        let out = pid_compute(&mut state, &params, DeadbandMode::Zero, &input, PERIOD_NS);
        assert!(out.output <= 1.0);
    }
    // One step past the limit at most: 10 * 1 ms per step.
    assert!(state.error_i <= 1.0 + 0.01 + 1e-9, "error_i = {}", state.error_i);

    // Reversing the error unwinds immediately.
    let back = PidInput {
        command: -10.0,
        ..input
    };
    let before = state.error_i;
    pid_compute(&mut state, &params, DeadbandMode::Zero, &back, PERIOD_NS);
    assert!(state.error_i < before);
}
