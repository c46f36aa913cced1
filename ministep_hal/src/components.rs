//! Periodic control components.
//!
//! - `pid`: PID loops, one `pid.N.do-pid-calcs` function per loop.
//! - `counter`: edge counters, split into a fast counting function and a
//!   slower capture function.
//! - `sim_encoder`: quadrature pulse source driven by a speed command, split
//!   into a fast pulse function and a slower speed update.
//!
//! Every component is created from a validated config section and a
//! [`Registry`](crate::registry::Registry) handle. Fast and slow halves of one
//! component share state through atomics, since they usually run on
//! different threads.

pub mod counter;
pub mod pid;
pub mod sim_encoder;

/// Reciprocal of a user scale, with near-zero scales replaced by 1.0.
///
/// Returns `(sanitised_scale, reciprocal)`.
#[inline]
pub(crate) fn scale_reciprocal(scale: f64) -> (f64, f64) {
    let scale = if scale > -1e-20 && scale < 1e-20 { 1.0 } else { scale };
    (scale, 1.0 / scale)
}

/// Tick period guard: zero or negative periods become 1 ns.
#[inline]
pub(crate) fn guard_period(period_ns: i64) -> i64 {
    period_ns.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_zero_scale_becomes_one() {
        assert_eq!(scale_reciprocal(0.0), (1.0, 1.0));
        assert_eq!(scale_reciprocal(1e-21), (1.0, 1.0));
        assert_eq!(scale_reciprocal(-1e-21), (1.0, 1.0));
        assert_eq!(scale_reciprocal(4.0), (4.0, 0.25));
        assert_eq!(scale_reciprocal(-2.0), (-2.0, -0.5));
    }

    #[test]
    fn period_guard() {
        assert_eq!(guard_period(0), 1);
        assert_eq!(guard_period(-100), 1);
        assert_eq!(guard_period(1_000), 1_000);
    }
}
