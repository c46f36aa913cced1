//! Simulated quadrature encoder.
//!
//! `sim-encoder.make-pulses` (fast) runs a DDS accumulator per channel; each
//! change of bit 31 steps the quadrature state forward or backward:
//!
//! | state | A | B |
//! |-------|---|---|
//! | 0     | 1 | 0 |
//! | 1     | 1 | 1 |
//! | 2     | 0 | 1 |
//! | 3     | 0 | 0 |
//!
//! Wrapping from 3 to 0 advances the revolution cycle, which wraps at `ppr`.
//! `phase-Z` is high only at state 0 of cycle 0.
//!
//! `sim-encoder.update-speed` (slow) turns the `speed` pin into the add value
//! using the fast function's period, which it picks up from the fast half.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use tracing::info;

use crate::components::{guard_period, scale_reciprocal};
use crate::config::SimEncoderConfig;
use crate::error::ComponentError;
use crate::registry::{ComponentId, ParamAccess, PinDirection, Registry, SignalHandle, SignalType};
use crate::thread::RtFunction;

/// Registry slots used by one channel.
pub const SLOTS_PER_CHANNEL: usize = 6;

/// Default pulses per revolution.
pub const DEFAULT_PPR: i32 = 100;

/// Fast period assumed until the pulse function has run once.
const INITIAL_PERIOD_NS: i64 = 50_000;

const DDS_FULL_SCALE: f64 = 2_147_483_648.0;

#[derive(Debug)]
struct Shared {
    /// Period of the fast function, published by the fast half.
    period_ns: AtomicI64,
    /// Per-channel add values, published by the slow half.
    add_values: Box<[AtomicI32]>,
}

struct PulseChannel {
    phase_a: SignalHandle,
    phase_b: SignalHandle,
    phase_z: SignalHandle,
    ppr: SignalHandle,
    accum: u32,
    state: u8,
    cycle: i32,
}

struct SpeedChannel {
    speed: SignalHandle,
    ppr: SignalHandle,
    scale: SignalHandle,
    old_scale: f64,
    scale_recip: f64,
}

/// `sim-encoder.make-pulses`.
pub struct SimEncoderPulses {
    shared: Arc<Shared>,
    channels: Vec<PulseChannel>,
}

/// `sim-encoder.update-speed`.
pub struct SimEncoderSpeed {
    shared: Arc<Shared>,
    channels: Vec<SpeedChannel>,
    old_period_ns: i64,
    max_freq: f64,
    freq_scale: f64,
}

impl PulseChannel {
    #[inline]
    fn step(&mut self, add_value: i32) {
        let before = self.accum >> 31;
        self.accum = self.accum.wrapping_add(add_value as u32);
        if before == self.accum >> 31 {
            return;
        }

        let ppr = self.ppr.get_s32().max(1);
        if add_value < 0 {
            if self.state == 0 {
                self.state = 3;
                self.cycle -= 1;
                if self.cycle < 0 {
                    self.cycle += ppr;
                }
            } else {
                self.state -= 1;
            }
        } else if self.state == 3 {
            self.state = 0;
            self.cycle += 1;
            if self.cycle >= ppr {
                self.cycle -= ppr;
            }
        } else {
            self.state += 1;
        }
    }

    #[inline]
    fn publish(&self) {
        let (a, b) = match self.state {
            0 => (true, false),
            1 => (true, true),
            2 => (false, true),
            _ => (false, false),
        };
        self.phase_a.set_bit(a);
        self.phase_b.set_bit(b);
        self.phase_z.set_bit(self.state == 0 && self.cycle == 0);
    }
}

impl RtFunction for SimEncoderPulses {
    fn name(&self) -> &str {
        "sim-encoder.make-pulses"
    }

    fn call(&mut self, period_ns: i64) {
        self.shared.period_ns.store(period_ns, Ordering::Relaxed);
        for (ch, add) in self.channels.iter_mut().zip(self.shared.add_values.iter()) {
            ch.step(add.load(Ordering::Relaxed));
            ch.publish();
        }
    }
}

impl SimEncoderSpeed {
    fn retime(&mut self, period_ns: i64) {
        let period_s = guard_period(period_ns) as f64 * 1e-9;
        self.max_freq = 1.0 / period_s;
        self.freq_scale = DDS_FULL_SCALE / self.max_freq;
        self.old_period_ns = period_ns;
    }
}

impl RtFunction for SimEncoderSpeed {
    fn name(&self) -> &str {
        "sim-encoder.update-speed"
    }

    fn call(&mut self, _period_ns: i64) {
        let fast_period = self.shared.period_ns.load(Ordering::Relaxed);
        if fast_period != self.old_period_ns {
            self.retime(fast_period);
        }

        for (ch, add) in self.channels.iter_mut().zip(self.shared.add_values.iter()) {
            let scale = ch.scale.get_f64();
            if scale != ch.old_scale {
                ch.old_scale = scale;
                let (sanitised, recip) = scale_reciprocal(scale);
                if sanitised != scale {
                    ch.scale.set_f64(sanitised);
                }
                ch.scale_recip = recip;
            }

            let rev_per_sec = ch.speed.get_f64() * ch.scale_recip;
            let freq = (rev_per_sec * f64::from(ch.ppr.get_s32()) * 4.0)
                .clamp(-self.max_freq, self.max_freq);
            // Full-scale frequency maps to 2^31, one past the largest add value.
            let add_value = (freq * self.freq_scale).clamp(-(i32::MAX as f64), i32::MAX as f64);
            add.store(add_value as i32, Ordering::Relaxed);
        }
    }
}

fn export_channel(
    registry: &Registry,
    owner: ComponentId,
    num: u32,
) -> Result<(PulseChannel, SpeedChannel), ComponentError> {
    let name = |suffix: &str| format!("sim-encoder.{num}.{suffix}");
    let ppr = registry.create_parameter(owner, &name("ppr"), SignalType::S32, ParamAccess::ReadWrite)?;
    let scale =
        registry.create_parameter(owner, &name("scale"), SignalType::Float, ParamAccess::ReadWrite)?;
    let speed = registry.create_signal(owner, &name("speed"), SignalType::Float, PinDirection::In)?;
    let phase_a = registry.create_signal(owner, &name("phase-A"), SignalType::Bit, PinDirection::Out)?;
    let phase_b = registry.create_signal(owner, &name("phase-B"), SignalType::Bit, PinDirection::Out)?;
    let phase_z = registry.create_signal(owner, &name("phase-Z"), SignalType::Bit, PinDirection::Out)?;
    ppr.set_s32(DEFAULT_PPR);
    scale.set_f64(1.0);

    let pulses = PulseChannel {
        phase_a,
        phase_b,
        phase_z,
        ppr: ppr.clone(),
        accum: 0,
        state: 0,
        cycle: 0,
    };
    let speed = SpeedChannel {
        speed,
        ppr,
        scale,
        old_scale: 1.0,
        scale_recip: 1.0,
    };
    Ok((pulses, speed))
}

/// Register the `sim-encoder` component and export both functions.
pub fn export(
    registry: &Registry,
    config: &SimEncoderConfig,
) -> Result<(SimEncoderPulses, SimEncoderSpeed), ComponentError> {
    config.validate()?;
    let owner = registry.register_component("sim-encoder")?;

    let mut pulses = Vec::with_capacity(config.num_chan as usize);
    let mut speeds = Vec::with_capacity(config.num_chan as usize);
    for num in 0..config.num_chan {
        let (p, s) = export_channel(registry, owner, num)?;
        pulses.push(p);
        speeds.push(s);
    }

    let shared = Arc::new(Shared {
        period_ns: AtomicI64::new(INITIAL_PERIOD_NS),
        add_values: (0..config.num_chan).map(|_| AtomicI32::new(0)).collect(),
    });
    let mut speed = SimEncoderSpeed {
        shared: Arc::clone(&shared),
        channels: speeds,
        old_period_ns: INITIAL_PERIOD_NS,
        max_freq: 0.0,
        freq_scale: 0.0,
    };
    speed.retime(INITIAL_PERIOD_NS);

    info!(channels = config.num_chan, "SIM_ENCODER: installed simulated encoders");
    Ok((
        SimEncoderPulses {
            shared,
            channels: pulses,
        },
        speed,
    ))
}
