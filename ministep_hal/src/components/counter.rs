//! Edge counter with index capture.
//!
//! `counter.update-counters` (fast) counts rising edges on `phase-A` and, when
//! reset-on-index is armed, latches the count at the rising edge of `phase-Z`
//! and clears `index-enable`.
//!
//! `counter.capture-position` (slow) applies `reset`, publishes `counts`
//! (relative to the last index), `position` and `velocity`, and re-arms
//! reset-on-index from `index-enable`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use tracing::info;

use crate::components::{guard_period, scale_reciprocal};
use crate::config::CounterConfig;
use crate::error::ComponentError;
use crate::registry::{ComponentId, ParamAccess, PinDirection, Registry, SignalHandle, SignalType};
use crate::thread::RtFunction;

/// Registry slots used by one channel.
pub const SLOTS_PER_CHANNEL: usize = 9;

/// State written by one half and read by the other.
#[derive(Debug, Default)]
struct Shared {
    raw_count: AtomicI32,
    last_index_count: AtomicI32,
    reset_on_index: AtomicBool,
}

struct FastChannel {
    shared: Arc<Shared>,
    phase_a: SignalHandle,
    phase_z: SignalHandle,
    index_enable: SignalHandle,
    raw_counts: SignalHandle,
    old_a: bool,
    old_z: bool,
}

struct SlowChannel {
    shared: Arc<Shared>,
    reset: SignalHandle,
    index_enable: SignalHandle,
    counts: SignalHandle,
    position: SignalHandle,
    velocity: SignalHandle,
    position_scale: SignalHandle,
    last_count: i32,
    old_scale: f64,
    scale_recip: f64,
}

/// `counter.update-counters`: edge detection for every channel.
pub struct CounterUpdate {
    channels: Vec<FastChannel>,
}

/// `counter.capture-position`: scaling and capture for every channel.
pub struct CounterCapture {
    channels: Vec<SlowChannel>,
}

impl RtFunction for CounterUpdate {
    fn name(&self) -> &str {
        "counter.update-counters"
    }

    fn call(&mut self, _period_ns: i64) {
        for ch in self.channels.iter_mut() {
            let a = ch.phase_a.get_bit();
            if a && !ch.old_a {
                ch.shared.raw_count.fetch_add(1, Ordering::Relaxed);
            }
            ch.old_a = a;

            let z = ch.phase_z.get_bit();
            if z && !ch.old_z && ch.shared.reset_on_index.load(Ordering::Relaxed) {
                let raw = ch.shared.raw_count.load(Ordering::Relaxed);
                ch.shared.last_index_count.store(raw, Ordering::Relaxed);
                ch.index_enable.set_bit(false);
            }
            ch.old_z = z;

            ch.raw_counts
                .set_s32(ch.shared.raw_count.load(Ordering::Relaxed));
        }
    }
}

impl RtFunction for CounterCapture {
    fn name(&self) -> &str {
        "counter.capture-position"
    }

    fn call(&mut self, period_ns: i64) {
        let period_ns = guard_period(period_ns) as f64;
        for ch in self.channels.iter_mut() {
            if ch.reset.get_bit() {
                ch.shared.raw_count.store(0, Ordering::Relaxed);
                ch.shared.last_index_count.store(0, Ordering::Relaxed);
                ch.last_count = 0;
            }

            let raw = ch.shared.raw_count.load(Ordering::Relaxed);
            let counts = raw.wrapping_sub(ch.shared.last_index_count.load(Ordering::Relaxed));
            let delta = raw.wrapping_sub(ch.last_count);
            ch.last_count = raw;
            ch.counts.set_s32(counts);

            let scale = ch.position_scale.get_f64();
            if scale != ch.old_scale {
                ch.old_scale = scale;
                let (sanitised, recip) = scale_reciprocal(scale);
                if sanitised != scale {
                    ch.position_scale.set_f64(sanitised);
                }
                ch.scale_recip = recip;
            }

            ch.position.set_f64(f64::from(counts) * ch.scale_recip);
            ch.velocity
                .set_f64(f64::from(delta) * ch.scale_recip * 1e9 / period_ns);

            ch.shared
                .reset_on_index
                .store(ch.index_enable.get_bit(), Ordering::Relaxed);
        }
    }
}

fn export_channel(
    registry: &Registry,
    owner: ComponentId,
    num: u32,
) -> Result<(FastChannel, SlowChannel), ComponentError> {
    let pin = |suffix: &str, ty, dir| {
        registry.create_signal(owner, &format!("counter.{num}.{suffix}"), ty, dir)
    };
    let phase_a = pin("phase-A", SignalType::Bit, PinDirection::In)?;
    let phase_z = pin("phase-Z", SignalType::Bit, PinDirection::In)?;
    let reset = pin("reset", SignalType::Bit, PinDirection::In)?;
    let index_enable = pin("index-enable", SignalType::Bit, PinDirection::InOut)?;
    let counts = pin("counts", SignalType::S32, PinDirection::Out)?;
    let position = pin("position", SignalType::Float, PinDirection::Out)?;
    let velocity = pin("velocity", SignalType::Float, PinDirection::Out)?;
    let raw_counts = registry.create_parameter(
        owner,
        &format!("counter.{num}.rawcounts"),
        SignalType::S32,
        ParamAccess::ReadOnly,
    )?;
    let position_scale = registry.create_parameter(
        owner,
        &format!("counter.{num}.position-scale"),
        SignalType::Float,
        ParamAccess::ReadWrite,
    )?;
    position_scale.set_f64(1.0);

    let shared = Arc::new(Shared::default());
    let fast = FastChannel {
        shared: Arc::clone(&shared),
        phase_a,
        phase_z,
        index_enable: index_enable.clone(),
        raw_counts,
        old_a: false,
        old_z: false,
    };
    let slow = SlowChannel {
        shared,
        reset,
        index_enable,
        counts,
        position,
        velocity,
        position_scale,
        last_count: 0,
        old_scale: 1.0,
        scale_recip: 1.0,
    };
    Ok((fast, slow))
}

/// Register the `counter` component and export both functions.
pub fn export(
    registry: &Registry,
    config: &CounterConfig,
) -> Result<(CounterUpdate, CounterCapture), ComponentError> {
    config.validate()?;
    let owner = registry.register_component("counter")?;

    let mut fast = Vec::with_capacity(config.num_chan as usize);
    let mut slow = Vec::with_capacity(config.num_chan as usize);
    for num in 0..config.num_chan {
        let (f, s) = export_channel(registry, owner, num)?;
        fast.push(f);
        slow.push(s);
    }
    info!(channels = config.num_chan, "COUNTER: installed counters");
    Ok((CounterUpdate { channels: fast }, CounterCapture { channels: slow }))
}
