//! Step-pulse generator.
//!
//! One [`StepGenerator::tick`] per base period. Each tick:
//!
//! 1. follows the arm request in the command block (arm snapshots the static
//!    configuration, disarm drives every step, scan and PWM output low and
//!    drops the queued frames);
//! 2. applies a pending bulk GPIO transfer and acknowledges its sequence;
//! 3. when armed, pops one frame, or holds the previous adders and flags an
//!    underrun when the ring is empty;
//! 4. runs the DDS of every configured axis: the direction output follows the
//!    sign of the adder, and a flip of accumulator bit 31 toggles the step
//!    output and counts one step;
//! 5. drives the scan pulse and the software PWM outputs;
//! 6. publishes counters and positions to the status block and writes the
//!    changed port words.
//!
//! The tick does not allocate, lock or log.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use thiserror::Error;

use ministep_common::consts::{MAX_AXIS, MAX_GPIO_PORTS, MAX_PWM, PWM_PERIOD_TICKS};
use ministep_common::shm::exchange::{
    AxisConfig, ChangedOutputs, ExchangeRegion, PortPin, StatusBlock,
};
use ministep_common::shm::io_helpers::{apply_set_clear, port_in_range};
use ministep_common::shm::region::RegionMap;
use ministep_common::shm::ring::RingConsumer;

use crate::ports::PortBank;

/// Axis whose DDS events drive the scanner sync output.
pub const SCAN_AXIS: usize = 0;

/// Generator construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeneratorError {
    /// Another generator already owns the read side of the ring.
    #[error("Ring consumer is already taken")]
    ConsumerTaken,
}

/// Port words as last written, plus the banks touched this tick.
#[derive(Debug)]
struct Outputs<P> {
    ports: P,
    levels: [u32; MAX_GPIO_PORTS],
    dirty: u32,
}

impl<P: PortBank> Outputs<P> {
    fn new(ports: P) -> Self {
        let levels = core::array::from_fn(|port| ports.read(port as u8));
        Self {
            ports,
            levels,
            dirty: 0,
        }
    }

    #[inline]
    fn update(&mut self, port: u8, level: u32) {
        let slot = &mut self.levels[port as usize];
        if *slot != level {
            *slot = level;
            self.dirty |= 1 << port;
        }
    }

    #[inline]
    fn set(&mut self, pin: PortPin, high: bool) {
        if !pin.is_assigned() || !port_in_range(pin.port) {
            return;
        }
        let level = self.levels[pin.port as usize];
        let level = if high { level | pin.mask } else { level & !pin.mask };
        self.update(pin.port, level);
    }

    #[inline]
    fn apply(&mut self, port: u8, set: u32, clear: u32) {
        let level = apply_set_clear(self.levels[port as usize], set, clear);
        self.update(port, level);
    }

    #[inline]
    fn flush(&mut self, status: &StatusBlock) {
        let mut dirty = self.dirty;
        while dirty != 0 {
            let port = dirty.trailing_zeros() as u8;
            dirty &= dirty - 1;
            let level = self.levels[port as usize];
            self.ports.write(port, level);
            status.port_levels[port as usize].store(level, Ordering::Relaxed);
        }
        self.dirty = 0;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AxisState {
    wiring: AxisConfig,
    accum: u32,
    adder: i32,
    cmd_position: i64,
    scan_sync: bool,
    step_high: bool,
    steps: i64,
}

impl AxisState {
    /// Advance the accumulator by one tick. Returns `true` on a DDS event.
    #[inline]
    fn advance(&mut self) -> bool {
        let before = self.accum >> 31;
        self.accum = self.accum.wrapping_add(self.adder as u32);
        if before == self.accum >> 31 {
            return false;
        }
        self.step_high = !self.step_high;
        self.steps += if self.adder < 0 { -1 } else { 1 };
        true
    }
}

/// Everything the tick mutates, apart from the ring handle.
#[derive(Debug)]
struct Engine<P> {
    outputs: Outputs<P>,
    axes: [AxisState; MAX_AXIS],
    scan: PortPin,
    pwm: [PortPin; MAX_PWM],
    pwm_high: [bool; MAX_PWM],
    pwm_phase: u32,
    armed: bool,
    transfer_ack: u32,
}

impl<P: PortBank> Engine<P> {
    fn follow_arm_request(&mut self, region: &ExchangeRegion, consumer: &mut RingConsumer) {
        let requested = region.command.arm.load(Ordering::Acquire);
        if requested == self.armed {
            return;
        }
        if requested {
            self.arm(region);
        } else {
            self.disarm(region, consumer);
        }
    }

    fn arm(&mut self, region: &ExchangeRegion) {
        let settings = region.config.load();
        for (axis, wiring) in self.axes.iter_mut().zip(settings.axes) {
            *axis = AxisState {
                wiring,
                steps: axis.steps,
                cmd_position: axis.steps,
                ..AxisState::default()
            };
            self.outputs.set(wiring.step, false);
        }
        self.scan = settings.scan;
        self.pwm = settings.pwm;
        self.pwm_high = [false; MAX_PWM];
        self.pwm_phase = 0;
        self.armed = true;
        region.status.armed.store(true, Ordering::Release);
    }

    fn disarm(&mut self, region: &ExchangeRegion, consumer: &mut RingConsumer) {
        for axis in self.axes.iter_mut() {
            axis.adder = 0;
            axis.scan_sync = false;
            axis.step_high = false;
            self.outputs.set(axis.wiring.step, false);
        }
        self.outputs.set(self.scan, false);
        for (ch, pin) in self.pwm.iter().enumerate() {
            if self.pwm_high[ch] {
                region.status.mark_changed(ChangedOutputs::pwm(ch));
            }
            self.outputs.set(*pin, false);
        }
        self.pwm_high = [false; MAX_PWM];
        consumer.flush();
        self.armed = false;
        region.status.underrun.store(false, Ordering::Relaxed);
        region.status.armed.store(false, Ordering::Release);
    }

    fn apply_transfer(&mut self, region: &ExchangeRegion) {
        let Some(seq) = region.command.pending_transfer(self.transfer_ack) else {
            return;
        };
        let mut changed = ChangedOutputs::TRANSFER;
        for port in 0..MAX_GPIO_PORTS {
            let set = region.command.gpio_set[port].load(Ordering::Relaxed);
            let clear = region.command.gpio_clear[port].load(Ordering::Relaxed);
            if set | clear != 0 {
                self.outputs.apply(port as u8, set, clear);
                changed |= ChangedOutputs::port(port as u8);
            }
        }
        region.status.mark_changed(changed);
        self.transfer_ack = seq;
        region.status.transfer_ack.store(seq, Ordering::Release);
    }

    fn load_frame(&mut self, region: &ExchangeRegion, consumer: &mut RingConsumer) {
        match consumer.pop_for_tick() {
            Some(frame) => {
                region.status.underrun.store(false, Ordering::Relaxed);
                for (axis, cmd) in self.axes.iter_mut().zip(frame.axes.iter()) {
                    if axis.wiring.configured {
                        axis.adder = cmd.signed_adder();
                        axis.cmd_position = cmd.cmd_position;
                        axis.scan_sync = cmd.scan_sync;
                    }
                }
            }
            None => {
                region.status.underrun.store(true, Ordering::Relaxed);
                region.status.underrun_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn run_axes(&mut self) -> bool {
        let mut scan_pulse = false;
        for (index, axis) in self.axes.iter_mut().enumerate() {
            if !axis.wiring.configured {
                continue;
            }
            let reverse = axis.adder < 0;
            self.outputs
                .set(axis.wiring.dir, reverse != axis.wiring.dir_inverted);
            if axis.advance() {
                self.outputs.set(axis.wiring.step, axis.step_high);
                if index == SCAN_AXIS && axis.scan_sync {
                    scan_pulse = true;
                }
            }
        }
        scan_pulse
    }

    fn run_pwm(&mut self, region: &ExchangeRegion) {
        let mut changed = ChangedOutputs::empty();
        for (ch, pin) in self.pwm.iter().enumerate() {
            if !pin.is_assigned() {
                continue;
            }
            let duty = region.command.pwm_duty[ch].load(Ordering::Relaxed);
            let high = self.pwm_phase < duty;
            if high != self.pwm_high[ch] {
                self.pwm_high[ch] = high;
                self.outputs.set(*pin, high);
                changed |= ChangedOutputs::pwm(ch);
            }
        }
        region.status.mark_changed(changed);
        self.pwm_phase = (self.pwm_phase + 1) % PWM_PERIOD_TICKS;
    }

    fn publish(&mut self, region: &ExchangeRegion, consumer: &RingConsumer) {
        let status = &region.status;
        for (index, axis) in self.axes.iter().enumerate() {
            status.step_count[index].store(axis.steps, Ordering::Relaxed);
            let error = if axis.wiring.configured {
                axis.cmd_position - axis.steps
            } else {
                0
            };
            status.pos_error[index].store(error, Ordering::Relaxed);
        }
        status.free_space.store(consumer.free_space(), Ordering::Relaxed);
        self.outputs.flush(status);
        status.tick.fetch_add(1, Ordering::Release);
    }
}

/// The step generator: sole consumer of the motion ring and sole writer of
/// the step, direction, scan and PWM outputs.
#[derive(Debug)]
pub struct StepGenerator<P> {
    map: Arc<RegionMap>,
    consumer: RingConsumer,
    engine: Engine<P>,
}

impl<P: PortBank> StepGenerator<P> {
    /// Claim the ring consumer of `map` and drive `ports`.
    ///
    /// # Errors
    ///
    /// `ConsumerTaken` while another consumer handle is alive.
    pub fn new(map: &Arc<RegionMap>, ports: P) -> Result<Self, GeneratorError> {
        let consumer = map.take_consumer().ok_or(GeneratorError::ConsumerTaken)?;
        let transfer_ack = map.region().status.transfer_ack.load(Ordering::Acquire);
        Ok(Self {
            map: Arc::clone(map),
            consumer,
            engine: Engine {
                outputs: Outputs::new(ports),
                axes: [AxisState::default(); MAX_AXIS],
                scan: PortPin::UNASSIGNED,
                pwm: [PortPin::UNASSIGNED; MAX_PWM],
                pwm_high: [false; MAX_PWM],
                pwm_phase: 0,
                armed: false,
                transfer_ack,
            },
        })
    }

    /// Run one base period.
    #[inline]
    pub fn tick(&mut self) {
        let region = self.map.region();
        let engine = &mut self.engine;

        engine.follow_arm_request(region, &mut self.consumer);
        engine.apply_transfer(region);
        if engine.armed {
            engine.load_frame(region, &mut self.consumer);
            let scan_pulse = engine.run_axes();
            engine.outputs.set(engine.scan, scan_pulse);
            engine.run_pwm(region);
        }
        engine.publish(region, &self.consumer);
    }

    /// Drop the arm request and drive every output low.
    pub fn shutdown(&mut self) {
        let region = self.map.region();
        region.command.arm.store(false, Ordering::Release);
        if self.engine.armed {
            self.engine.disarm(region, &mut self.consumer);
        }
        self.engine.outputs.flush(&region.status);
    }

    pub fn is_armed(&self) -> bool {
        self.engine.armed
    }

    /// Signed phase increment currently applied to `axis`.
    pub fn adder(&self, axis: usize) -> i32 {
        self.engine.axes[axis].adder
    }

    /// Steps emitted on `axis` since the generator was created.
    pub fn steps(&self, axis: usize) -> i64 {
        self.engine.axes[axis].steps
    }

    pub fn ports(&self) -> &P {
        &self.engine.outputs.ports
    }

    pub fn region_map(&self) -> &Arc<RegionMap> {
        &self.map
    }

    /// Release the ring consumer and hand back the port banks.
    pub fn into_ports(self) -> P {
        self.engine.outputs.ports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::SimPorts;
    use ministep_common::shm::ring::{AxisCommand, Frame};

    const STEP: PortPin = PortPin::new(1, 1 << 4);
    const DIR: PortPin = PortPin::new(1, 1 << 5);

    fn armed_generator() -> (Arc<RegionMap>, StepGenerator<SimPorts>) {
        let map = RegionMap::open().unwrap();
        map.region().config.axes[0].store(&AxisConfig {
            configured: true,
            step: STEP,
            dir: DIR,
            dir_inverted: false,
        });
        let mut generator = StepGenerator::new(&map, SimPorts::new()).unwrap();
        map.region().command.arm.store(true, Ordering::Release);
        generator.tick();
        (map, generator)
    }

    #[test]
    fn second_generator_is_refused() {
        let map = RegionMap::open().unwrap();
        let _first = StepGenerator::new(&map, SimPorts::new()).unwrap();
        assert_eq!(
            StepGenerator::new(&map, SimPorts::new()).unwrap_err(),
            GeneratorError::ConsumerTaken
        );
    }

    #[test]
    fn arm_is_acknowledged_in_status() {
        let (map, generator) = armed_generator();
        assert!(generator.is_armed());
        assert!(map.region().status.armed.load(Ordering::Acquire));
        assert_eq!(map.region().status.tick.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn direction_follows_adder_sign() {
        let (map, mut generator) = armed_generator();
        let mut producer = map.take_producer().unwrap();
        let mut frame = Frame::IDLE;
        frame.axes[0] = AxisCommand::from_signed(-(1 << 20), 0, false);
        producer.push(&[frame]).unwrap();

        generator.tick();
        assert_eq!(generator.ports().read(1) & DIR.mask, DIR.mask);

        frame.axes[0] = AxisCommand::from_signed(1 << 20, 0, false);
        producer.push(&[frame]).unwrap();
        generator.tick();
        assert_eq!(generator.ports().read(1) & DIR.mask, 0);
    }

    #[test]
    fn unconfigured_axes_ignore_frames() {
        let (map, mut generator) = armed_generator();
        let mut producer = map.take_producer().unwrap();
        let mut frame = Frame::IDLE;
        frame.axes[3] = AxisCommand::from_signed(1 << 30, 5, false);
        producer.push(&[frame, frame]).unwrap();
        generator.tick();
        generator.tick();
        assert_eq!(generator.adder(3), 0);
        assert_eq!(generator.steps(3), 0);
        assert_eq!(map.region().status.pos_error(3), 0);
    }

    #[test]
    fn shutdown_clears_arm_request() {
        let (map, mut generator) = armed_generator();
        generator.shutdown();
        assert!(!generator.is_armed());
        assert!(!map.region().command.arm.load(Ordering::Acquire));
        assert!(!map.region().status.armed.load(Ordering::Acquire));
    }
}
