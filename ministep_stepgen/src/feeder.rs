//! Control-rate feeder: turns commanded joint positions into ring frames.
//!
//! Runs once per servo period as `stepgen.update`. Each call pushes one
//! frame per base tick of the coming servo period, so the generator always
//! has the next period queued. Per axis:
//!
//! - `target = round(cmd-pos × step_per_unit)` in absolute steps;
//! - `dist = target − previous target`, corrected by one step towards the
//!   generator's position error once per ring depth, outside a ±1 dead band;
//! - `adder = dist × 2^31 / frames`, clamped to the largest adder;
//! - `cmd_position` is interpolated linearly across the frames.
//!
//! When the ring lacks room for a whole servo period, `traj-wait-out` goes
//! low and nothing is pushed.

use std::sync::atomic::Ordering;
use thiserror::Error;
use tracing::{info, warn};

use ministep_common::consts::{MAX_ADDER, MAX_AXIS, MAX_PWM};
use ministep_common::device::PinMode;
use ministep_common::shm::exchange::{AxisConfig, StaticSettings};
use ministep_common::shm::ring::{AxisCommand, Frame, RingError, RingProducer};
use ministep_hal::{
    ComponentId, PinDirection, Registry, RegistryError, RtFunction, SignalHandle, SignalType,
};

use crate::board::PinError;
use crate::config::{StepgenConfig, TimingConfig};
use crate::device::{DeviceError, DeviceRequest, MotionDevice};
use crate::generator::SCAN_AXIS;

/// Joint index of each generator axis, in generator axis order.
pub type AxisMap = heapless::Vec<usize, MAX_AXIS>;

/// Feeder setup errors.
#[derive(Debug, Error)]
pub enum FeederError {
    #[error("Invalid axes string '{0}' (1..={MAX_AXIS} of X Y Z A B C)")]
    InvalidAxes(String),

    #[error("Servo period {servo_ns} ns holds no base period of {base_ns} ns")]
    InvalidTiming { base_ns: u32, servo_ns: u32 },

    #[error("Missing {field} entry for axis {axis}")]
    MissingEntry { field: &'static str, axis: usize },

    #[error("Ring producer is already taken")]
    ProducerTaken,

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Pin(#[from] PinError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Parse a joint string such as `"XYZ"` or `"xxz"` (slaved axes repeat a
/// letter). Whitespace is ignored.
pub fn parse_axes(axes: &str) -> Result<AxisMap, FeederError> {
    let invalid = || FeederError::InvalidAxes(axes.to_string());
    let mut map = AxisMap::new();
    for c in axes.chars().filter(|c| !c.is_whitespace()) {
        let joint = match c.to_ascii_uppercase() {
            'X' => 0,
            'Y' => 1,
            'Z' => 2,
            'A' => 3,
            'B' => 4,
            'C' => 5,
            _ => return Err(invalid()),
        };
        map.push(joint).map_err(|_| invalid())?;
    }
    if map.is_empty() {
        return Err(invalid());
    }
    Ok(map)
}

struct FeedAxis {
    joint: usize,
    configured: bool,
    step_per_unit: f64,
    prev_target: i64,
    fb_delay: u32,
    pos_err_old: i64,
}

struct JointPins {
    joint: usize,
    cmd_pos: SignalHandle,
    fb_pos: SignalHandle,
    /// Generator axis whose step count is reported, if any is wired.
    fb_axis: Option<usize>,
}

/// Per-axis result of one servo period.
#[derive(Clone, Copy, Default)]
struct Segment {
    adder: i64,
    from: i64,
    to: i64,
    scan_sync: bool,
}

/// `stepgen.update`.
pub struct StepgenFeeder {
    producer: RingProducer,
    axes: heapless::Vec<FeedAxis, MAX_AXIS>,
    joints: heapless::Vec<JointPins, MAX_AXIS>,
    pwm_in: heapless::Vec<SignalHandle, MAX_PWM>,
    traj_wait: SignalHandle,
    scan_sync_in: SignalHandle,
    frames: Vec<Frame>,
    scanner_compat: bool,
    io_update_period: u32,
    io_counter: u32,
    max_pwm_value: f64,
    last_underruns: u32,
}

impl StepgenFeeder {
    fn frames_per_servo(&self) -> usize {
        self.frames.len()
    }

    fn observe_underruns(&mut self) {
        let count = self
            .producer
            .region_map()
            .region()
            .status
            .underrun_count
            .load(Ordering::Relaxed);
        if count != self.last_underruns {
            warn!(
                total = count,
                new = count.wrapping_sub(self.last_underruns),
                "stepgen: ring underrun"
            );
            self.last_underruns = count;
        }
    }

    fn update_pwm(&self) {
        let command = &self.producer.region_map().region().command;
        for (ch, pin) in self.pwm_in.iter().enumerate() {
            let percent = (pin.get_f64().abs() * 100.0 / self.max_pwm_value).clamp(0.0, 100.0);
            command.set_pwm_duty(ch, percent as u32);
        }
    }

    fn publish_feedback(&self) {
        let status = &self.producer.region_map().region().status;
        for joint in self.joints.iter() {
            let fb = match joint.fb_axis {
                Some(axis) => status.step_count(axis) as f64 / self.axes[axis].step_per_unit,
                None => joint.cmd_pos.get_f64(),
            };
            joint.fb_pos.set_f64(fb);
        }
    }

    /// Compute this period's segment for every axis.
    fn plan(&mut self) -> [Segment; MAX_AXIS] {
        let frames = self.frames_per_servo() as i128;
        let queued_periods = self.producer.len() / self.frames_per_servo() as u32;
        let status = &self.producer.region_map().region().status;
        let scan_sync = self.scanner_compat && self.scan_sync_in.get_bit();

        let mut segments = [Segment::default(); MAX_AXIS];
        for (index, axis) in self.axes.iter_mut().enumerate() {
            if !axis.configured {
                continue;
            }
            let Some(joint) = self.joints.iter().find(|j| j.joint == axis.joint) else {
                continue;
            };
            let target = (joint.cmd_pos.get_f64() * axis.step_per_unit).round();
            let target = if target.is_finite() {
                target as i64
            } else {
                axis.prev_target
            };
            let mut dist = target - axis.prev_target;

            if axis.fb_delay == 0 {
                let err = status.pos_error(index);
                if err != axis.pos_err_old {
                    if err < -1 {
                        dist -= 1;
                    } else if err > 1 {
                        dist += 1;
                    }
                    axis.pos_err_old = err;
                }
                axis.fb_delay = queued_periods;
            } else {
                axis.fb_delay -= 1;
            }

            let adder = ((i128::from(dist) << 31) / frames)
                .clamp(-i128::from(MAX_ADDER), i128::from(MAX_ADDER));
            segments[index] = Segment {
                adder: adder as i64,
                from: axis.prev_target,
                to: target,
                scan_sync: scan_sync && index == SCAN_AXIS,
            };
            axis.prev_target = target;
        }
        segments
    }

    fn fill_frames(&mut self, segments: &[Segment; MAX_AXIS]) {
        let n = self.frames.len() as i64;
        for (k, frame) in self.frames.iter_mut().enumerate() {
            let k = k as i64 + 1;
            for (cmd, seg) in frame.axes.iter_mut().zip(segments.iter()) {
                let position = seg.from + (seg.to - seg.from) * k / n;
                *cmd = AxisCommand::from_signed(seg.adder, position, seg.scan_sync);
            }
        }
    }
}

impl RtFunction for StepgenFeeder {
    fn name(&self) -> &str {
        "stepgen.update"
    }

    fn call(&mut self, _period_ns: i64) {
        self.observe_underruns();

        self.io_counter += 1;
        if self.io_counter >= self.io_update_period {
            self.io_counter = 0;
            self.update_pwm();
        }

        self.publish_feedback();

        if (self.producer.free_space() as usize) < self.frames_per_servo() {
            self.traj_wait.set_bit(false);
            return;
        }

        let segments = self.plan();
        self.fill_frames(&segments);
        match self.producer.push(&self.frames) {
            Ok(()) => self.traj_wait.set_bit(true),
            Err(RingError::Backpressure { requested, free }) => {
                warn!(requested, free, "stepgen: ring backpressure");
                self.traj_wait.set_bit(false);
            }
            Err(e) => {
                warn!(error = %e, "stepgen: push failed");
                self.traj_wait.set_bit(false);
            }
        }
    }
}

/// Undo what [`export`] installed on the device.
#[derive(Debug)]
pub struct StepgenTeardown {
    reserved: Vec<i32>,
}

impl StepgenTeardown {
    /// Board lines reserved by the feeder.
    pub fn reserved_pins(&self) -> &[i32] {
        &self.reserved
    }

    /// Disarm, clear the axis wiring and release the reserved lines.
    ///
    /// # Errors
    ///
    /// `Device(Armed)` if the generator has not yet acknowledged the disarm.
    pub fn run(self, device: &mut MotionDevice) -> Result<(), FeederError> {
        device.disarm();
        device.release_axes()?;
        release_pins(device, &self.reserved);
        info!(pins = self.reserved.len(), "stepgen: torn down");
        Ok(())
    }
}

fn release_pins(device: &mut MotionDevice, pins: &[i32]) {
    for &pin in pins.iter().rev() {
        if let Err(e) = device.ioctl(DeviceRequest::PinFree { pin }) {
            warn!(pin, error = %e, "stepgen: PIN_FREE failed");
        }
    }
}

fn reserve(device: &mut MotionDevice, pin: i32, reserved: &mut Vec<i32>) -> Result<(), FeederError> {
    device.ioctl(DeviceRequest::PinConf {
        pin,
        mode: PinMode::Reserved,
    })?;
    reserved.push(pin);
    Ok(())
}

/// Build the static settings for `config`, reserving every line it drives.
fn wire(
    device: &mut MotionDevice,
    config: &StepgenConfig,
    map: &AxisMap,
    reserved: &mut Vec<i32>,
) -> Result<StaticSettings, FeederError> {
    let mut settings = StaticSettings::default();

    for axis in 0..map.len() {
        let step = *config
            .step_pins
            .get(axis)
            .ok_or(FeederError::MissingEntry {
                field: "step_pins",
                axis,
            })?;
        let dir = config.dir_pins.get(axis).copied().unwrap_or(-1);
        if step < 0 {
            warn!(axis, "stepgen: no step line, axis skipped");
            continue;
        }
        let board = device.board();
        let is_input = |pin: i32| -> Result<bool, PinError> {
            Ok(pin >= 0 && board.pin(pin)?.mode == PinMode::Input)
        };
        if is_input(step)? || is_input(dir)? {
            warn!(axis, step, dir, "stepgen: input line used as output, axis skipped");
            continue;
        }
        let wiring = AxisConfig {
            configured: true,
            step: board.port_pin(step)?,
            dir: board.port_pin(dir)?,
            dir_inverted: config.dir_polarity.get(axis).copied().unwrap_or(false),
        };

        reserve(device, step, reserved)?;
        if dir >= 0 {
            reserve(device, dir, reserved)?;
        }
        settings.axes[axis] = wiring;
    }

    for (ch, &pin) in config.pwm_pins.iter().enumerate().take(MAX_PWM) {
        if pin >= 0 {
            settings.pwm[ch] = device.board().port_pin(pin)?;
            reserve(device, pin, reserved)?;
        }
    }

    if config.scanner_compat && config.scan_pin >= 0 {
        settings.scan = device.board().port_pin(config.scan_pin)?;
        reserve(device, config.scan_pin, reserved)?;
    }
    Ok(settings)
}

fn export_pins(
    registry: &Registry,
    owner: ComponentId,
    map: &AxisMap,
    settings: &StaticSettings,
) -> Result<heapless::Vec<JointPins, MAX_AXIS>, FeederError> {
    let mut joints = heapless::Vec::<JointPins, MAX_AXIS>::new();
    for (axis, &joint) in map.iter().enumerate() {
        if let Some(existing) = joints.iter_mut().find(|j| j.joint == joint) {
            if existing.fb_axis.is_none() && settings.axes[axis].configured {
                existing.fb_axis = Some(axis);
            }
            continue;
        }
        let cmd_pos = registry.create_signal(
            owner,
            &format!("stepgen.{joint}.cmd-pos"),
            SignalType::Float,
            PinDirection::In,
        )?;
        let fb_pos = registry.create_signal(
            owner,
            &format!("stepgen.{joint}.fb-pos"),
            SignalType::Float,
            PinDirection::Out,
        )?;
        let pins = JointPins {
            joint,
            cmd_pos,
            fb_pos,
            fb_axis: settings.axes[axis].configured.then_some(axis),
        };
        if joints.push(pins).is_err() {
            return Err(FeederError::InvalidAxes(format!("{map:?}")));
        }
    }
    Ok(joints)
}

/// Wire the axes on `device`, export the `stepgen` pins and build the
/// feeder function.
///
/// # Errors
///
/// Any failure releases the lines reserved so far.
pub fn export(
    registry: &Registry,
    device: &mut MotionDevice,
    config: &StepgenConfig,
    timing: &TimingConfig,
) -> Result<(StepgenFeeder, StepgenTeardown), FeederError> {
    let map = parse_axes(&config.axes)?;
    let frames = timing.frames_per_servo() as usize;
    if frames == 0 {
        return Err(FeederError::InvalidTiming {
            base_ns: timing.base_period_ns,
            servo_ns: timing.servo_period_ns,
        });
    }

    let mut reserved = Vec::new();
    match build(registry, device, config, &map, frames, &mut reserved) {
        Ok(feeder) => {
            info!(
                axes = map.len(),
                frames_per_servo = frames,
                fifo_deep = config.fifo_deep,
                "stepgen: feeder installed"
            );
            Ok((feeder, StepgenTeardown { reserved }))
        }
        Err(e) => {
            release_pins(device, &reserved);
            Err(e)
        }
    }
}

fn build(
    registry: &Registry,
    device: &mut MotionDevice,
    config: &StepgenConfig,
    map: &AxisMap,
    frames: usize,
    reserved: &mut Vec<i32>,
) -> Result<StepgenFeeder, FeederError> {
    let settings = wire(device, config, map, reserved)?;
    device.ioctl(DeviceRequest::RbSize(config.fifo_deep))?;
    device.ioctl(DeviceRequest::AxisSet(settings))?;
    device.ioctl(DeviceRequest::ScanPinSetup)?;

    let owner = registry.register_component("stepgen")?;
    let joints = export_pins(registry, owner, map, &settings)?;
    let traj_wait = registry.create_signal(
        owner,
        "stepgen.traj-wait-out",
        SignalType::Bit,
        PinDirection::Out,
    )?;
    traj_wait.set_bit(true);
    let scan_sync_in = registry.create_signal(
        owner,
        "stepgen.scan-sync-in",
        SignalType::Bit,
        PinDirection::In,
    )?;
    let mut pwm_in = heapless::Vec::<SignalHandle, MAX_PWM>::new();
    for ch in 0..config.pwm_pins.len().min(MAX_PWM) {
        let pin = registry.create_signal(
            owner,
            &format!("stepgen.{ch}.pwm-in"),
            SignalType::Float,
            PinDirection::In,
        )?;
        if pwm_in.push(pin).is_err() {
            break;
        }
    }

    let mut axes = heapless::Vec::<FeedAxis, MAX_AXIS>::new();
    for (axis, &joint) in map.iter().enumerate() {
        let step_per_unit =
            *config
                .step_per_unit
                .get(axis)
                .ok_or(FeederError::MissingEntry {
                    field: "step_per_unit",
                    axis,
                })?;
        let feed = FeedAxis {
            joint,
            configured: settings.axes[axis].configured,
            step_per_unit,
            prev_target: 0,
            fb_delay: 0,
            pos_err_old: 0,
        };
        if axes.push(feed).is_err() {
            return Err(FeederError::InvalidAxes(config.axes.clone()));
        }
    }

    let producer = device.take_producer().ok_or(FeederError::ProducerTaken)?;
    let last_underruns = producer
        .region_map()
        .region()
        .status
        .underrun_count
        .load(Ordering::Relaxed);

    Ok(StepgenFeeder {
        producer,
        axes,
        joints,
        pwm_in,
        traj_wait,
        scan_sync_in,
        frames: vec![Frame::IDLE; frames],
        scanner_compat: config.scanner_compat,
        io_update_period: config.io_update_period.max(1),
        io_counter: 0,
        max_pwm_value: config.max_pwm_value,
        last_underruns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axes_string_is_case_insensitive() {
        assert_eq!(parse_axes("xYz").unwrap().as_slice(), &[0, 1, 2]);
        assert_eq!(parse_axes(" X X C ").unwrap().as_slice(), &[0, 0, 5]);
    }

    #[test]
    fn axes_string_limits() {
        assert!(matches!(parse_axes(""), Err(FeederError::InvalidAxes(_))));
        assert!(matches!(parse_axes("XYZABCX"), Err(FeederError::InvalidAxes(_))));
        assert!(matches!(parse_axes("XQ"), Err(FeederError::InvalidAxes(_))));
        assert_eq!(parse_axes("XYZABC").unwrap().len(), MAX_AXIS);
    }
}
