//! Generator scenarios driven tick by tick on simulated ports.

use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use ministep_common::consts::{MAX_ADDER, MAX_GPIO_PORTS};
use ministep_common::prelude::*;
use ministep_stepgen::board::Board;
use ministep_stepgen::device::{DeviceReply, DeviceRequest, MotionDevice};
use ministep_stepgen::generator::StepGenerator;
use ministep_stepgen::ports::{PortBank, SimPorts};

const STEP: PortPin = PortPin::new(2, 1 << 0);
const DIR: PortPin = PortPin::new(2, 1 << 1);
const SCAN: PortPin = PortPin::new(3, 1 << 0);
const PWM: PortPin = PortPin::new(4, 1 << 5);

struct Rig {
    map: Arc<RegionMap>,
    generator: StepGenerator<SimPorts>,
    producer: RingProducer,
}

impl Rig {
    fn new(dir_inverted: bool) -> Self {
        let map = RegionMap::open().unwrap();
        let region = map.region();
        region.config.axes[0].store(&AxisConfig {
            configured: true,
            step: STEP,
            dir: DIR,
            dir_inverted,
        });
        region.config.scan.store(SCAN);
        region.config.pwm[0].store(PWM);
        let generator = StepGenerator::new(&map, SimPorts::new()).unwrap();
        let producer = map.take_producer().unwrap();
        Self {
            map,
            generator,
            producer,
        }
    }

    fn arm(&mut self) {
        self.map.region().command.arm.store(true, Ordering::Release);
        self.generator.tick();
        assert!(self.generator.is_armed());
    }

    fn run(&mut self, adder: i64, ticks: usize, scan_sync: bool) {
        for _ in 0..ticks {
            let mut frame = Frame::IDLE;
            frame.axes[0] = AxisCommand::from_signed(adder, 0, scan_sync);
            self.producer.push(&[frame]).unwrap();
            self.generator.tick();
        }
    }

    fn high(&self, pin: PortPin) -> bool {
        self.generator.ports().read(pin.port) & pin.mask != 0
    }
}

#[test]
fn half_scale_adder_steps_every_other_tick() {
    let mut rig = Rig::new(false);
    rig.arm();
    rig.run(1 << 30, 8, false);
    assert_eq!(rig.generator.steps(0), 4);
    assert_eq!(rig.map.region().status.step_count(0), 4);
    // Even number of toggles.
    assert!(!rig.high(STEP));
}

#[test]
fn quarter_scale_adder_steps_every_fourth_tick() {
    let mut rig = Rig::new(false);
    rig.arm();
    rig.run(1 << 29, 3, false);
    assert_eq!(rig.generator.steps(0), 0);
    rig.run(1 << 29, 1, false);
    assert_eq!(rig.generator.steps(0), 1);
    assert!(rig.high(STEP));
    rig.run(1 << 29, 4, false);
    assert_eq!(rig.generator.steps(0), 2);
    assert_eq!(rig.map.region().status.step_count(0), 2);
    assert!(!rig.high(STEP));
}

#[test]
fn reverse_motion_counts_down_and_raises_dir() {
    let mut rig = Rig::new(false);
    rig.arm();
    rig.run(-(1 << 30), 8, false);
    assert_eq!(rig.generator.steps(0), -4);
    assert!(rig.high(DIR));
}

#[test]
fn inverted_dir_output() {
    let mut rig = Rig::new(true);
    rig.arm();
    rig.run(-(1 << 30), 2, false);
    assert!(!rig.high(DIR));
    rig.run(1 << 30, 2, false);
    assert!(rig.high(DIR));
}

#[test]
fn underrun_holds_the_last_adder() {
    let mut rig = Rig::new(false);
    rig.arm();
    let map = Arc::clone(&rig.map);
    let status = &map.region().status;
    let before = status.underrun_count.load(Ordering::Relaxed);

    rig.run(1 << 28, 2, false);
    assert!(!status.underrun.load(Ordering::Relaxed));

    for _ in 0..3 {
        rig.generator.tick();
    }
    assert_eq!(rig.generator.adder(0), 1 << 28);
    assert!(status.underrun.load(Ordering::Relaxed));
    assert_eq!(status.underrun_count.load(Ordering::Relaxed), before + 3);

    rig.run(0, 1, false);
    assert!(!status.underrun.load(Ordering::Relaxed));
    assert_eq!(rig.generator.adder(0), 0);
}

#[test]
fn disarm_drops_outputs_and_queued_frames() {
    let mut rig = Rig::new(false);
    rig.arm();
    rig.run(i64::from(MAX_ADDER), 2, false);
    assert!(rig.high(STEP));

    let mut frame = Frame::IDLE;
    frame.axes[0] = AxisCommand::from_signed(1 << 30, 0, false);
    rig.producer.push(&[frame; 10]).unwrap();

    let region = rig.map.region();
    region.command.arm.store(false, Ordering::Release);
    rig.generator.tick();

    assert!(!rig.generator.is_armed());
    assert!(!region.status.armed.load(Ordering::Acquire));
    assert!(!rig.high(STEP));
    assert!(region.ring.is_empty());
    assert_eq!(rig.generator.adder(0), 0);

    let steps = rig.generator.steps(0);
    rig.generator.tick();
    assert_eq!(rig.generator.steps(0), steps);
}

#[test]
fn steps_survive_rearm() {
    let mut rig = Rig::new(false);
    rig.arm();
    rig.run(1 << 30, 8, false);

    rig.map.region().command.arm.store(false, Ordering::Release);
    rig.generator.tick();
    rig.arm();

    assert_eq!(rig.generator.steps(0), 4);
    assert_eq!(rig.map.region().status.pos_error(0), 0);
}

#[test]
fn scan_output_follows_dds_events_while_synced() {
    let mut rig = Rig::new(false);
    rig.arm();

    let mut scan = Vec::new();
    for _ in 0..4 {
        rig.run(1 << 30, 1, true);
        scan.push(rig.high(SCAN));
    }
    assert_eq!(scan, [false, true, false, true]);

    rig.run(1 << 30, 2, false);
    assert!(!rig.high(SCAN));
}

#[test]
fn pwm_duty_is_high_ticks_per_hundred() {
    let mut rig = Rig::new(false);
    let map = Arc::clone(&rig.map);
    let region = map.region();
    region.command.set_pwm_duty(0, 30);
    region.status.take_changed();

    rig.arm();
    let mut high = usize::from(rig.high(PWM));
    for _ in 0..99 {
        rig.generator.tick();
        high += usize::from(rig.high(PWM));
    }
    assert_eq!(high, 30);
    assert!(region.status.take_changed().contains(ChangedOutputs::PWM0));
}

#[test]
fn gpio_transfer_is_applied_and_acknowledged() {
    let mut rig = Rig::new(false);
    let mut device = MotionDevice::with_region(Arc::clone(&rig.map), Board::mini2440());
    let status = &rig.map.region().status;

    let mut set = [0u32; MAX_GPIO_PORTS];
    set[1] = 0b1010;
    let clear = [0u32; MAX_GPIO_PORTS];
    let Ok(DeviceReply::TransferSeq(seq)) =
        device.ioctl(DeviceRequest::PinTransfer { set, clear })
    else {
        panic!("transfer not accepted");
    };
    assert_ne!(status.transfer_ack.load(Ordering::Acquire), seq);

    // Applied while disarmed.
    rig.generator.tick();
    assert_eq!(status.transfer_ack.load(Ordering::Acquire), seq);
    assert_eq!(rig.generator.ports().read(1), 0b1010);
    assert_eq!(status.port_levels[1].load(Ordering::Relaxed), 0b1010);

    let changed = status.take_changed();
    assert!(changed.contains(ChangedOutputs::TRANSFER));
    assert_eq!(changed.ports(), 1 << 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn step_count_matches_phase_accumulation(
        adder in 1i64..=i64::from(MAX_ADDER),
        ticks in 1usize..200,
    ) {
        let mut rig = Rig::new(false);
        rig.arm();
        rig.run(adder, ticks, false);

        let expected = (i128::from(adder) * ticks as i128) >> 31;
        prop_assert_eq!(i128::from(rig.generator.steps(0)), expected);
    }
}
