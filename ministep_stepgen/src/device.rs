//! Control surface of the motion device.
//!
//! Configuration reaches the generator through [`MotionDevice::ioctl`]; the
//! exchange region itself is shared zero-copy through
//! [`MotionDevice::map_status`]. Every request runs on the control path and
//! never blocks the generator.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use thiserror::Error;
use tracing::{debug, info, warn};

use ministep_common::consts::{MAX_AXIS, MAX_GPIO_PORTS, MAX_PWM};
use ministep_common::device::{DeviceOpcode, PinMode};
use ministep_common::shm::exchange::{AxisConfig, PortPin, StaticSettings};
use ministep_common::shm::io_helpers::{mask_bit, port_in_range};
use ministep_common::shm::region::{RegionError, RegionMap};
use ministep_common::shm::ring::{RingConsumer, RingError, RingProducer};

use crate::board::{Board, PinError};

/// A request to the motion device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRequest {
    /// Install wiring. Only axes marked configured overwrite the current ones.
    AxisSet(StaticSettings),
    /// Reserved.
    PushBuff,
    PinConf { pin: i32, mode: PinMode },
    PinTransfer {
        set: [u32; MAX_GPIO_PORTS],
        clear: [u32; MAX_GPIO_PORTS],
    },
    /// Read back and log the active configuration.
    ScanPinSetup,
    /// Resize the ring; 0 reports the current size.
    RbSize(u32),
    PinFree { pin: i32 },
}

impl DeviceRequest {
    pub const fn opcode(&self) -> DeviceOpcode {
        match self {
            Self::AxisSet(_) => DeviceOpcode::AxisSet,
            Self::PushBuff => DeviceOpcode::PushBuff,
            Self::PinConf { .. } => DeviceOpcode::PinConf,
            Self::PinTransfer { .. } => DeviceOpcode::PinTransfer,
            Self::ScanPinSetup => DeviceOpcode::ScanPinSetup,
            Self::RbSize(_) => DeviceOpcode::RbSize,
            Self::PinFree { .. } => DeviceOpcode::PinFree,
        }
    }
}

/// Successful reply to a [`DeviceRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceReply {
    Done,
    RingSize(u32),
    Config(StaticSettings),
    /// Sequence number the generator acknowledges once the transfer is applied.
    TransferSeq(u32),
}

/// Motion device errors.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Invalid device request code {0}")]
    InvalidOpcode(u32),

    #[error("{0} is not supported")]
    Unsupported(DeviceOpcode),

    #[error("Request code {code} does not match {request}")]
    RequestMismatch {
        code: DeviceOpcode,
        request: DeviceOpcode,
    },

    #[error("{0} rejected: generator is armed")]
    Armed(DeviceOpcode),

    #[error("Invalid wiring for {line}: port {port}, mask {mask:#x}")]
    InvalidWiring { line: String, port: u8, mask: u32 },

    #[error("Previous GPIO transfer {0} not yet applied")]
    Busy(u32),

    #[error(transparent)]
    Ring(#[from] RingError),

    #[error(transparent)]
    Pin(#[from] PinError),

    #[error(transparent)]
    Region(#[from] RegionError),
}

/// The motion device: exchange region plus board pin reservations.
#[derive(Debug)]
pub struct MotionDevice {
    map: Arc<RegionMap>,
    board: Board,
}

impl MotionDevice {
    /// Map a fresh exchange region for the mini2440 board.
    ///
    /// # Errors
    ///
    /// `Region` if the exchange region cannot be mapped.
    pub fn open() -> Result<Self, DeviceError> {
        let map = RegionMap::open()?;
        info!(len = map.len(), locked = map.is_locked(), "motion device opened");
        Ok(Self::with_region(map, Board::mini2440()))
    }

    pub fn with_region(map: Arc<RegionMap>, board: Board) -> Self {
        Self { map, board }
    }

    /// Zero-copy view of the exchange region.
    pub fn map_status(&self) -> Arc<RegionMap> {
        Arc::clone(&self.map)
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn take_producer(&self) -> Option<RingProducer> {
        self.map.take_producer()
    }

    pub fn take_consumer(&self) -> Option<RingConsumer> {
        self.map.take_consumer()
    }

    /// Request the generator to run.
    pub fn arm(&self) {
        self.map.region().command.arm.store(true, Ordering::Release);
        info!("generator arm requested");
    }

    /// Request the generator to stop. It drives its outputs low and drops the
    /// queued frames on its next tick.
    pub fn disarm(&self) {
        self.map.region().command.arm.store(false, Ordering::Release);
        info!("generator disarm requested");
    }

    /// `true` while an arm is requested or not yet released by the generator.
    pub fn is_armed(&self) -> bool {
        let region = self.map.region();
        region.command.arm.load(Ordering::Acquire) || region.status.armed.load(Ordering::Acquire)
    }

    /// Handle a request given by its raw code.
    ///
    /// # Errors
    ///
    /// `InvalidOpcode` for an unknown code, `RequestMismatch` if `request`
    /// is for another code, otherwise as [`MotionDevice::ioctl`].
    pub fn ioctl_raw(
        &mut self,
        code: u32,
        request: DeviceRequest,
    ) -> Result<DeviceReply, DeviceError> {
        let op = DeviceOpcode::from_u32(code).ok_or(DeviceError::InvalidOpcode(code))?;
        if request.opcode() != op {
            return Err(DeviceError::RequestMismatch {
                code: op,
                request: request.opcode(),
            });
        }
        self.ioctl(request)
    }

    /// Handle a request.
    pub fn ioctl(&mut self, request: DeviceRequest) -> Result<DeviceReply, DeviceError> {
        let op = request.opcode();
        debug!(request = %op, "device request");
        match request {
            DeviceRequest::AxisSet(settings) => self.axis_set(&settings),
            DeviceRequest::PushBuff => Err(DeviceError::Unsupported(op)),
            DeviceRequest::PinConf { pin, mode } => {
                self.board.configure(pin, mode)?;
                Ok(DeviceReply::Done)
            }
            DeviceRequest::PinTransfer { set, clear } => self.pin_transfer(&set, &clear),
            DeviceRequest::ScanPinSetup => Ok(DeviceReply::Config(self.dump_config())),
            DeviceRequest::RbSize(size) => self.rb_size(size),
            DeviceRequest::PinFree { pin } => {
                self.board.release(pin)?;
                Ok(DeviceReply::Done)
            }
        }
    }

    fn axis_set(&self, settings: &StaticSettings) -> Result<DeviceReply, DeviceError> {
        if self.is_armed() {
            return Err(DeviceError::Armed(DeviceOpcode::AxisSet));
        }
        for (axis, wiring) in settings.axes.iter().enumerate() {
            if wiring.configured {
                check_line(&format!("axis {axis} step"), wiring.step, true)?;
                check_line(&format!("axis {axis} dir"), wiring.dir, false)?;
            }
        }
        check_line("scan", settings.scan, false)?;
        for (ch, pin) in settings.pwm.iter().enumerate() {
            check_line(&format!("pwm {ch}"), *pin, false)?;
        }

        let region = self.map.region();
        if settings.ring_size != 0 {
            region.ring.set_capacity(settings.ring_size)?;
        }
        for (axis, wiring) in settings.axes.iter().enumerate() {
            if wiring.configured {
                region.config.axes[axis].store(wiring);
                info!(
                    axis,
                    step_port = wiring.step.port,
                    step_mask = wiring.step.mask,
                    dir_port = wiring.dir.port,
                    dir_mask = wiring.dir.mask,
                    dir_inverted = wiring.dir_inverted,
                    "AXIS_SET: axis configured"
                );
            }
        }
        region.config.scan.store(settings.scan);
        for (slot, pin) in region.config.pwm.iter().zip(settings.pwm) {
            slot.store(pin);
        }
        Ok(DeviceReply::Done)
    }

    fn pin_transfer(
        &self,
        set: &[u32; MAX_GPIO_PORTS],
        clear: &[u32; MAX_GPIO_PORTS],
    ) -> Result<DeviceReply, DeviceError> {
        let region = self.map.region();
        let acked = region.status.transfer_ack.load(Ordering::Acquire);
        if let Some(pending) = region.command.pending_transfer(acked) {
            return Err(DeviceError::Busy(pending));
        }
        Ok(DeviceReply::TransferSeq(
            region.command.post_transfer(set, clear),
        ))
    }

    fn rb_size(&self, size: u32) -> Result<DeviceReply, DeviceError> {
        let ring = &self.map.region().ring;
        if size == 0 {
            return Ok(DeviceReply::RingSize(ring.capacity()));
        }
        if self.is_armed() {
            return Err(DeviceError::Armed(DeviceOpcode::RbSize));
        }
        ring.set_capacity(size)?;
        info!(size, "RB_SIZE: ring resized");
        Ok(DeviceReply::RingSize(size))
    }

    fn dump_config(&self) -> StaticSettings {
        let region = self.map.region();
        let mut settings = region.config.load();
        settings.ring_size = region.ring.capacity();

        info!(
            ring_size = settings.ring_size,
            scan_port = settings.scan.port,
            scan_mask = settings.scan.mask,
            "SCAN_PIN_SETUP: active configuration"
        );
        for (axis, wiring) in settings.axes.iter().enumerate() {
            info!(
                axis,
                configured = wiring.configured,
                step_port = wiring.step.port,
                step_mask = wiring.step.mask,
                dir_port = wiring.dir.port,
                dir_mask = wiring.dir.mask,
                dir_inverted = wiring.dir_inverted,
                "SCAN_PIN_SETUP: axis"
            );
        }
        for (ch, pin) in settings.pwm.iter().enumerate() {
            info!(ch, port = pin.port, mask = pin.mask, "SCAN_PIN_SETUP: pwm");
        }
        settings
    }

    /// Clear every axis, the scan pin and the PWM pins.
    ///
    /// # Errors
    ///
    /// `Armed` while the generator runs.
    pub fn release_axes(&self) -> Result<(), DeviceError> {
        if self.is_armed() {
            return Err(DeviceError::Armed(DeviceOpcode::AxisSet));
        }
        let region = self.map.region();
        for wiring in region.config.axes.iter() {
            wiring.store(&AxisConfig::UNCONFIGURED);
        }
        region.config.scan.store(PortPin::UNASSIGNED);
        for slot in region.config.pwm.iter() {
            slot.store(PortPin::UNASSIGNED);
        }
        info!(axes = MAX_AXIS, pwm = MAX_PWM, "axis wiring released");
        Ok(())
    }
}

/// A line must sit in an existing port and carry at most one bit; `required`
/// lines must carry exactly one.
fn check_line(line: &str, pin: PortPin, required: bool) -> Result<(), DeviceError> {
    let valid = if pin.is_assigned() {
        port_in_range(pin.port) && mask_bit(pin.mask).is_some()
    } else {
        !required
    };
    if valid {
        return Ok(());
    }
    warn!(line, port = pin.port, mask = pin.mask, "AXIS_SET: invalid wiring");
    Err(DeviceError::InvalidWiring {
        line: line.to_string(),
        port: pin.port,
        mask: pin.mask,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> MotionDevice {
        MotionDevice::open().unwrap()
    }

    fn axis(step_bit: u8, dir_bit: u8) -> AxisConfig {
        AxisConfig {
            configured: true,
            step: PortPin::new(2, 1 << step_bit),
            dir: PortPin::new(2, 1 << dir_bit),
            dir_inverted: false,
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        let mut dev = device();
        assert!(matches!(
            dev.ioctl_raw(2, DeviceRequest::PushBuff),
            Err(DeviceError::InvalidOpcode(2))
        ));
        assert!(matches!(
            dev.ioctl_raw(3, DeviceRequest::RbSize(0)),
            Err(DeviceError::RequestMismatch { .. })
        ));
    }

    #[test]
    fn axis_set_keeps_unconfigured_axes() {
        let mut dev = device();
        let mut first = StaticSettings::default();
        first.axes[0] = axis(0, 1);
        first.axes[1] = axis(2, 3);
        dev.ioctl(DeviceRequest::AxisSet(first)).unwrap();

        let mut second = StaticSettings::default();
        second.axes[1] = axis(4, 5);
        dev.ioctl(DeviceRequest::AxisSet(second)).unwrap();

        let config = dev.map_status().region().config.load();
        assert_eq!(config.axes[0], axis(0, 1));
        assert_eq!(config.axes[1], axis(4, 5));
        assert!(!config.axes[2].configured);
    }

    #[test]
    fn multi_bit_step_mask_is_rejected() {
        let mut dev = device();
        let mut settings = StaticSettings::default();
        settings.axes[0] = AxisConfig {
            step: PortPin::new(2, 0b11),
            ..axis(0, 1)
        };
        assert!(matches!(
            dev.ioctl(DeviceRequest::AxisSet(settings)),
            Err(DeviceError::InvalidWiring { .. })
        ));
        assert!(!dev.map_status().region().config.load().axes[0].configured);
    }

    #[test]
    fn release_axes_clears_wiring() {
        let mut dev = device();
        let mut settings = StaticSettings::default();
        settings.axes[0] = axis(0, 1);
        settings.pwm[0] = PortPin::new(3, 1);
        dev.ioctl(DeviceRequest::AxisSet(settings)).unwrap();

        dev.release_axes().unwrap();
        let config = dev.map_status().region().config.load();
        assert_eq!(config, StaticSettings::default());
    }
}
