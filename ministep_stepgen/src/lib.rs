//! # ministep step generator
//!
//! Base-rate step-pulse generator, the motion device control surface and the
//! servo-rate feeder that keeps the motion ring filled.
//!
//! # Module Structure
//!
//! - [`generator`] - DDS step generation, scan pulse, software PWM, GPIO transfers
//! - [`runner`] - Dedicated generator thread (RT setup behind the `rt` feature)
//! - [`device`] - Request surface: wiring, ring size, pin reservation, transfers
//! - [`board`] - mini2440 connector line table
//! - [`feeder`] - `stepgen.update`: joint positions to ring frames
//! - [`ports`] - GPIO port banks (simulated or memory-mapped)
//! - [`config`] - `ministep` configuration file
//!
//! # Architecture
//!
//! ```text
//!  servo thread                                   base thread
//! ┌──────────────────────┐   motion ring   ┌──────────────────────┐
//! │ pid → stepgen.update │ ──────────────► │    StepGenerator     │──► ports
//! └──────────┬───────────┘                 └──────────┬───────────┘
//!            │ ioctl                                  │ status
//!            ▼                                        ▼
//!     ┌──────────────┐   config / command   ┌──────────────────────┐
//!     │ MotionDevice │ ───────────────────► │    ExchangeRegion    │
//!     └──────────────┘                      └──────────────────────┘
//! ```

pub mod board;
pub mod config;
pub mod device;
pub mod feeder;
pub mod generator;
pub mod ports;
pub mod runner;

pub use crate::board::{Board, BoardPin, PinError};
pub use crate::config::MinistepConfig;
pub use crate::device::{DeviceError, DeviceReply, DeviceRequest, MotionDevice};
pub use crate::feeder::{FeederError, StepgenFeeder, StepgenTeardown};
pub use crate::generator::{GeneratorError, StepGenerator};
pub use crate::ports::{MappedPorts, PortBank, SimPorts};
pub use crate::runner::{GeneratorRunner, RunnerConfig, RunnerError};
