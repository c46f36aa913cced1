//! ministep Common Library
//!
//! Shared constants, configuration loading and the data blocks exchanged
//! between the control path and the step-pulse generator.
//!
//! # Module Structure
//!
//! - [`consts`] - System-wide limits (axes, ring capacity, PWM channels)
//! - [`config`] - Configuration loading traits and types
//! - [`device`] - Device-control opcodes shared by both sides of the device surface
//! - [`shm`] - Exchange blocks, motion ring and the mapped exchange region
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! ministep = { package = "ministep_common", path = "../ministep_common" }
//! ```
//!
//! ```rust
//! use ministep_common::consts::MAX_AXIS;
//! use ministep_common::config::{ConfigLoader, SharedConfig};
//! ```

pub mod config;
pub mod consts;
pub mod device;
pub mod prelude;
pub mod shm;
