//! Exchange memory between the control path and the step generator.
//!
//! This module contains:
//! - `exchange`: Layout of the shared region (static config, status, command block).
//! - `ring`: The SPSC motion ring and its take-once producer/consumer handles.
//! - `region`: Page-locked anonymous mapping that hosts the exchange layout.
//! - `io_helpers`: Port mask helpers used by the generator and the device.

pub mod exchange;
pub mod io_helpers;
pub mod region;
pub mod ring;
