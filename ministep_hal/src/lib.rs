//! # ministep HAL
//!
//! Signal registry and the periodic control components that compute the
//! values consumed by the step generator.
//!
//! # Module Structure
//!
//! - [`registry`] - Fixed-capacity arena of named, typed pins and parameters
//! - [`thread`] - Periodic threads and the exported-function trait
//! - [`components`] - PID loop, pulse counter, simulated encoder
//! - [`config`] - Load-time component configuration (channel counts, debug flags)
//! - [`error`] - Component setup errors
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ministep_hal                          │
//! │  ┌────────────┐   handles   ┌──────────────────────────────┐ │
//! │  │  Registry  │◄───────────►│ Components (pid, counter, …) │ │
//! │  │  (arena)   │             └──────────────┬───────────────┘ │
//! │  └────────────┘                            │ RtFunction       │
//! │                                            ▼                  │
//! │                                  ┌──────────────────┐         │
//! │                                  │  PeriodicThread  │         │
//! │                                  └──────────────────┘         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Components receive the registry at construction and keep handles; the
//! periodic path never looks anything up by name.

pub mod components;
pub mod config;
pub mod error;
pub mod registry;
pub mod thread;

pub use crate::config::ComponentsConfig;
pub use crate::error::ComponentError;
pub use crate::registry::{
    ComponentId, ParamAccess, PinDirection, Registry, RegistryError, SignalHandle, SignalInfo,
    SignalKind, SignalType, Value,
};
pub use crate::thread::{PeriodicThread, RtFunction};
