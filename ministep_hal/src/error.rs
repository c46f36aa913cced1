//! Error types for component setup.

use thiserror::Error;

use crate::registry::RegistryError;

/// Errors raised while configuring or exporting a component.
///
/// Each is fatal to the component being set up only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComponentError {
    /// Channel count outside the supported range.
    #[error("{component}: invalid num_chan {requested} (1..={max})")]
    InvalidChannelCount {
        /// Component name
        component: &'static str,
        /// Requested channel count
        requested: u32,
        /// Largest supported channel count
        max: u32,
    },

    /// Exporting a pin, parameter or component failed.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}
