//! logfs Common - Shared types and utilities
//!
//! This crate provides the alignment helpers, common types, error
//! definitions and configuration used across all logfs components.

pub mod bitwise;
pub mod config;
pub mod error;
pub mod types;

pub use bitwise::{
    Unsigned, is_power_of_2, mod_by_power_of_2, round_down_to_multiple_of_power_of_2,
    round_up_to_multiple_of_power_of_2,
};
pub use config::{BenchConfig, BufferConfig, Config, DeviceConfig};
pub use error::{BootstrapError, Error, PathLookupError, Result};
pub use types::*;
