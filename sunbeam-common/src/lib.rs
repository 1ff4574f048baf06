//! Shared types for Sunbeam deployment tooling.
//!
//! Error catalog, configuration loading, unit naming and test logging used by
//! the `sunbeam-juju` engine and the `sunbeam` CLI.

pub mod config;
pub mod errors;
pub mod testing;
pub mod types;

pub use config::{ConfigError, LoadedConfig, SunbeamConfig};
pub use errors::{ErrorCategory, ErrorCode, ErrorEntry, JujuError};
pub use types::{Endpoint, UnitName, application_of_unit, unit_belongs_to};
