//! Configuration system for Sunbeam tooling.
//!
//! This module provides configuration management including:
//! - TOML configuration file with humantime durations
//! - Environment variable overrides with type safety
//! - Source tracking for debugging
//! - Validation on load

pub mod env;
pub mod file;
pub mod source;

pub use env::{EnvError, EnvParser};
pub use file::{
    ConfigError, DEFAULT_COMMAND_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT,
    JujuSettings, LoadedConfig, LogSettings, SunbeamConfig, WaitSettings, default_config_path,
};
pub use source::{ConfigSource, Sourced};
