//! Shared test support.

pub mod log;

pub use log::init_global_test_logging;
