//! Error catalog and definitions for Sunbeam
//!
//! This module provides the `JujuError` type used across the workspace and a
//! catalog mapping each error to a unique code with remediation steps.
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                               |
//! |------------|-------------|-------------------------------------------|
//! | E001-E099  | Config      | Configuration and argument errors         |
//! | E100-E199  | Connection  | Controller and model connectivity         |
//! | E200-E299  | Model       | Missing or inconsistent model entities    |
//! | E300-E399  | Wait        | Convergence waits, timeouts and actions   |
//! | E500-E599  | Internal    | Internal/unexpected errors                |

pub mod catalog;
pub mod juju;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};
pub use juju::JujuError;
