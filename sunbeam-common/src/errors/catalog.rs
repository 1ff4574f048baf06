//! Error Catalog for Sunbeam deployment tooling
//!
//! Every failure surfaced to an operator maps to a stable code
//! (SB-E001 through SB-E599) with a message template and remediation steps.
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

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering all Sunbeam error scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Config Errors (E001-E099)
    // =========================================================================
    /// Configuration file not found
    ConfigNotFound,
    /// Configuration file could not be read or parsed
    ConfigParseError,
    /// Configuration contains invalid values
    ConfigValidationError,
    /// Environment variable has invalid value
    ConfigEnvError,
    /// Caller supplied an invalid argument
    InvalidArgument,
    /// Unit name is not of the form application/N
    InvalidUnitName,

    // =========================================================================
    // Connection Errors (E100-E199)
    // =========================================================================
    /// Connection to the control plane was closed
    ConnectionClosed,
    /// Controller could not be reached
    ControllerNotReachable,
    /// The juju binary failed to run a command
    CommandFailed,

    // =========================================================================
    // Model Errors (E200-E299)
    // =========================================================================
    /// Model does not exist on the controller
    ModelNotFound,
    /// Application is missing from the model
    ApplicationNotFound,
    /// Unit is missing from the model
    UnitNotFound,
    /// Machine is missing from the model
    MachineNotFound,
    /// No unit of the application is leader
    LeaderNotFound,
    /// Secret is missing from the model
    SecretNotFound,
    /// Status payload failed validation
    InvalidStatus,

    // =========================================================================
    // Wait Errors (E300-E399)
    // =========================================================================
    /// Wait budget elapsed before convergence
    WaitTimeout,
    /// One or more watched applications failed
    WaitFailed,
    /// Application named in a wait is unknown to the status source
    UnknownApplication,
    /// Action did not complete successfully
    ActionFailed,

    // =========================================================================
    // Internal Errors (E500-E599)
    // =========================================================================
    /// Control plane returned an unexpected error
    ApiError,
}

impl ErrorCode {
    /// Returns all error codes for iteration.
    #[must_use]
    pub const fn all() -> &'static [ErrorCode] {
        &[
            Self::ConfigNotFound,
            Self::ConfigParseError,
            Self::ConfigValidationError,
            Self::ConfigEnvError,
            Self::InvalidArgument,
            Self::InvalidUnitName,
            Self::ConnectionClosed,
            Self::ControllerNotReachable,
            Self::CommandFailed,
            Self::ModelNotFound,
            Self::ApplicationNotFound,
            Self::UnitNotFound,
            Self::MachineNotFound,
            Self::LeaderNotFound,
            Self::SecretNotFound,
            Self::InvalidStatus,
            Self::WaitTimeout,
            Self::WaitFailed,
            Self::UnknownApplication,
            Self::ActionFailed,
            Self::ApiError,
        ]
    }

    /// Returns the numeric portion of the error code.
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            // Config (001-099)
            Self::ConfigNotFound => 1,
            Self::ConfigParseError => 2,
            Self::ConfigValidationError => 3,
            Self::ConfigEnvError => 4,
            Self::InvalidArgument => 5,
            Self::InvalidUnitName => 6,

            // Connection (100-199)
            Self::ConnectionClosed => 100,
            Self::ControllerNotReachable => 101,
            Self::CommandFailed => 102,

            // Model (200-299)
            Self::ModelNotFound => 200,
            Self::ApplicationNotFound => 201,
            Self::UnitNotFound => 202,
            Self::MachineNotFound => 203,
            Self::LeaderNotFound => 204,
            Self::SecretNotFound => 205,
            Self::InvalidStatus => 206,

            // Wait (300-399)
            Self::WaitTimeout => 300,
            Self::WaitFailed => 301,
            Self::UnknownApplication => 302,
            Self::ActionFailed => 303,

            // Internal (500-599)
            Self::ApiError => 500,
        }
    }

    /// Returns the formatted error code string (e.g., "SB-E001").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("SB-E{:03}", self.code_number())
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Config,
            100..=199 => ErrorCategory::Connection,
            200..=299 => ErrorCategory::Model,
            300..=399 => ErrorCategory::Wait,
            _ => ErrorCategory::Internal,
        }
    }

    /// Returns the full error entry with all metadata.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Returns the error message template.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::ConfigNotFound => "Configuration file not found",
            Self::ConfigParseError => "Configuration file could not be parsed",
            Self::ConfigValidationError => "Configuration contains invalid values",
            Self::ConfigEnvError => "Environment variable has invalid value",
            Self::InvalidArgument => "Invalid argument",
            Self::InvalidUnitName => "Unit name must have the form application/N",

            Self::ConnectionClosed => "Connection to the control plane was closed",
            Self::ControllerNotReachable => "Controller is not reachable",
            Self::CommandFailed => "Control plane command failed",

            Self::ModelNotFound => "Model not found on controller",
            Self::ApplicationNotFound => "Application is missing from model",
            Self::UnitNotFound => "Unit is missing from model",
            Self::MachineNotFound => "Machine is missing from model",
            Self::LeaderNotFound => "No leader unit found for application",
            Self::SecretNotFound => "Secret not found in model",
            Self::InvalidStatus => "Status payload failed validation",

            Self::WaitTimeout => "Timed out waiting for model to converge",
            Self::WaitFailed => "Errors occurred while waiting for model to converge",
            Self::UnknownApplication => "Application is not known to the status source",
            Self::ActionFailed => "Action did not complete",

            Self::ApiError => "Control plane returned an unexpected error",
        }
    }

    /// Returns remediation steps for the error.
    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::ConfigNotFound => &[
                "Check the path passed with --config",
                "Omit --config to use ~/.config/sunbeam/config.toml or defaults",
            ],
            Self::ConfigParseError => &[
                "Validate the TOML syntax of the configuration file",
                "Durations use humantime syntax, e.g. \"15s\" or \"10m\"",
            ],
            Self::ConfigValidationError => &["Intervals and timeouts must be non-zero"],
            Self::ConfigEnvError => &["Check SUNBEAM_* environment variables for typos"],
            Self::InvalidArgument => &["Check the arguments of the failing call"],
            Self::InvalidUnitName => &["Use the unit name as shown by `juju status`, e.g. keystone/0"],

            Self::ConnectionClosed => &[
                "Check network connectivity to the controller",
                "The wait loop reconnects automatically; retry if the budget elapsed",
            ],
            Self::ControllerNotReachable => &[
                "Verify the controller is up: juju show-controller",
                "Check the configured controller name",
            ],
            Self::CommandFailed => &[
                "Run the failing juju command manually to inspect its output",
                "Check the configured juju binary path",
            ],

            Self::ModelNotFound => &["List models with: juju models"],
            Self::ApplicationNotFound => &["List applications with: juju status -m <model>"],
            Self::UnitNotFound => &["List units with: juju status -m <model>"],
            Self::MachineNotFound => &["List machines with: juju machines -m <model>"],
            Self::LeaderNotFound => &["Wait for leader election to settle and retry"],
            Self::SecretNotFound => &["List secrets with: juju secrets -m <model>"],
            Self::InvalidStatus => &[
                "Check the juju client and controller versions are compatible",
            ],

            Self::WaitTimeout => &[
                "Inspect the pending applications with: juju status -m <model>",
                "Increase the wait timeout if the deployment is still progressing",
            ],
            Self::WaitFailed => &["Review the individual errors listed with this failure"],
            Self::UnknownApplication => &[
                "Check the application name for typos",
                "Deploy the application before waiting on it",
            ],
            Self::ActionFailed => &["Inspect the action output with: juju show-task <id>"],

            Self::ApiError => &["Retry the operation", "Check the controller logs"],
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code_string())
    }
}

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration and argument errors (E001-E099)
    Config,
    /// Controller and model connectivity (E100-E199)
    Connection,
    /// Missing or inconsistent model entities (E200-E299)
    Model,
    /// Convergence waits, timeouts and actions (E300-E399)
    Wait,
    /// Internal/unexpected errors (E500-E599)
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable name for the category.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Config => "Configuration",
            Self::Connection => "Connection",
            Self::Model => "Model",
            Self::Wait => "Wait",
            Self::Internal => "Internal",
        }
    }
}

/// Complete error entry with all metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Error code string (e.g., "SB-E001")
    pub code: String,
    /// Error category
    pub category: ErrorCategory,
    /// Human-readable error message
    pub message: String,
    /// Steps to remediate the error
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Formats the error for display with full remediation steps.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut output = format!("[{}] {}\n\n", self.code, self.message);

        if !self.remediation.is_empty() {
            output.push_str("Remediation steps:\n");
            for (i, step) in self.remediation.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }

        output
    }

    /// Formats the error as a single line.
    #[must_use]
    pub fn format_brief(&self) -> String {
        format!("[{}] {}", self.code, self.message)
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_brief())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_numbers_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for code in ErrorCode::all() {
            let num = code.code_number();
            assert!(
                seen.insert(num),
                "Duplicate error code number: {} for {:?}",
                num,
                code
            );
        }
    }

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::ConfigNotFound.code_string(), "SB-E001");
        assert_eq!(ErrorCode::ConnectionClosed.code_string(), "SB-E100");
        assert_eq!(ErrorCode::ModelNotFound.code_string(), "SB-E200");
        assert_eq!(ErrorCode::WaitTimeout.code_string(), "SB-E300");
        assert_eq!(ErrorCode::ApiError.code_string(), "SB-E500");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(ErrorCode::InvalidArgument.category(), ErrorCategory::Config);
        assert_eq!(
            ErrorCode::ControllerNotReachable.category(),
            ErrorCategory::Connection
        );
        assert_eq!(ErrorCode::UnitNotFound.category(), ErrorCategory::Model);
        assert_eq!(ErrorCode::UnknownApplication.category(), ErrorCategory::Wait);
        assert_eq!(ErrorCode::ApiError.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_every_code_has_message_and_remediation() {
        for code in ErrorCode::all() {
            assert!(!code.message().is_empty(), "{:?} has no message", code);
            assert!(
                !code.remediation().is_empty(),
                "{:?} has no remediation",
                code
            );
        }
    }

    #[test]
    fn test_entry_format_full_numbers_steps() {
        let entry = ErrorCode::WaitTimeout.entry();
        let text = entry.format_full();
        assert!(text.starts_with("[SB-E300] Timed out waiting"));
        assert!(text.contains("  1. Inspect the pending applications"));
        assert!(text.contains("  2. Increase the wait timeout"));
    }

    #[test]
    fn test_entry_display_is_brief() {
        let entry = ErrorCode::ModelNotFound.entry();
        assert_eq!(entry.to_string(), "[SB-E200] Model not found on controller");
    }
}
