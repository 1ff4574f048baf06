//! Errors raised while talking to the Juju control plane and while waiting
//! for a model to converge.

use super::catalog::ErrorCode;
use thiserror::Error;

/// Error type shared by the connection layer, the status updater, the
/// convergence waiter and the helper facade.
#[derive(Debug, Error)]
pub enum JujuError {
    /// Transport-level failure; the status updater retries these.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("controller {controller:?} is not reachable: {reason}")]
    ControllerNotReachable { controller: String, reason: String },

    #[error("model {0:?} not found")]
    ModelNotFound(String),

    #[error("application {application:?} is missing from model {model:?}")]
    ApplicationNotFound { application: String, model: String },

    #[error("unit {unit:?} is missing from model {model:?}")]
    UnitNotFound { unit: String, model: String },

    #[error("machine {machine:?} is missing from model {model:?}")]
    MachineNotFound { machine: String, model: String },

    #[error("leader for application {application:?} is missing from model {model:?}")]
    LeaderNotFound { application: String, model: String },

    /// A waited-on application is absent from a status snapshot.
    #[error("application {application:?} not found in status of model {model:?}")]
    UnknownApplication { application: String, model: String },

    #[error("{0}")]
    Timeout(String),

    /// Aggregate of every hard failure observed during one wait.
    #[error("error while waiting for model {model:?} to be ready: {}", join_errors(.errors))]
    Wait { model: String, errors: Vec<JujuError> },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("name {0:?} has invalid format, should be a valid unit of format application/id")]
    InvalidUnitName(String),

    #[error("action {action:?} on {unit:?} finished with status {status:?}")]
    ActionFailed {
        unit: String,
        action: String,
        status: String,
        output: serde_json::Value,
    },

    #[error("command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("secret {0:?} not found")]
    SecretNotFound(String),

    #[error("invalid status payload for model {model:?}: {reason}")]
    InvalidStatus { model: String, reason: String },

    #[error("control plane error: {0}")]
    Api(String),
}

fn join_errors(errors: &[JujuError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl JujuError {
    /// Whether this error is a transport failure that a reconnect can fix.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::ConnectionClosed(_))
    }

    /// Whether this error is a wait budget expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Underlying errors of an aggregate wait failure, empty otherwise.
    pub fn wait_errors(&self) -> &[JujuError] {
        match self {
            Self::Wait { errors, .. } => errors,
            _ => &[],
        }
    }

    /// Catalog code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ConnectionClosed(_) => ErrorCode::ConnectionClosed,
            Self::ControllerNotReachable { .. } => ErrorCode::ControllerNotReachable,
            Self::ModelNotFound(_) => ErrorCode::ModelNotFound,
            Self::ApplicationNotFound { .. } => ErrorCode::ApplicationNotFound,
            Self::UnitNotFound { .. } => ErrorCode::UnitNotFound,
            Self::MachineNotFound { .. } => ErrorCode::MachineNotFound,
            Self::LeaderNotFound { .. } => ErrorCode::LeaderNotFound,
            Self::UnknownApplication { .. } => ErrorCode::UnknownApplication,
            Self::Timeout(_) => ErrorCode::WaitTimeout,
            Self::Wait { .. } => ErrorCode::WaitFailed,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::InvalidUnitName(_) => ErrorCode::InvalidUnitName,
            Self::ActionFailed { .. } => ErrorCode::ActionFailed,
            Self::CommandFailed { .. } => ErrorCode::CommandFailed,
            Self::SecretNotFound(_) => ErrorCode::SecretNotFound,
            Self::InvalidStatus { .. } => ErrorCode::InvalidStatus,
            Self::Api(_) => ErrorCode::ApiError,
        }
    }
}
