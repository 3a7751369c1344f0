//! Error taxonomy for the incubator
//!
//! Every domain operation returns [`IncubatorResult`]. The control plane maps
//! each variant onto a structured JSON-RPC error through [`ErrorCategory`].

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::runtime::RuntimeError;

/// Broad error category, stable across releases and exposed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed input, caught before dispatch
    Validation,
    /// Unknown robot or skill
    NotFound,
    /// Request clashes with current state
    Conflict,
    /// Container runtime unreachable or unresponsive
    Runtime,
    /// Credentials rejected
    Auth,
    /// Anything unanticipated
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Runtime => "runtime",
            Self::Auth => "auth",
            Self::Internal => "internal",
        }
    }
}

/// Incubator errors
#[derive(Debug, Error)]
pub enum IncubatorError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Robot not found: {0}")]
    RobotNotFound(String),

    #[error("Skill {task} not found on robot {robot}")]
    SkillNotFound { robot: String, task: String },

    #[error("Task {0} is already running")]
    AlreadyRunning(String),

    #[error("Task {0} is not running")]
    NotRunning(String),

    #[error("Robot {robot} already knows image {image}")]
    SkillAlreadyLearned { robot: String, image: String },

    #[error("Network conflict: {0}")]
    NetworkConflict(String),

    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Container runtime error: {0}")]
    RuntimeFailed(String),

    #[error("Container runtime did not answer {operation} within {after:?}")]
    RuntimeTimeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for incubator operations
pub type IncubatorResult<T> = Result<T, IncubatorError>;

impl IncubatorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest(_) => ErrorCategory::Validation,
            Self::RobotNotFound(_) | Self::SkillNotFound { .. } => ErrorCategory::NotFound,
            Self::AlreadyRunning(_)
            | Self::NotRunning(_)
            | Self::SkillAlreadyLearned { .. }
            | Self::NetworkConflict(_) => ErrorCategory::Conflict,
            Self::RuntimeUnavailable(_) | Self::RuntimeFailed(_) | Self::RuntimeTimeout { .. } => {
                ErrorCategory::Runtime
            }
            Self::AuthFailed(_) => ErrorCategory::Auth,
            Self::Internal(_) | Self::Io(_) | Self::Json(_) => ErrorCategory::Internal,
        }
    }

    /// Variant name, used as the machine-readable `kind` on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::RobotNotFound(_) => "RobotNotFound",
            Self::SkillNotFound { .. } => "SkillNotFound",
            Self::AlreadyRunning(_) => "AlreadyRunning",
            Self::NotRunning(_) => "NotRunning",
            Self::SkillAlreadyLearned { .. } => "SkillAlreadyLearned",
            Self::NetworkConflict(_) => "NetworkConflict",
            Self::RuntimeUnavailable(_) => "RuntimeUnavailable",
            Self::RuntimeFailed(_) => "RuntimeFailed",
            Self::RuntimeTimeout { .. } => "RuntimeTimeout",
            Self::AuthFailed(_) => "AuthFailed",
            Self::Internal(_) | Self::Io(_) | Self::Json(_) => "InternalError",
        }
    }

    pub fn is_runtime(&self) -> bool {
        self.category() == ErrorCategory::Runtime
    }
}

impl From<RuntimeError> for IncubatorError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Unavailable(msg) => Self::RuntimeUnavailable(msg),
            RuntimeError::NameConflict(name) => Self::AlreadyRunning(name),
            RuntimeError::NotFound(what) => Self::NotRunning(what),
            RuntimeError::Failed(msg) => Self::RuntimeFailed(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_keeps_subsecond_deadline() {
        let err = IncubatorError::RuntimeTimeout {
            operation: "start",
            after: Duration::from_millis(50),
        };
        assert_eq!(
            err.to_string(),
            "Container runtime did not answer start within 50ms"
        );
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            IncubatorError::RobotNotFound("r".into()).category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            IncubatorError::AlreadyRunning("t".into()).category(),
            ErrorCategory::Conflict
        );
        assert_eq!(
            IncubatorError::RuntimeTimeout {
                operation: "start",
                after: Duration::from_secs(5)
            }
            .category(),
            ErrorCategory::Runtime
        );
        assert_eq!(
            IncubatorError::Internal("boom".into()).category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_runtime_error_conversion() {
        let err: IncubatorError = RuntimeError::Unavailable("socket closed".into()).into();
        assert_eq!(err.kind(), "RuntimeUnavailable");
        assert!(err.to_string().contains("socket closed"));

        let err: IncubatorError = RuntimeError::NameConflict("rallf_task_1".into()).into();
        assert_eq!(err.kind(), "AlreadyRunning");
    }
}
