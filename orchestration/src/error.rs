//! Error types for the orchestration backplane
//!
//! One taxonomy shared by every service: callers match on the kind to decide
//! whether to retry, surface, or abort.

use thiserror::Error;

/// Result type alias for orchestration operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors surfaced by the orchestration core
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Input does not meet declared shape or bounds
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Referenced element does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Illegal state transition, id-space exhaustion, or a persistent
    /// optimistic-concurrency mismatch
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Structural limit exceeded (hierarchy depth, capacity)
    #[error("Constraint violated: {message}")]
    Constraint { message: String },

    /// A collaborator (store, worktree manager, session manager, dispatch)
    /// failed; context names the subsystem and operation
    #[error("{subsystem} failure during {operation}: {message}")]
    External {
        subsystem: &'static str,
        operation: String,
        message: String,
    },

    /// A bounded operation exceeded its budget
    #[error("{operation} timed out after {budget_ms}ms")]
    Timeout { operation: String, budget_ms: u64 },
}

impl OrchestratorError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not-found error for an entity kind (task, agent, issue)
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a constraint error
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Create an external error with subsystem and operation context
    pub fn external(
        subsystem: &'static str,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::External {
            subsystem,
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, budget_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            budget_ms,
        }
    }

    /// Short machine-readable kind tag, used in events and scan reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Constraint { .. } => "constraint",
            Self::External { .. } => "external",
            Self::Timeout { .. } => "timeout",
        }
    }

    /// Check if this error is retryable (transient failure)
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::External { message, .. } => {
                let lower = message.to_lowercase();
                // Lock contention and network hiccups
                lower.contains("lock")
                    || lower.contains("timeout")
                    || lower.contains("connection")
                    || lower.contains("network")
                    || lower.contains("another git process")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::not_found("task", "el-abc1");
        assert_eq!(err.to_string(), "task not found: el-abc1");

        let err = OrchestratorError::external("store", "update", "disk full");
        assert!(err.to_string().contains("store"));
        assert!(err.to_string().contains("update"));

        let err = OrchestratorError::timeout("test run", 60_000);
        assert!(err.to_string().contains("60000ms"));
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(OrchestratorError::validation("bad").kind(), "validation");
        assert_eq!(OrchestratorError::conflict("taken").kind(), "conflict");
        assert_eq!(OrchestratorError::constraint("deep").kind(), "constraint");
    }

    #[test]
    fn test_is_retryable() {
        // Lock contention from git is retryable
        let err = OrchestratorError::external("worktree", "merge", "unable to create lock file");
        assert!(err.is_retryable());

        // Timeouts are retryable
        let err = OrchestratorError::timeout("ping", 1_000);
        assert!(err.is_retryable());

        // Validation never is
        let err = OrchestratorError::validation("priority out of range");
        assert!(!err.is_retryable());

        // Plain external failures are not
        let err = OrchestratorError::external("store", "create", "schema violation");
        assert!(!err.is_retryable());
    }
}
