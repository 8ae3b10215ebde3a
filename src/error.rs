//! Custom error types for Trellis.
//!
//! This module provides structured error types that enable better
//! error handling, reporting, and recovery throughout the engine.

use crate::model::TaskId;
use thiserror::Error;

/// Main error type for Trellis operations
#[derive(Error, Debug)]
pub enum TrellisError {
    // =========================================================================
    // Graph Errors
    // =========================================================================
    /// Referenced task does not exist in the snapshot
    #[error("Task not found: {id}")]
    TaskNotFound { id: TaskId },

    /// Index-addressed timer entry does not exist
    #[error("Timer entry {index} out of range for task {id} (len {len})")]
    EntryOutOfRange {
        id: TaskId,
        index: usize,
        len: usize,
    },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// Durable backend call failed
    #[error("Persistence failure during {operation}: {message}")]
    Persistence { operation: String, message: String },

    /// A stored record could not be decoded; skipped during loads,
    /// surfaced when decoding is mandatory
    #[error("Malformed stored record {key}: {reason}")]
    MalformedRecord { key: String, reason: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrellisError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a not-found error
    pub fn not_found(id: &TaskId) -> Self {
        Self::TaskNotFound { id: id.clone() }
    }

    /// Create a persistence error
    pub fn persistence(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Persistence {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a malformed-record error
    pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            key: key.into(),
            reason: reason.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error came from the durable backend. These are the
    /// failures the reconciler may swallow on optimistic paths.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }

    /// Check if this error indicates a bad caller-supplied reference
    /// (unknown task or entry index) rather than an infrastructure fault.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::TaskNotFound { .. } | Self::EntryOutOfRange { .. }
        )
    }
}

/// Type alias for Trellis results
pub type Result<T> = std::result::Result<T, TrellisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrellisError::EntryOutOfRange {
            id: TaskId::from("t9"),
            index: 3,
            len: 1,
        };
        assert!(err.to_string().contains("t9"));
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn test_is_persistence() {
        assert!(TrellisError::persistence("update", "disk full").is_persistence());
        assert!(!TrellisError::not_found(&TaskId::from("a")).is_persistence());
    }

    #[test]
    fn test_is_caller_error() {
        assert!(TrellisError::not_found(&TaskId::from("a")).is_caller_error());
        assert!(!TrellisError::persistence("delete", "timeout").is_caller_error());
    }

    #[test]
    fn test_json_wrapping() {
        let json_err = serde_json::from_str::<crate::model::Task>("{").unwrap_err();
        let err: TrellisError = json_err.into();
        assert!(matches!(err, TrellisError::Json(_)));
    }
}
