//! # AppError
//!
//! Centralized error handling for the Reclaim engine.
//! Every port and service returns these so callers can match on the failure class
//! instead of parsing messages.

use thiserror::Error;

/// The primary error type for all rc-core operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Resource not found (e.g., Post, Conversation, Message).
    /// Usually means a rival confirmation already retired the conversation.
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Missing or malformed input. Raised before any side effect.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Media store failure. The transition that needed the upload was not written.
    #[error("upload failed: {0}")]
    Upload(String),

    /// The caller is not allowed to perform the operation, or the store refused it.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A competing write got there first (pending request exists, precondition failed).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Infrastructure failure (e.g., DB down, serialization bug)
    #[error("internal service error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(kind: &str, id: impl ToString) -> Self {
        Self::NotFound(kind.to_string(), id.to_string())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Wraps a plugin-level `anyhow` error at the port boundary.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }

    /// Whether the user can simply try again (network blips, lost races).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upload(_) | Self::Internal(_) | Self::Conflict(_))
    }
}

/// A specialized Result type for Reclaim logic.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_formats_kind_and_id() {
        let err = AppError::not_found("Conversation", "abc");
        assert_eq!(err.to_string(), "Conversation not found with ID abc");
    }

    #[test]
    fn validation_is_not_retryable() {
        assert!(!AppError::validation("reason is required").is_retryable());
        assert!(AppError::Upload("timeout".into()).is_retryable());
    }
}
