//! Core Error Types
//!
//! The uniform failure taxonomy returned by every layer of the crate.
//! Compiler and builder errors are returned from the call that received the
//! malformed input; transport failures only ever reach callers through a
//! [`Response`](crate::response::Response) envelope.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core module result type
pub type DbResult<T> = Result<T, DbError>;

/// Error taxonomy
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DbError {
    // ==================
    // Input Errors
    // ==================
    /// A predicate or document value failed a field constraint, or a
    /// predicate used an unknown operator suffix
    #[error("Validation error on field '{field}': expected {expected}, got {actual}")]
    Validation {
        field: String,
        expected: String,
        actual: String,
    },

    /// The input is well-formed value-wise but cannot be compiled
    #[error("Compile error: {0}")]
    Compile(String),

    // ==================
    // Transport Errors
    // ==================
    /// Deadline exceeded while waiting on the transport
    #[error("Operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Pool exhausted or transport unreachable
    #[error("Connection error: {0}")]
    Connection(String),

    /// Opaque failure reported by the store, message kept verbatim
    #[error("{0}")]
    Store(String),
}

impl DbError {
    /// Create a validation error
    pub fn validation(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a compile error
    pub fn compile(msg: impl Into<String>) -> Self {
        Self::Compile(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Get the taxonomy bucket
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Compile(_) => ErrorKind::Compile,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Connection(_) => ErrorKind::Connection,
            Self::Store(_) => ErrorKind::Store,
        }
    }

    /// Get error code for envelopes and logs
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Whether the error was raised before any transport call
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::Compile(_))
    }
}

/// Serializable error classification carried by failed envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    Compile,
    Timeout,
    Connection,
    Store,
}

impl ErrorKind {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Compile => "COMPILE_ERROR",
            ErrorKind::Timeout => "TIMEOUT_ERROR",
            ErrorKind::Connection => "CONNECTION_ERROR",
            ErrorKind::Store => "STORE_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            DbError::validation("age", "int", "string").code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(DbError::compile("x").code(), "COMPILE_ERROR");
        assert_eq!(
            DbError::Timeout(Duration::from_millis(5)).code(),
            "TIMEOUT_ERROR"
        );
        assert_eq!(DbError::connection("down").code(), "CONNECTION_ERROR");
        assert_eq!(DbError::store("boom").code(), "STORE_ERROR");
    }

    #[test]
    fn test_store_message_verbatim() {
        let err = DbError::store("E11000 duplicate key error");
        assert_eq!(err.to_string(), "E11000 duplicate key error");
    }

    #[test]
    fn test_validation_message_names_field() {
        let err = DbError::validation("age", "int", "string \"abc\"");
        let msg = err.to_string();
        assert!(msg.contains("'age'"));
        assert!(msg.contains("expected int"));
    }

    #[test]
    fn test_input_errors() {
        assert!(DbError::compile("x").is_input_error());
        assert!(!DbError::store("x").is_input_error());
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::Timeout).unwrap();
        assert_eq!(json, "\"TIMEOUT\"");
    }
}
