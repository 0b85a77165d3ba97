//! Error types for the heimdall-rs library.
//!
//! This module provides structured error handling for all heimdall operations.
//! The variants map onto the error taxonomy used across the analysis and
//! storage layers: invalid configuration, malformed input, transient and
//! permanent storage failures, timeouts, and concurrency conflicts.

use std::io;

use thiserror::Error;

/// Main result type for heimdall operations.
pub type Result<T> = std::result::Result<T, HeimdallError>;

/// Comprehensive error type for all heimdall operations.
#[derive(Error, Debug)]
pub enum HeimdallError {
    /// I/O related errors (file operations, directory creation, etc.)
    #[error("I/O error: {message}")]
    Io {
        /// Human-readable error message
        message: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Configuration errors (malformed YAML, failed validation)
    #[error("Configuration error: {message}")]
    Config {
        /// Error description
        message: String,
        /// Configuration field that caused the error
        field: Option<String>,
    },

    /// Validation errors for input data (run files, samples, CLI arguments)
    #[error("Validation error: {message}")]
    Validation {
        /// Error description
        message: String,
        /// Field or input that failed validation
        field: Option<String>,
    },

    /// Storage backend failures
    #[error("Storage error: {message}")]
    Storage {
        /// Error description
        message: String,
        /// Storage operation that failed
        operation: Option<String>,
        /// Whether a retry or fallback could plausibly succeed
        transient: bool,
        /// Underlying backend error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Bounded waits and network calls that ran out of time
    #[error("Timeout after {elapsed_ms} ms: {message}")]
    Timeout {
        /// Error description
        message: String,
        /// Elapsed time when the timeout fired
        elapsed_ms: u64,
    },

    /// Concurrent history replacement losing a last-write race
    #[error("Concurrency conflict: {message}")]
    Conflict {
        /// Error description
        message: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error description
        message: String,
        /// Data format being processed
        data_type: Option<String>,
        /// Underlying serialization error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        /// Error description
        message: String,
        /// Additional context
        context: Option<String>,
    },
}

impl HeimdallError {
    /// Create a new I/O error with context
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new configuration error with field context
    pub fn config_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new validation error with field context
    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a transient storage error (retry / fallback eligible)
    pub fn storage_transient(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            operation: None,
            transient: true,
            source: None,
        }
    }

    /// Create a permanent storage error (auth failure, missing bucket/database)
    pub fn storage_permanent(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            operation: None,
            transient: false,
            source: None,
        }
    }

    /// Create a new timeout error
    pub fn timeout(message: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            message: message.into(),
            elapsed_ms,
        }
    }

    /// Create a new concurrency conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: None,
        }
    }

    /// Attach the failing storage operation to a storage error
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        if let Self::Storage { operation: op, .. } = &mut self {
            *op = Some(operation.into());
        }
        self
    }

    /// Add context to an existing error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        if let Self::Internal { context: ctx, .. } = &mut self {
            *ctx = Some(context.into());
        }
        self
    }

    /// Whether a bounded retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io { .. } | Self::Timeout { .. } => true,
            Self::Storage { transient, .. } => *transient,
            _ => false,
        }
    }

    /// Whether the storage service may retry this failure through the
    /// filesystem fallback. Programmer errors (validation, configuration)
    /// must never be masked by a fallback.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Storage { .. } | Self::Timeout { .. }
        )
    }
}

// Implement From traits for common error types
impl From<io::Error> for HeimdallError {
    fn from(err: io::Error) -> Self {
        Self::io("I/O operation failed", err)
    }
}

impl From<serde_json::Error> for HeimdallError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("JSON serialization failed: {err}"),
            data_type: Some("JSON".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_yaml::Error> for HeimdallError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: format!("YAML serialization failed: {err}"),
            data_type: Some("YAML".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

impl From<object_store::Error> for HeimdallError {
    fn from(err: object_store::Error) -> Self {
        let transient = !matches!(
            err,
            object_store::Error::NotFound { .. }
                | object_store::Error::AlreadyExists { .. }
                | object_store::Error::InvalidPath { .. }
                | object_store::Error::NotSupported { .. }
                | object_store::Error::PermissionDenied { .. }
                | object_store::Error::Unauthenticated { .. }
                | object_store::Error::UnknownConfigurationKey { .. }
        );
        Self::Storage {
            message: format!("object store operation failed: {err}"),
            operation: None,
            transient,
            source: Some(Box::new(err)),
        }
    }
}

impl From<mongodb::error::Error> for HeimdallError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;

        let transient = matches!(
            *err.kind,
            ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } | ErrorKind::ConnectionPoolCleared { .. }
        );
        Self::Storage {
            message: format!("document store operation failed: {err}"),
            operation: None,
            transient,
            source: Some(Box::new(err)),
        }
    }
}

/// Result extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Add static context to an error result
    fn context(self, msg: &'static str) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<HeimdallError>,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }

    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| e.into().with_context(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = HeimdallError::config("invalid configuration");
        assert!(matches!(err, HeimdallError::Config { .. }));

        let err = HeimdallError::validation_field("missing stepText", "stepText");
        assert!(matches!(err, HeimdallError::Validation { .. }));
    }

    #[test]
    fn test_transient_classification() {
        assert!(HeimdallError::storage_transient("socket reset").is_transient());
        assert!(!HeimdallError::storage_permanent("bucket missing").is_transient());
        assert!(HeimdallError::timeout("wait_for_jobs", 2000).is_transient());
        assert!(!HeimdallError::config("bad threshold").is_transient());
    }

    #[test]
    fn test_fallback_eligibility() {
        assert!(HeimdallError::storage_permanent("bucket missing").is_fallback_eligible());
        assert!(!HeimdallError::validation("run file is not a sequence").is_fallback_eligible());
        assert!(!HeimdallError::config("missing connection").is_fallback_eligible());
    }

    #[test]
    fn test_storage_operation_context() {
        let err = HeimdallError::storage_transient("list failed").with_operation("aggregate_results");
        if let HeimdallError::Storage { operation, .. } = err {
            assert_eq!(operation.as_deref(), Some("aggregate_results"));
        } else {
            panic!("expected Storage error");
        }
    }
}
