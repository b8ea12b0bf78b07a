//! Recall error types
//!
//! Every operation fails locally and hands the decision (retry, skip, abort)
//! back to the caller. Malformed record blocks are not errors: they are
//! counted on the parsed document and logged.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Error category for structured logging and behavior mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Identifier does not resolve to a record in the expected scope
    NotFound,
    /// Add rejected by the title similarity check
    Duplicate,
    /// Input fails the required pattern (identifier grammar, enum value)
    InvalidFormat,
    /// Mutual exclusion could not be obtained within the lock policy
    LockUnavailable,
    /// Filesystem failure
    IoError,
    /// `config.toml` or env misconfigured
    ConfigError,
    /// JSON/TOML encoding failures
    SerializationError,
}

impl ErrorCategory {
    /// Machine-readable code for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Duplicate => "DUPLICATE",
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::LockUnavailable => "LOCK_UNAVAILABLE",
            Self::IoError => "IO_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::SerializationError => "SERIALIZATION_ERROR",
        }
    }

    /// Whether retrying the same operation later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockUnavailable)
    }
}

/// Recall error with category and context
#[derive(Debug, Error)]
pub enum RecallError {
    #[error("not found: {id}")]
    NotFound { id: String },

    #[error("duplicate of {existing_id}: {title:?}")]
    Duplicate { title: String, existing_id: String },

    #[error("invalid format: {input:?} (expected {expected})")]
    InvalidFormat { input: String, expected: String },

    #[error("lock unavailable for {path} after {waited:?}")]
    LockUnavailable { path: PathBuf, waited: Duration },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl RecallError {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Duplicate { .. } => ErrorCategory::Duplicate,
            Self::InvalidFormat { .. } => ErrorCategory::InvalidFormat,
            Self::LockUnavailable { .. } => ErrorCategory::LockUnavailable,
            Self::Io { .. } => ErrorCategory::IoError,
            Self::Config { .. } => ErrorCategory::ConfigError,
            Self::Serialization { .. } => ErrorCategory::SerializationError,
        }
    }

    /// Whether the caller may retry the operation unchanged
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn invalid_format(input: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::InvalidFormat {
            input: input.into(),
            expected: expected.into(),
        }
    }

    /// Create an I/O error bound to the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a serialization error with source
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for Recall operations
pub type Result<T> = std::result::Result<T, RecallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_codes() {
        assert_eq!(RecallError::not_found("L001").category().as_str(), "NOT_FOUND");
        assert_eq!(
            RecallError::invalid_format("X1", "L###").category(),
            ErrorCategory::InvalidFormat
        );
    }

    #[test]
    fn test_only_lock_errors_are_retryable() {
        let locked = RecallError::LockUnavailable {
            path: PathBuf::from("/tmp/LESSONS.md"),
            waited: Duration::from_millis(50),
        };
        assert!(locked.is_retryable());
        assert!(!RecallError::not_found("L001").is_retryable());
        assert!(!RecallError::config("bad").is_retryable());
    }

    #[test]
    fn test_display_carries_offending_input() {
        let err = RecallError::Duplicate {
            title: "Use rg".to_string(),
            existing_id: "L004".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("L004"));
        assert!(msg.contains("Use rg"));
    }
}
