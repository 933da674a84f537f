//! Error types for vigil
//!
//! Every failure carries an [`ErrorCategory`] so the gateway can attribute it
//! to a pipeline stage and the telemetry hub can count it.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for vigil operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A parameter field was unknown, mistyped or out of range
    #[error("invalid parameter `{field}`: {reason}")]
    Validation { field: String, reason: String },

    /// A lifecycle transition is already in flight or not valid from the current state
    #[error("conflict: {0}")]
    Conflict(String),

    /// The client exhausted one of its rate windows
    #[error("rate limit exceeded ({window} window, limit {limit}); retry after {}s", retry_after.as_secs())]
    RateLimited {
        window: &'static str,
        limit: u32,
        retry_after: Duration,
    },

    /// The guarded operation did not finish before its deadline
    #[error("deadline exceeded after {}ms", timeout.as_millis())]
    Timeout { timeout: Duration },

    /// Unknown model id
    #[error("model not found: {0}")]
    NotFound(String),

    /// Inference was requested while no model is resident
    #[error("no model is loaded")]
    NotLoaded,

    /// The inference engine reported an internal failure
    #[error("engine failure: {0}")]
    Engine(String),

    /// The artifact repository could not deliver a model
    #[error("repository error: {0}")]
    Repository(String),

    /// Missing or unknown credential
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Credential lacks elevated privileges
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a validation error naming the offending field
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a conflict error with the given message
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create an engine failure with the given message
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    /// Create a repository error with the given message
    pub fn repository(msg: impl Into<String>) -> Self {
        Self::Repository(msg.into())
    }

    /// Category used for telemetry accounting and stage attribution
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Validation { .. } => ErrorCategory::Validation,
            Error::Conflict(_) => ErrorCategory::Conflict,
            Error::RateLimited { .. } => ErrorCategory::RateLimited,
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::NotFound(_) => ErrorCategory::NotFound,
            Error::NotLoaded => ErrorCategory::NotLoaded,
            Error::Engine(_) => ErrorCategory::EngineFailure,
            Error::Repository(_) => ErrorCategory::Repository,
            Error::Unauthorized(_) => ErrorCategory::Unauthorized,
            Error::Forbidden(_) => ErrorCategory::Forbidden,
            Error::Io(_) | Error::Serialization(_) => ErrorCategory::Internal,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Conflict,
    RateLimited,
    Timeout,
    NotFound,
    NotLoaded,
    EngineFailure,
    Repository,
    Unauthorized,
    Forbidden,
    Internal,
}

impl ErrorCategory {
    /// All categories, in counter order
    pub const ALL: [ErrorCategory; 11] = [
        ErrorCategory::Validation,
        ErrorCategory::Conflict,
        ErrorCategory::RateLimited,
        ErrorCategory::Timeout,
        ErrorCategory::NotFound,
        ErrorCategory::NotLoaded,
        ErrorCategory::EngineFailure,
        ErrorCategory::Repository,
        ErrorCategory::Unauthorized,
        ErrorCategory::Forbidden,
        ErrorCategory::Internal,
    ];

    /// Position of this category in [`ErrorCategory::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::NotLoaded => "not_loaded",
            ErrorCategory::EngineFailure => "engine_failure",
            ErrorCategory::Repository => "repository",
            ErrorCategory::Unauthorized => "unauthorized",
            ErrorCategory::Forbidden => "forbidden",
            ErrorCategory::Internal => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_names_field() {
        let err = Error::validation("topK", "must be between 1 and 100");
        assert!(err.to_string().contains("topK"));
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[test]
    fn test_rate_limited_message_carries_retry_hint() {
        let err = Error::RateLimited {
            window: "minute",
            limit: 60,
            retry_after: Duration::from_secs(42),
        };
        assert!(err.to_string().contains("retry after 42s"));
        assert_eq!(err.category(), ErrorCategory::RateLimited);
    }

    #[test]
    fn test_category_index_matches_all_order() {
        for (i, category) in ErrorCategory::ALL.iter().enumerate() {
            assert_eq!(category.index(), i);
        }
    }

    #[test]
    fn test_io_errors_are_internal() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into();
        assert_eq!(err.category(), ErrorCategory::Internal);
    }
}
