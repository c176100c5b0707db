//! Error types for the yearwrap service
//!
//! Structured error definitions use thiserror; anyhow is only used at the
//! binary edge for propagation with context.

use thiserror::Error;

/// Failure kinds surfaced by the unlock gate.
///
/// Kept distinct so callers can tell "wrong code" apart from
/// "nothing to reveal".
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockError {
    /// No record exists for the requested id (and year)
    #[error("record not found")]
    NotFound,

    /// The record was created without an unlock code
    #[error("record has no contact hydration available")]
    NoSecretConfigured,

    /// The presented code does not match the stored one
    #[error("invalid unlock code")]
    Mismatch,
}

/// Main error type for yearwrap operations
#[derive(Error, Debug)]
pub enum WrapError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migration(String),

    /// Request rejected before any sanitize/store step
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown record, comparison or id/year pair
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unlock gate refused to release a hydration payload
    #[error("Unlock failed: {0}")]
    Unlock(#[from] UnlockError),

    /// Caller exceeded a request throttle
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// LLM API request failed
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for yearwrap operations
pub type Result<T> = std::result::Result<T, WrapError>;

impl From<libsql::Error> for WrapError {
    fn from(err: libsql::Error) -> Self {
        WrapError::Database(err.to_string())
    }
}

/// Convert anyhow::Error to WrapError
impl From<anyhow::Error> for WrapError {
    fn from(err: anyhow::Error) -> Self {
        WrapError::Other(err.to_string())
    }
}

impl From<crate::config::ConfigError> for WrapError {
    fn from(err: crate::config::ConfigError) -> Self {
        WrapError::Config(err.to_string())
    }
}
