//! Error types for the Tandem ORM core.
//!
//! All public APIs return `TandemResult<T>` — no panics in library code.
//! Validation errors (`TypeMismatch`, `InvariantViolation`) are raised
//! synchronously; store errors always travel through the `Result` channel.

use thiserror::Error;

/// Unified error type for all Tandem operations.
#[derive(Debug, Error, Clone)]
pub enum TandemError {
    /// Fatal configuration error (duplicate model name, missing primary
    /// key, missing shard settings). Raised at registration or init time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Field value does not match the declared semantic type.
    #[error("type mismatch on {model}.{field}: expected {expected}, got {actual}")]
    TypeMismatch {
        model: String,
        field: String,
        expected: String,
        actual: String,
    },

    /// Programming error breaking a record invariant, e.g. reassigning an
    /// already-set primary key to a different value.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Durable or cache backend call failed.
    #[error("store error during {op} on '{model}': {message}")]
    Store {
        op: String,
        model: String,
        message: String,
    },

    /// A flush batch round-trip failed; individual jobs are retried once.
    #[error("batch flush failed: {0}")]
    BatchFailed(String),

    /// Requested model is not registered.
    #[error("model '{0}' not found")]
    ModelNotFound(String),

    /// Requested field does not exist on the model.
    #[error("field '{field}' not found on model '{model}'")]
    FieldNotFound { model: String, field: String },

    /// Wire encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Schema upgrade function failed while migrating a stored record.
    #[error("upgrade to version {version} failed: {message}")]
    UpgradeFailed { version: u32, message: String },

    /// Default-value generator failed during create.
    #[error("default generator for '{field}' failed: {message}")]
    DefaultFailed { field: String, message: String },
}

/// Result type alias for all Tandem operations.
pub type TandemResult<T> = Result<T, TandemError>;

impl TandemError {
    /// Shorthand for a store error, used by backends and drivers.
    pub fn store(op: &str, model: &str, message: impl Into<String>) -> Self {
        TandemError::Store {
            op: op.to_string(),
            model: model.to_string(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for TandemError {
    fn from(err: serde_json::Error) -> Self {
        TandemError::Serialization(err.to_string())
    }
}
