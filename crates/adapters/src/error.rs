//! Error types for the adapter layer
//!
//! Native driver errors are carried as-is so callers keep the backend's own
//! message and code. "Record not found" is not an error here: it is reported
//! through [`AdapterResponse`](crate::types::AdapterResponse) with
//! `success: false`.

use crate::descriptor::BackendKind;

/// Result type alias for adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Error types for adapter operations
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Connection string did not match any recognized scheme
    #[error("{0}")]
    Parse(String),

    /// Backend kind is known to the parser but not to the caller's context
    #[error("Unsupported database type: {0}")]
    UnsupportedDatabase(String),

    /// Backend unreachable, authentication rejected or connect timeout
    #[error("Failed to connect to {backend}: {message}")]
    Connection { backend: BackendKind, message: String },

    /// Malformed caller input, rejected before any I/O
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Error body returned by a REST backend
    #[error("{backend} API error ({status}): {message}")]
    Api {
        backend: BackendKind,
        status: u16,
        message: String,
    },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AdapterError {
    pub fn connection(backend: BackendKind, message: impl std::fmt::Display) -> Self {
        AdapterError::Connection {
            backend,
            message: message.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AdapterError::Validation(message.into())
    }

    /// Whether the Supabase adapter may retry this failure through SQL.
    ///
    /// Caller mistakes and local encoding problems would fail the same way
    /// on the second path, so only transport and API failures qualify.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self,
            AdapterError::Http(_) | AdapterError::Api { .. } | AdapterError::Connection { .. }
        )
    }
}
