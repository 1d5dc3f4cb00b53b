//! Error types for Cortex

use thiserror::Error;

/// Result type alias for Cortex operations
pub type Result<T> = std::result::Result<T, CortexError>;

/// Main error type for Cortex
#[derive(Error, Debug)]
pub enum CortexError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: i64 },

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Vector decode error: {0}")]
    Decode(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(feature = "openai")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CortexError {
    /// Memory lookup miss (absent, tenant mismatch, or hidden archived row)
    pub fn memory_not_found(id: i64) -> Self {
        CortexError::NotFound { kind: "Memory", id }
    }

    /// Bundle lookup miss
    pub fn bundle_not_found(id: i64) -> Self {
        CortexError::NotFound { kind: "Bundle", id }
    }

    /// True for NotFound, so callers can map it to 404 semantics
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CortexError::NotFound { .. } | CortexError::EntityNotFound(_)
        )
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            CortexError::ProviderUnavailable(_) => true,
            #[cfg(feature = "openai")]
            CortexError::Http(_) => true,
            CortexError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Stable numeric code for callers that surface errors over a wire protocol
    pub fn code(&self) -> i64 {
        match self {
            CortexError::NotFound { .. } | CortexError::EntityNotFound(_) => -32001,
            CortexError::Validation(_) => -32602,
            CortexError::ProviderUnavailable(_) => -32010,
            CortexError::Decode(_) => -32011,
            CortexError::Config(_) => -32012,
            _ => -32000,
        }
    }
}
