//! Error taxonomy for the memory engine.
//!
//! Validation and not-found errors go back to the immediate caller. Oracle
//! errors are absorbed by each pipeline stage according to its fail-open
//! default. Store errors fail ingestion loudly and degrade recall to an
//! empty result.

use thiserror::Error;

/// Errors produced by the memory engine.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Malformed atom at ingestion (missing text, bad vector length, out-of-range score).
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown atom id.
    #[error("atom not found: {0}")]
    NotFound(String),

    /// An Oracle or Embedder call exceeded its deadline.
    #[error("oracle timed out during {0}")]
    OracleTimeout(&'static str),

    /// An Oracle or Embedder call failed outright.
    #[error("oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// The store could not be reached (poisoned lock, failed blocking task, I/O).
    #[error("memory store unavailable: {0}")]
    StoreUnavailable(String),

    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MemoryError {
    /// Whether this error came from the Oracle/Embedder side.
    pub fn is_oracle(&self) -> bool {
        matches!(self, Self::OracleTimeout(_) | Self::OracleUnavailable(_))
    }
}

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, MemoryError>;
