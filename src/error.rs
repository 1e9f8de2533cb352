//! Error types for the cache layer
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache layer.
///
/// The error is `Clone` so that one failed computation can be handed to every
/// caller waiting on it.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Configuration rejected at construction
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Backing store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Filesystem failure inside a file-backed store
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Value could not be converted to or from its stored form
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Compressed payload could not be produced or decoded
    #[error("Compression error: {0}")]
    Compression(String),

    /// A `get_or_set` factory failed
    #[error("Factory failed: {0}")]
    Factory(Arc<anyhow::Error>),

    /// An in-flight computation was abandoned before it produced a value
    #[error("Computation cancelled: {0}")]
    Cancelled(String),

    /// The manager has been torn down
    #[error("Cache manager has been destroyed")]
    Destroyed,
}

impl CacheError {
    /// Wraps a factory failure.
    pub fn factory(err: impl Into<anyhow::Error>) -> Self {
        CacheError::Factory(Arc::new(err.into()))
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache layer.
pub type Result<T> = std::result::Result<T, CacheError>;
