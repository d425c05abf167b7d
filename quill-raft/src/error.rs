//! Raft metadata error types.

use thiserror::Error;

/// Invalid membership configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("configuration time must be positive, got {0}")]
    InvalidTime(i64),
}

/// Errors from a [`ConfigurationCodec`](crate::ConfigurationCodec).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] ConfigurationError),
}

/// Errors from the [`MetaStore`](crate::MetaStore).
#[derive(Debug, Error)]
pub enum MetaStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode configuration: {0}")]
    Codec(#[from] CodecError),

    #[error("stored configuration is corrupt: {0}")]
    CorruptConfiguration(String),

    #[error("meta file is corrupt: {0}")]
    CorruptMeta(String),

    #[error("{0} too large: {1} bytes")]
    TooLarge(&'static str, usize),

    #[error("meta store is closed")]
    Closed,
}

impl MetaStoreError {
    /// Returns true if the operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MetaStoreError::Io(_))
    }
}
