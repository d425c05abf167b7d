//! Backup error types.

use crate::identifier::{BackupIdentifier, BackupIndexIdentifier};
use thiserror::Error;

/// Errors from a backup store.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("backup not found: {0}")]
    NotFound(BackupIdentifier),

    #[error("backup already exists: {0}")]
    AlreadyExists(BackupIdentifier),

    #[error("backup {id} is not completed ({status})")]
    NotCompleted { id: BackupIdentifier, status: String },

    #[error("backup index not found: {0}")]
    IndexNotFound(BackupIndexIdentifier),

    #[error("invalid file name in backup: {0}")]
    InvalidFileName(String),

    #[error("data corruption: {0}")]
    Corruption(String),
}

impl BackupError {
    /// Returns true if the operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackupError::Io(_))
    }
}
