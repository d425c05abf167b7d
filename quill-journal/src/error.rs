//! Journal error types.

use crate::segment::SegmentId;
use thiserror::Error;

/// The target buffer or segment cannot hold the bytes about to be written.
///
/// This is an expected outcome: the caller rolls over to a new segment (or grows
/// its buffer) and retries the same record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("insufficient space: need {required} bytes, {available} available")]
pub struct InsufficientSpace {
    pub required: usize,
    pub available: usize,
}

/// Errors that can occur during journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    InsufficientSpace(#[from] InsufficientSpace),

    #[error("record corrupted at offset {offset}: CRC mismatch (expected {expected:#x}, got {actual:#x})")]
    CorruptedRecord {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    #[error("invalid record at offset {offset}: {reason}")]
    InvalidRecord { offset: u64, reason: String },

    #[error("unsupported journal record format version: {0}")]
    UnsupportedFormat(u8),

    #[error("invalid descriptor for segment {segment}: {reason}")]
    InvalidDescriptor { segment: SegmentId, reason: String },

    #[error("record too large: {size} bytes (segment holds at most {max})")]
    RecordTooLarge { size: usize, max: usize },

    #[error("invalid record index: expected {expected}, got {actual}")]
    InvalidIndex { expected: u64, actual: u64 },

    #[error("invalid asqn {actual}: must be greater than the last asqn {last}")]
    InvalidAsqn { last: i64, actual: i64 },

    #[error("checksum mismatch for record {index}: expected {expected:#x}, computed {actual:#x}")]
    InvalidChecksum {
        index: u64,
        expected: u32,
        actual: u32,
    },

    #[error("journal is closed")]
    Closed,
}

impl JournalError {
    /// Returns whether the failed operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JournalError::Io(_) | JournalError::InsufficientSpace(_))
    }

    /// Returns whether this error means the bytes on disk cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            JournalError::CorruptedRecord { .. }
                | JournalError::InvalidRecord { .. }
                | JournalError::UnsupportedFormat(_)
        )
    }
}
