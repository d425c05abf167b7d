//! Log stream error types.

use thiserror::Error;

/// Errors that can occur while writing or reading log entries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogStreamError {
    #[error("timestamp must be non-negative, got {0}")]
    NegativeTimestamp(i64),

    #[error("position must be non-negative, got {0}")]
    NegativePosition(i64),

    #[error("source event position must be -1 or non-negative, got {0}")]
    InvalidSourcePosition(i64),

    #[error("entry has no metadata")]
    MissingMetadata,

    #[error("entry has no value")]
    MissingValue,

    #[error("source index {index} does not reference an entry in a batch of {batch_size}")]
    InvalidSourceIndex { index: i32, batch_size: usize },

    #[error("{what} of {length} bytes exceeds the u32 length prefix")]
    TooLong { what: &'static str, length: usize },

    #[error("position overflow: {first} + {offset}")]
    PositionOverflow { first: i64, offset: usize },

    #[error("insufficient space: need {required} bytes, {available} available")]
    InsufficientSpace { required: usize, available: usize },

    #[error("unsupported entry version: {0}")]
    UnsupportedVersion(u8),

    #[error("truncated {what}: need {needed} bytes, {available} available")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("unknown record type: {0}")]
    UnknownRecordType(u8),

    #[error("unknown value type: {0}")]
    UnknownValueType(u8),

    #[error("unknown rejection type: {0}")]
    UnknownRejectionType(u8),

    #[error("rejection reason is not valid UTF-8")]
    InvalidUtf8,
}

impl LogStreamError {
    /// Returns true if the caller can retry with a larger buffer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LogStreamError::InsufficientSpace { .. })
    }

    /// Returns true if the error was raised by input validation, before any byte
    /// was written.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LogStreamError::NegativeTimestamp(_)
                | LogStreamError::NegativePosition(_)
                | LogStreamError::InvalidSourcePosition(_)
                | LogStreamError::MissingMetadata
                | LogStreamError::MissingValue
                | LogStreamError::InvalidSourceIndex { .. }
                | LogStreamError::TooLong { .. }
                | LogStreamError::PositionOverflow { .. }
        )
    }
}

/// Converts a field length to its u32 wire prefix.
pub(crate) fn length_prefix(what: &'static str, length: usize) -> Result<u32, LogStreamError> {
    u32::try_from(length).map_err(|_| LogStreamError::TooLong { what, length })
}

pub(crate) fn ensure_space(
    buf: &[u8],
    offset: usize,
    required: usize,
) -> Result<(), LogStreamError> {
    let available = buf.len().saturating_sub(offset);
    if available < required {
        return Err(LogStreamError::InsufficientSpace {
            required,
            available,
        });
    }
    Ok(())
}

pub(crate) fn ensure_readable(
    buf: &[u8],
    offset: usize,
    needed: usize,
    what: &'static str,
) -> Result<(), LogStreamError> {
    let available = buf.len().saturating_sub(offset);
    if available < needed {
        return Err(LogStreamError::Truncated {
            what,
            needed,
            available,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_prefix() {
        assert_eq!(length_prefix("value", 0), Ok(0));
        assert_eq!(length_prefix("value", u32::MAX as usize), Ok(u32::MAX));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_length_prefix_overflow() {
        let length = u32::MAX as usize + 1;
        let err = length_prefix("value", length).unwrap_err();
        assert_eq!(err, LogStreamError::TooLong { what: "value", length });
        assert!(err.is_validation());
    }
}
