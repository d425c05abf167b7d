//! Zero-copy reader over serialized log entries.

use crate::error::{ensure_readable, LogStreamError};
use crate::metadata::EventMetadata;
use crate::serializer::{
    ENTRY_HEADER_LENGTH, ENTRY_VERSION, KEY_OFFSET, METADATA_LENGTH_OFFSET, POSITION_OFFSET,
    SKIP_PROCESSING_OFFSET, SOURCE_POSITION_OFFSET, TIMESTAMP_OFFSET, VALUE_LENGTH_PREFIX,
};

/// A log entry as written by [`LogEntrySerializer`](crate::LogEntrySerializer).
///
/// Field accessors read directly from the borrowed buffer; all bounds are checked
/// once by [`wrap`](Self::wrap).
#[derive(Debug, Clone, Copy)]
pub struct LoggedEvent<'a> {
    buf: &'a [u8],
    metadata_length: usize,
    value_length: usize,
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_i64(buf: &[u8], at: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    i64::from_be_bytes(bytes)
}

impl<'a> LoggedEvent<'a> {
    /// Wraps the entry starting at `offset`.
    pub fn wrap(buf: &'a [u8], offset: usize) -> Result<Self, LogStreamError> {
        ensure_readable(buf, offset, ENTRY_HEADER_LENGTH, "entry header")?;
        let buf = &buf[offset..];

        let version = buf[0];
        if version != ENTRY_VERSION {
            return Err(LogStreamError::UnsupportedVersion(version));
        }

        let metadata_length = read_u32(buf, METADATA_LENGTH_OFFSET) as usize;
        let value_length_at = ENTRY_HEADER_LENGTH + metadata_length;
        ensure_readable(buf, value_length_at, VALUE_LENGTH_PREFIX, "value length")?;

        let value_length = read_u32(buf, value_length_at) as usize;
        let value_at = value_length_at + VALUE_LENGTH_PREFIX;
        ensure_readable(buf, value_at, value_length, "value")?;

        Ok(Self {
            buf: &buf[..value_at + value_length],
            metadata_length,
            value_length,
        })
    }

    /// Iterates over consecutive entries in `buf`.
    pub fn iter(buf: &'a [u8]) -> LoggedEvents<'a> {
        LoggedEvents { buf, offset: 0 }
    }

    pub fn version(&self) -> u8 {
        self.buf[0]
    }

    pub fn key(&self) -> i64 {
        read_i64(self.buf, KEY_OFFSET)
    }

    pub fn position(&self) -> i64 {
        read_i64(self.buf, POSITION_OFFSET)
    }

    pub fn source_event_position(&self) -> i64 {
        read_i64(self.buf, SOURCE_POSITION_OFFSET)
    }

    pub fn timestamp(&self) -> i64 {
        read_i64(self.buf, TIMESTAMP_OFFSET)
    }

    pub fn should_skip_processing(&self) -> bool {
        self.buf[SKIP_PROCESSING_OFFSET] != 0
    }

    pub fn metadata_length(&self) -> usize {
        self.metadata_length
    }

    /// Raw metadata bytes.
    pub fn metadata(&self) -> &'a [u8] {
        &self.buf[ENTRY_HEADER_LENGTH..ENTRY_HEADER_LENGTH + self.metadata_length]
    }

    /// Decodes the metadata block.
    pub fn read_metadata(&self) -> Result<EventMetadata, LogStreamError> {
        EventMetadata::read(self.metadata())
    }

    pub fn value(&self) -> &'a [u8] {
        let start = ENTRY_HEADER_LENGTH + self.metadata_length + VALUE_LENGTH_PREFIX;
        &self.buf[start..start + self.value_length]
    }

    /// Total size of the entry in bytes.
    pub fn length(&self) -> usize {
        self.buf.len()
    }
}

/// Iterator over entries laid out back to back, see [`LoggedEvent::iter`].
///
/// Stops after the first malformed entry.
#[derive(Debug)]
pub struct LoggedEvents<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for LoggedEvents<'a> {
    type Item = Result<LoggedEvent<'a>, LogStreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.buf.len() {
            return None;
        }
        match LoggedEvent::wrap(self.buf, self.offset) {
            Ok(event) => {
                self.offset += event.length();
                Some(Ok(event))
            }
            Err(e) => {
                self.offset = self.buf.len();
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::LogAppendEntry;
    use crate::metadata::{RecordType, ValueType};
    use crate::serializer::LogEntrySerializer;

    fn serialized(value: &'static [u8]) -> Vec<u8> {
        let serializer = LogEntrySerializer::new();
        let entry = LogAppendEntry::new(
            EventMetadata::new(RecordType::Event, ValueType::Message, 4),
            value,
        );
        let mut buf = vec![0u8; serializer.framed_length(&entry).unwrap()];
        serializer.serialize(&mut buf, 0, &entry, 10, -1, 99).unwrap();
        buf
    }

    #[test]
    fn test_wrap_rejects_unknown_version() {
        let mut buf = serialized(b"v");
        buf[0] = 7;
        assert!(matches!(
            LoggedEvent::wrap(&buf, 0),
            Err(LogStreamError::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn test_wrap_rejects_truncated_entry() {
        let buf = serialized(b"some value");
        for cut in [1, ENTRY_HEADER_LENGTH, buf.len() - 1] {
            assert!(matches!(
                LoggedEvent::wrap(&buf[..cut], 0),
                Err(LogStreamError::Truncated { .. })
            ));
        }
    }

    #[test]
    fn test_iterate_entries() {
        let mut buf = serialized(b"first");
        buf.extend_from_slice(&serialized(b"second"));

        let values: Vec<&[u8]> = LoggedEvent::iter(&buf)
            .map(|event| event.unwrap().value())
            .collect();
        assert_eq!(values, vec![&b"first"[..], &b"second"[..]]);
    }

    #[test]
    fn test_iterate_stops_on_error() {
        let mut buf = serialized(b"first");
        buf.extend_from_slice(&[ENTRY_VERSION, 0, 0]);

        let results: Vec<_> = LoggedEvent::iter(&buf).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
