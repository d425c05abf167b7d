//! Binary layout of a log entry.
//!
//! Entry layout (all integers big-endian):
//!
//! ```text
//! +---------+---------+----------+-----------------------+-----------+-----------------+
//! | version | key     | position | source_event_position | timestamp | skip_processing |
//! | 1 byte  | 8 bytes | 8 bytes  | 8 bytes               | 8 bytes   | 1 byte          |
//! +---------+---------+----------+-----------------------+-----------+-----------------+
//! | metadata_length | metadata        | value_length | value                           |
//! | 4 bytes         | metadata_length | 4 bytes      | value_length                    |
//! +-----------------+-----------------+--------------+---------------------------------+
//! ```

use crate::entry::AppendEntry;
use crate::error::{ensure_space, length_prefix, LogStreamError};
use crate::metadata::EventMetadata;
use bytes::BufMut;

/// Version tag written at the start of every entry.
pub const ENTRY_VERSION: u8 = 1;

/// Size of the fixed header, up to and including the metadata length.
pub const ENTRY_HEADER_LENGTH: usize = 1 + 8 + 8 + 8 + 8 + 1 + 4;

/// Size of the value length prefix.
pub const VALUE_LENGTH_PREFIX: usize = 4;

/// Source event position of an entry that was not caused by another event.
pub const NO_SOURCE_POSITION: i64 = -1;

pub(crate) const KEY_OFFSET: usize = 1;
pub(crate) const POSITION_OFFSET: usize = KEY_OFFSET + 8;
pub(crate) const SOURCE_POSITION_OFFSET: usize = POSITION_OFFSET + 8;
pub(crate) const TIMESTAMP_OFFSET: usize = SOURCE_POSITION_OFFSET + 8;
pub(crate) const SKIP_PROCESSING_OFFSET: usize = TIMESTAMP_OFFSET + 8;
pub(crate) const METADATA_LENGTH_OFFSET: usize = SKIP_PROCESSING_OFFSET + 1;

/// Writes application records in the log entry layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEntrySerializer;

impl LogEntrySerializer {
    pub fn new() -> Self {
        Self
    }

    /// Number of bytes [`serialize`](Self::serialize) writes for `entry`.
    pub fn framed_length<E: AppendEntry + ?Sized>(
        &self,
        entry: &E,
    ) -> Result<usize, LogStreamError> {
        let (metadata, value) = parts(entry)?;
        Ok(framed_length(metadata, value))
    }

    /// Writes `entry` at `offset`, returning the number of bytes written.
    ///
    /// All inputs and the available space are checked before the first byte is
    /// written; on error `buf` is left unchanged.
    pub fn serialize<E: AppendEntry + ?Sized>(
        &self,
        buf: &mut [u8],
        offset: usize,
        entry: &E,
        position: i64,
        source_event_position: i64,
        timestamp: i64,
    ) -> Result<usize, LogStreamError> {
        validate_positions(position, source_event_position, timestamp)?;
        let (metadata, value) = parts(entry)?;
        let metadata_length = length_prefix("metadata", metadata.encoded_length())?;
        let value_length = length_prefix("value", value.len())?;

        let length = framed_length(metadata, value);
        ensure_space(buf, offset, length)?;

        let mut dst = &mut buf[offset..offset + ENTRY_HEADER_LENGTH];
        dst.put_u8(ENTRY_VERSION);
        dst.put_i64(entry.key());
        dst.put_i64(position);
        dst.put_i64(source_event_position);
        dst.put_i64(timestamp);
        dst.put_u8(entry.skip_processing() as u8);
        dst.put_u32(metadata_length);

        let mut cursor = offset + ENTRY_HEADER_LENGTH;
        cursor += metadata.write(buf, cursor)?;

        let mut dst = &mut buf[cursor..cursor + VALUE_LENGTH_PREFIX + value.len()];
        dst.put_u32(value_length);
        dst.put_slice(value);

        Ok(length)
    }
}

pub(crate) fn validate_positions(
    position: i64,
    source_event_position: i64,
    timestamp: i64,
) -> Result<(), LogStreamError> {
    if timestamp < 0 {
        return Err(LogStreamError::NegativeTimestamp(timestamp));
    }
    if position < 0 {
        return Err(LogStreamError::NegativePosition(position));
    }
    if source_event_position < NO_SOURCE_POSITION {
        return Err(LogStreamError::InvalidSourcePosition(source_event_position));
    }
    Ok(())
}

fn parts<E: AppendEntry + ?Sized>(entry: &E) -> Result<(&EventMetadata, &[u8]), LogStreamError> {
    let metadata = entry.metadata().ok_or(LogStreamError::MissingMetadata)?;
    let value = entry.value().ok_or(LogStreamError::MissingValue)?;
    Ok((metadata, value))
}

fn framed_length(metadata: &EventMetadata, value: &[u8]) -> usize {
    ENTRY_HEADER_LENGTH + metadata.encoded_length() + VALUE_LENGTH_PREFIX + value.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{processed, LogAppendEntry};
    use crate::event::LoggedEvent;
    use crate::metadata::{RecordType, RejectionType, ValueType};
    use bytes::Bytes;
    use proptest::prelude::*;

    fn entry() -> LogAppendEntry {
        LogAppendEntry::new(
            EventMetadata::new(RecordType::Event, ValueType::ProcessInstance, 2),
            Bytes::from_static(b"\x81\xa3foo\xa3bar"),
        )
        .with_key(1)
    }

    #[test]
    fn test_serialize_roundtrip() {
        let serializer = LogEntrySerializer::new();
        let entry = entry();
        let mut buf = vec![0u8; serializer.framed_length(&entry).unwrap()];

        let written = serializer.serialize(&mut buf, 0, &entry, 2, 3, 4).unwrap();
        assert_eq!(written, buf.len());

        let event = LoggedEvent::wrap(&buf, 0).unwrap();
        assert_eq!(event.version(), ENTRY_VERSION);
        assert_eq!(event.key(), 1);
        assert_eq!(event.position(), 2);
        assert_eq!(event.source_event_position(), 3);
        assert_eq!(event.timestamp(), 4);
        assert!(!event.should_skip_processing());
        assert_eq!(event.read_metadata().unwrap(), *entry.metadata().unwrap());
        assert_eq!(event.value(), entry.value().unwrap());
        assert_eq!(event.length(), written);
    }

    #[test]
    fn test_serialize_processed_entry() {
        let serializer = LogEntrySerializer::new();
        let entry = LogAppendEntry::new(
            EventMetadata::new(RecordType::Event, ValueType::ProcessInstance, 2)
                .with_request(3, 77)
                .with_rejection(RejectionType::InvalidArgument, "bad variable"),
            Bytes::from_static(b"\x81\xa3foo\xa3bar"),
        )
        .with_key(1);
        let wrapped = processed(&entry);
        let mut buf = vec![0u8; serializer.framed_length(&wrapped).unwrap()];

        serializer.serialize(&mut buf, 0, &wrapped, 2, 3, 4).unwrap();

        let mut plain_buf = vec![0u8; serializer.framed_length(&entry).unwrap()];
        serializer.serialize(&mut plain_buf, 0, &entry, 2, 3, 4).unwrap();

        let event = LoggedEvent::wrap(&buf, 0).unwrap();
        let plain = LoggedEvent::wrap(&plain_buf, 0).unwrap();
        assert!(event.should_skip_processing());
        assert!(!plain.should_skip_processing());
        assert_eq!(event.key(), plain.key());
        assert_eq!(event.position(), plain.position());
        assert_eq!(event.source_event_position(), plain.source_event_position());
        assert_eq!(event.timestamp(), plain.timestamp());
        assert_eq!(event.metadata_length(), plain.metadata_length());
        assert_eq!(event.metadata(), plain.metadata());
        assert_eq!(event.value(), plain.value());

        // Only the skip flag differs
        let differing: Vec<_> = (0..buf.len()).filter(|&i| buf[i] != plain_buf[i]).collect();
        assert_eq!(differing, vec![SKIP_PROCESSING_OFFSET]);
    }

    #[test]
    fn test_serialize_at_offset() {
        let serializer = LogEntrySerializer::new();
        let entry = entry();
        let length = serializer.framed_length(&entry).unwrap();
        let mut buf = vec![0xAAu8; 10 + length];

        serializer.serialize(&mut buf, 10, &entry, 0, NO_SOURCE_POSITION, 0).unwrap();
        assert!(buf[..10].iter().all(|&b| b == 0xAA));

        let event = LoggedEvent::wrap(&buf, 10).unwrap();
        assert_eq!(event.source_event_position(), NO_SOURCE_POSITION);
    }

    #[test]
    fn test_negative_timestamp_leaves_buffer_unchanged() {
        let serializer = LogEntrySerializer::new();
        let entry = entry();
        let mut buf = vec![0u8; 256];

        let result = serializer.serialize(&mut buf, 0, &entry, 2, 3, -1);
        assert_eq!(result, Err(LogStreamError::NegativeTimestamp(-1)));
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_negative_position_rejected() {
        let serializer = LogEntrySerializer::new();
        let mut buf = vec![0u8; 256];
        let result = serializer.serialize(&mut buf, 0, &entry(), -5, 3, 4);
        assert_eq!(result, Err(LogStreamError::NegativePosition(-5)));

        let result = serializer.serialize(&mut buf, 0, &entry(), 1, -2, 4);
        assert_eq!(result, Err(LogStreamError::InvalidSourcePosition(-2)));
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_missing_parts_rejected() {
        let serializer = LogEntrySerializer::new();
        let mut buf = vec![0u8; 256];

        let no_metadata = LogAppendEntry::builder().value(Bytes::from_static(b"v")).build();
        assert_eq!(
            serializer.serialize(&mut buf, 0, &no_metadata, 1, 1, 1),
            Err(LogStreamError::MissingMetadata)
        );

        let no_value = LogAppendEntry::builder()
            .metadata(EventMetadata::new(RecordType::Command, ValueType::Job, 0))
            .build();
        assert_eq!(
            serializer.serialize(&mut buf, 0, &no_value, 1, 1, 1),
            Err(LogStreamError::MissingValue)
        );
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_insufficient_space_leaves_buffer_unchanged() {
        let serializer = LogEntrySerializer::new();
        let entry = entry();
        let length = serializer.framed_length(&entry).unwrap();
        let mut buf = vec![0u8; length - 1];

        let err = serializer.serialize(&mut buf, 0, &entry, 1, 1, 1).unwrap_err();
        assert_eq!(
            err,
            LogStreamError::InsufficientSpace {
                required: length,
                available: length - 1
            }
        );
        assert!(err.is_retryable());
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_oversized_metadata_roundtrip() {
        let serializer = LogEntrySerializer::new();
        let reason = "x".repeat(500_000);
        let entry = LogAppendEntry::new(
            EventMetadata::new(RecordType::Command, ValueType::Job, 1)
                .with_rejection(RejectionType::ExceededBatchRecordSize, reason.clone()),
            Bytes::from_static(b"value"),
        );

        let length = serializer.framed_length(&entry).unwrap();
        assert!(length > u16::MAX as usize);
        let mut buf = vec![0u8; length];
        let written = serializer.serialize(&mut buf, 0, &entry, 7, 6, 5).unwrap();
        assert_eq!(written, length);

        let event = LoggedEvent::wrap(&buf, 0).unwrap();
        assert!(event.metadata_length() > u16::MAX as usize);
        let metadata = event.read_metadata().unwrap();
        assert_eq!(metadata.rejection_reason, reason);
        assert_eq!(event.value(), b"value");
    }

    proptest! {
        #[test]
        fn prop_entry_roundtrip(
            key in any::<i64>(),
            position in 0..i64::MAX,
            source in -1..i64::MAX,
            timestamp in 0..i64::MAX,
            value in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let serializer = LogEntrySerializer::new();
            let entry = LogAppendEntry::new(
                EventMetadata::new(RecordType::Event, ValueType::Variable, 0),
                value.clone(),
            )
            .with_key(key);

            let mut buf = vec![0u8; serializer.framed_length(&entry).unwrap()];
            serializer.serialize(&mut buf, 0, &entry, position, source, timestamp).unwrap();

            let event = LoggedEvent::wrap(&buf, 0).unwrap();
            prop_assert_eq!(event.key(), key);
            prop_assert_eq!(event.position(), position);
            prop_assert_eq!(event.source_event_position(), source);
            prop_assert_eq!(event.timestamp(), timestamp);
            prop_assert_eq!(event.value(), &value[..]);
        }
    }
}
