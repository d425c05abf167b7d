//! Event metadata carried by every log entry.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! +-------------+------------+--------+----------------+-------------------+------------+
//! | record_type | value_type | intent | rejection_type | request_stream_id | request_id |
//! | 1 byte      | 1 byte     | 1 byte | 1 byte         | 4 bytes           | 8 bytes    |
//! +-------------+------------+--------+----------------+-------------------+------------+
//! | protocol_version | broker_version (major, minor, patch) | reason_len | reason        |
//! | 2 bytes          | 12 bytes                             | 4 bytes    | reason_len    |
//! +------------------+--------------------------------------+------------+---------------+
//! ```

use crate::error::{ensure_readable, ensure_space, length_prefix, LogStreamError};
use bytes::{Buf, BufMut};
use std::fmt;

/// Size of the fixed part of the metadata encoding.
pub const METADATA_HEADER_LENGTH: usize = 1 + 1 + 1 + 1 + 4 + 8 + 2 + 12 + 4;

/// Version of the record protocol written into new metadata.
pub const PROTOCOL_VERSION: u16 = 1;

/// Marks a request id or request stream id that is not set.
pub const NO_REQUEST: i64 = -1;

macro_rules! byte_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $error:ident { $($variant:ident = $value:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value),+
        }

        impl $name {
            pub fn as_u8(self) -> u8 {
                self as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = LogStreamError;

            fn try_from(value: u8) -> Result<Self, LogStreamError> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(LogStreamError::$error(other)),
                }
            }
        }
    };
}

byte_enum! {
    /// Kind of record.
    RecordType, UnknownRecordType {
        Event = 0,
        Command = 1,
        CommandRejection = 2,
    }
}

byte_enum! {
    /// Why a command was rejected.
    RejectionType, UnknownRejectionType {
        NullVal = 0,
        InvalidArgument = 1,
        NotFound = 2,
        AlreadyExists = 3,
        InvalidState = 4,
        ProcessingError = 5,
        ExceededBatchRecordSize = 6,
        Unauthorized = 7,
    }
}

byte_enum! {
    /// Kind of value carried by the record.
    ValueType, UnknownValueType {
        Job = 0,
        Deployment = 4,
        ProcessInstance = 5,
        Incident = 6,
        Message = 10,
        MessageSubscription = 11,
        JobBatch = 14,
        Timer = 15,
        Variable = 17,
        ProcessInstanceCreation = 20,
        Error = 21,
        Checkpoint = 33,
        Signal = 37,
    }
}

/// Version of the broker that wrote a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct BrokerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl BrokerVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for BrokerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Metadata describing an application record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMetadata {
    pub record_type: RecordType,
    pub value_type: ValueType,
    /// Intent code, interpreted relative to `value_type`.
    pub intent: u8,
    pub rejection_type: RejectionType,
    pub rejection_reason: String,
    pub request_id: i64,
    pub request_stream_id: i32,
    pub protocol_version: u16,
    pub broker_version: BrokerVersion,
}

impl EventMetadata {
    pub fn new(record_type: RecordType, value_type: ValueType, intent: u8) -> Self {
        Self {
            record_type,
            value_type,
            intent,
            rejection_type: RejectionType::NullVal,
            rejection_reason: String::new(),
            request_id: NO_REQUEST,
            request_stream_id: NO_REQUEST as i32,
            protocol_version: PROTOCOL_VERSION,
            broker_version: BrokerVersion::default(),
        }
    }

    /// Marks the record as a rejection of a command.
    pub fn with_rejection(
        mut self,
        rejection_type: RejectionType,
        reason: impl Into<String>,
    ) -> Self {
        self.record_type = RecordType::CommandRejection;
        self.rejection_type = rejection_type;
        self.rejection_reason = reason.into();
        self
    }

    pub fn with_request(mut self, request_stream_id: i32, request_id: i64) -> Self {
        self.request_stream_id = request_stream_id;
        self.request_id = request_id;
        self
    }

    pub fn with_broker_version(mut self, version: BrokerVersion) -> Self {
        self.broker_version = version;
        self
    }

    pub fn has_request(&self) -> bool {
        self.request_id != NO_REQUEST
    }

    /// Number of bytes [`write`](Self::write) produces.
    pub fn encoded_length(&self) -> usize {
        METADATA_HEADER_LENGTH + self.rejection_reason.len()
    }

    /// Writes the metadata at `offset`, returning the bytes written.
    pub fn write(&self, buf: &mut [u8], offset: usize) -> Result<usize, LogStreamError> {
        let reason_length = length_prefix("rejection reason", self.rejection_reason.len())?;
        let length = self.encoded_length();
        ensure_space(buf, offset, length)?;

        let mut dst = &mut buf[offset..offset + length];
        dst.put_u8(self.record_type.as_u8());
        dst.put_u8(self.value_type.as_u8());
        dst.put_u8(self.intent);
        dst.put_u8(self.rejection_type.as_u8());
        dst.put_i32(self.request_stream_id);
        dst.put_i64(self.request_id);
        dst.put_u16(self.protocol_version);
        dst.put_u32(self.broker_version.major);
        dst.put_u32(self.broker_version.minor);
        dst.put_u32(self.broker_version.patch);
        dst.put_u32(reason_length);
        dst.put_slice(self.rejection_reason.as_bytes());

        Ok(length)
    }

    /// Reads metadata occupying exactly `buf`.
    pub fn read(buf: &[u8]) -> Result<Self, LogStreamError> {
        ensure_readable(buf, 0, METADATA_HEADER_LENGTH, "event metadata")?;

        let mut src = buf;
        let record_type = RecordType::try_from(src.get_u8())?;
        let value_type = ValueType::try_from(src.get_u8())?;
        let intent = src.get_u8();
        let rejection_type = RejectionType::try_from(src.get_u8())?;
        let request_stream_id = src.get_i32();
        let request_id = src.get_i64();
        let protocol_version = src.get_u16();
        let broker_version = BrokerVersion::new(src.get_u32(), src.get_u32(), src.get_u32());
        let reason_len = src.get_u32() as usize;

        ensure_readable(src, 0, reason_len, "rejection reason")?;
        let rejection_reason = std::str::from_utf8(&src[..reason_len])
            .map_err(|_| LogStreamError::InvalidUtf8)?
            .to_string();

        Ok(Self {
            record_type,
            value_type,
            intent,
            rejection_type,
            rejection_reason,
            request_id,
            request_stream_id,
            protocol_version,
            broker_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EventMetadata {
        EventMetadata::new(RecordType::Command, ValueType::ProcessInstance, 3)
            .with_request(7, 1234)
            .with_broker_version(BrokerVersion::new(8, 5, 1))
    }

    #[test]
    fn test_metadata_roundtrip() {
        let metadata = sample();
        let mut buf = vec![0u8; metadata.encoded_length()];
        let written = metadata.write(&mut buf, 0).unwrap();
        assert_eq!(written, METADATA_HEADER_LENGTH);

        let read = EventMetadata::read(&buf).unwrap();
        assert_eq!(read, metadata);
        assert!(read.has_request());
    }

    #[test]
    fn test_rejection_roundtrip() {
        let metadata =
            sample().with_rejection(RejectionType::InvalidState, "instance is not active");
        let mut buf = vec![0u8; metadata.encoded_length()];
        metadata.write(&mut buf, 0).unwrap();

        let read = EventMetadata::read(&buf).unwrap();
        assert_eq!(read.record_type, RecordType::CommandRejection);
        assert_eq!(read.rejection_type, RejectionType::InvalidState);
        assert_eq!(read.rejection_reason, "instance is not active");
    }

    #[test]
    fn test_defaults() {
        let metadata = EventMetadata::new(RecordType::Event, ValueType::Job, 0);
        assert_eq!(metadata.rejection_type, RejectionType::NullVal);
        assert_eq!(metadata.protocol_version, PROTOCOL_VERSION);
        assert!(!metadata.has_request());
    }

    #[test]
    fn test_write_insufficient_space() {
        let metadata = sample();
        let mut buf = vec![0u8; metadata.encoded_length() - 1];
        let err = metadata.write(&mut buf, 0).unwrap_err();
        assert!(err.is_retryable());
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_read_unknown_record_type() {
        let metadata = sample();
        let mut buf = vec![0u8; metadata.encoded_length()];
        metadata.write(&mut buf, 0).unwrap();
        buf[0] = 99;
        assert_eq!(
            EventMetadata::read(&buf),
            Err(LogStreamError::UnknownRecordType(99))
        );
    }

    #[test]
    fn test_read_truncated_reason() {
        let metadata = sample().with_rejection(RejectionType::NotFound, "missing");
        let mut buf = vec![0u8; metadata.encoded_length()];
        metadata.write(&mut buf, 0).unwrap();

        let result = EventMetadata::read(&buf[..buf.len() - 2]);
        assert!(matches!(result, Err(LogStreamError::Truncated { .. })));
    }

    #[test]
    fn test_enum_conversions() {
        for value in 0..=u8::MAX {
            if let Ok(kind) = ValueType::try_from(value) {
                assert_eq!(kind.as_u8(), value);
            }
        }
        assert!(RecordType::try_from(3).is_err());
        assert_eq!(RejectionType::try_from(7).unwrap(), RejectionType::Unauthorized);
    }

    #[test]
    fn test_broker_version_display() {
        assert_eq!(BrokerVersion::new(8, 5, 0).to_string(), "8.5.0");
        assert!(BrokerVersion::new(8, 5, 0) < BrokerVersion::new(8, 10, 0));
    }
}
