//! Binary codec for journal records.
//!
//! Reading is two-phase: a reader first decodes the fixed-size metadata, which
//! tells it how long the data section is, and only then decodes the data.
//!
//! Version 1 layout (all integers big-endian):
//!
//! ```text
//! metadata (9 bytes)
//! +---------+----------+----------+
//! | version | checksum | length   |
//! | 1 byte  | 4 bytes  | 4 bytes  |
//! +---------+----------+----------+
//!
//! data (20 + data_len bytes)
//! +----------+----------+----------+-----------------+
//! | index    | asqn     | data_len | data            |
//! | 8 bytes  | 8 bytes  | 4 bytes  | data_len bytes  |
//! +----------+----------+----------+-----------------+
//! ```
//!
//! A zero version byte marks space that was never written.

use crate::error::{InsufficientSpace, JournalError};
use crate::record::{RecordData, RecordMetadata};
use bytes::{Buf, BufMut, Bytes};

/// Size of the version 1 metadata block.
pub const METADATA_LENGTH: usize = 1 + 4 + 4;

/// Size of the fixed part of the version 1 data section.
pub const DATA_HEADER_LENGTH: usize = 8 + 8 + 4;

/// Record layouts this crate can read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JournalFormat {
    V1 = 1,
}

impl JournalFormat {
    pub const CURRENT: JournalFormat = JournalFormat::V1;
}

impl TryFrom<u8> for JournalFormat {
    type Error = JournalError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(JournalFormat::V1),
            other => Err(JournalError::UnsupportedFormat(other)),
        }
    }
}

/// Reads and writes journal records in a fixed binary format.
///
/// Implementations are stateless; concurrent calls are safe as long as each call
/// targets a disjoint buffer region.
pub trait JournalRecordSerializer: Send + Sync {
    /// The format version this serializer produces.
    fn format(&self) -> JournalFormat;

    /// Number of bytes [`write_data`](Self::write_data) produces for `record`.
    fn data_length(&self, record: &RecordData) -> usize;

    /// Writes the data section of `record` at `offset`, returning the bytes written.
    fn write_data(
        &self,
        record: &RecordData,
        buf: &mut [u8],
        offset: usize,
    ) -> Result<usize, InsufficientSpace>;

    /// Fixed number of bytes [`write_metadata`](Self::write_metadata) produces.
    fn metadata_length(&self) -> usize;

    /// Writes `metadata` at `offset`, returning the bytes written.
    fn write_metadata(
        &self,
        metadata: &RecordMetadata,
        buf: &mut [u8],
        offset: usize,
    ) -> Result<usize, InsufficientSpace>;

    /// Reads the metadata block at `offset`.
    ///
    /// Returns `Ok(None)` when the region holds no record: it was never written or
    /// the buffer ends before a complete metadata block.
    fn read_metadata(
        &self,
        buf: &[u8],
        offset: usize,
    ) -> Result<Option<RecordMetadata>, JournalError>;

    /// Reads a data section of `length` bytes at `offset`.
    ///
    /// The returned payload is a slice of `buf`.
    fn read_data(
        &self,
        buf: &Bytes,
        offset: usize,
        length: usize,
    ) -> Result<RecordData, JournalError>;
}

/// The canonical [`JournalRecordSerializer`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryJournalSerializer;

impl BinaryJournalSerializer {
    pub fn new() -> Self {
        Self
    }
}

/// Data longer than a u32 prefix can describe never fits a segment.
fn length_prefix(length: usize) -> Result<u32, InsufficientSpace> {
    u32::try_from(length).map_err(|_| InsufficientSpace {
        required: length,
        available: u32::MAX as usize,
    })
}

fn ensure_space(buf: &[u8], offset: usize, required: usize) -> Result<(), InsufficientSpace> {
    let available = buf.len().saturating_sub(offset);
    if available < required {
        return Err(InsufficientSpace {
            required,
            available,
        });
    }
    Ok(())
}

impl JournalRecordSerializer for BinaryJournalSerializer {
    fn format(&self) -> JournalFormat {
        JournalFormat::V1
    }

    fn data_length(&self, record: &RecordData) -> usize {
        DATA_HEADER_LENGTH + record.data().len()
    }

    fn write_data(
        &self,
        record: &RecordData,
        buf: &mut [u8],
        offset: usize,
    ) -> Result<usize, InsufficientSpace> {
        let length = self.data_length(record);
        let data_length = length_prefix(record.data().len())?;
        ensure_space(buf, offset, length)?;

        let mut dst = &mut buf[offset..offset + length];
        dst.put_u64(record.index());
        dst.put_i64(record.asqn());
        dst.put_u32(data_length);
        dst.put_slice(record.data());

        Ok(length)
    }

    fn metadata_length(&self) -> usize {
        METADATA_LENGTH
    }

    fn write_metadata(
        &self,
        metadata: &RecordMetadata,
        buf: &mut [u8],
        offset: usize,
    ) -> Result<usize, InsufficientSpace> {
        ensure_space(buf, offset, METADATA_LENGTH)?;

        let mut dst = &mut buf[offset..offset + METADATA_LENGTH];
        dst.put_u8(self.format() as u8);
        dst.put_u32(metadata.checksum());
        dst.put_u32(metadata.length());

        Ok(METADATA_LENGTH)
    }

    fn read_metadata(
        &self,
        buf: &[u8],
        offset: usize,
    ) -> Result<Option<RecordMetadata>, JournalError> {
        if buf.len() < offset + METADATA_LENGTH {
            return Ok(None);
        }

        let mut src = &buf[offset..offset + METADATA_LENGTH];
        let version = src.get_u8();
        if version == 0 {
            return Ok(None);
        }
        match JournalFormat::try_from(version)? {
            JournalFormat::V1 => {
                let checksum = src.get_u32();
                let length = src.get_u32();
                Ok(Some(RecordMetadata::new(checksum, length)))
            }
        }
    }

    fn read_data(
        &self,
        buf: &Bytes,
        offset: usize,
        length: usize,
    ) -> Result<RecordData, JournalError> {
        if length < DATA_HEADER_LENGTH {
            return Err(JournalError::InvalidRecord {
                offset: offset as u64,
                reason: format!("data section of {} bytes is shorter than its header", length),
            });
        }
        if buf.len() < offset + length {
            return Err(JournalError::InvalidRecord {
                offset: offset as u64,
                reason: format!(
                    "data section needs {} bytes, buffer has {}",
                    length,
                    buf.len().saturating_sub(offset)
                ),
            });
        }

        let mut src = &buf[offset..offset + DATA_HEADER_LENGTH];
        let index = src.get_u64();
        let asqn = src.get_i64();
        let data_len = src.get_u32() as usize;

        if DATA_HEADER_LENGTH + data_len != length {
            return Err(JournalError::InvalidRecord {
                offset: offset as u64,
                reason: format!(
                    "payload length {} does not match data section length {}",
                    data_len, length
                ),
            });
        }

        let start = offset + DATA_HEADER_LENGTH;
        let data = buf.slice(start..start + data_len);
        Ok(RecordData::new(index, asqn, data))
    }
}

/// Something that knows its encoded length and can write itself into a buffer.
pub trait BufferWriter {
    fn length(&self) -> usize;

    fn write(&self, buf: &mut [u8], offset: usize) -> Result<usize, InsufficientSpace>;
}

/// Writes a [`RecordData`] through a serializer.
pub struct RecordDataWriter<'a, S: JournalRecordSerializer + ?Sized> {
    serializer: &'a S,
    record: &'a RecordData,
}

impl<'a, S: JournalRecordSerializer + ?Sized> RecordDataWriter<'a, S> {
    pub fn new(serializer: &'a S, record: &'a RecordData) -> Self {
        Self { serializer, record }
    }
}

impl<S: JournalRecordSerializer + ?Sized> BufferWriter for RecordDataWriter<'_, S> {
    fn length(&self) -> usize {
        self.serializer.data_length(self.record)
    }

    fn write(&self, buf: &mut [u8], offset: usize) -> Result<usize, InsufficientSpace> {
        self.serializer.write_data(self.record, buf, offset)
    }
}

/// Copies bytes that are already serialized, without re-encoding them.
pub struct DirectCopyWriter<'a> {
    source: &'a [u8],
}

impl<'a> DirectCopyWriter<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        Self { source }
    }
}

impl BufferWriter for DirectCopyWriter<'_> {
    fn length(&self) -> usize {
        self.source.len()
    }

    fn write(&self, buf: &mut [u8], offset: usize) -> Result<usize, InsufficientSpace> {
        let length = self.source.len();
        ensure_space(buf, offset, length)?;
        buf[offset..offset + length].copy_from_slice(self.source);
        Ok(length)
    }
}
