//! Journal record model.
//!
//! A journal record is made of two parts: a fixed-size [`RecordMetadata`] block
//! describing integrity and framing, followed by the variable-size serialized
//! [`RecordData`]. Both are immutable values created once per append or read.

use bytes::Bytes;

/// Sentinel asqn meaning "not set by the caller".
pub const ASQN_IGNORE: i64 = -1;

/// Identity and payload of one journal record.
///
/// `asqn` is an opaque, caller-supplied correlation token. It is independent of
/// `index` and the journal never derives one from the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordData {
    index: u64,
    asqn: i64,
    data: Bytes,
}

impl RecordData {
    pub fn new(index: u64, asqn: i64, data: impl Into<Bytes>) -> Self {
        Self {
            index,
            asqn,
            data: data.into(),
        }
    }

    /// Returns the journal position of this record.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Returns the application sequence number, or [`ASQN_IGNORE`].
    pub fn asqn(&self) -> i64 {
        self.asqn
    }

    /// Returns whether the caller assigned an asqn to this record.
    pub fn has_asqn(&self) -> bool {
        self.asqn != ASQN_IGNORE
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// Integrity and framing information written in front of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordMetadata {
    checksum: u32,
    length: u32,
}

impl RecordMetadata {
    pub fn new(checksum: u32, length: u32) -> Self {
        Self { checksum, length }
    }

    /// Builds metadata describing an already serialized data section.
    pub fn for_serialized(serialized: &[u8]) -> Self {
        Self {
            checksum: compute_checksum(serialized),
            length: serialized.len() as u32,
        }
    }

    /// CRC32C of the serialized data section.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Length in bytes of the serialized data section that follows the metadata.
    pub fn length(&self) -> u32 {
        self.length
    }
}

/// Computes the checksum stored in [`RecordMetadata`].
pub fn compute_checksum(serialized: &[u8]) -> u32 {
    crc32c::crc32c(serialized)
}

/// A record as it exists in the journal: metadata, decoded data and the exact
/// serialized data section it was decoded from.
///
/// `data` and `serialized` are reference-counted slices of the buffer the record
/// was read from; no payload bytes are copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedJournalRecord {
    metadata: RecordMetadata,
    record: RecordData,
    serialized: Bytes,
    total_length: usize,
}

impl PersistedJournalRecord {
    pub fn new(
        metadata: RecordMetadata,
        record: RecordData,
        serialized: Bytes,
        total_length: usize,
    ) -> Self {
        Self {
            metadata,
            record,
            serialized,
            total_length,
        }
    }

    pub fn index(&self) -> u64 {
        self.record.index()
    }

    pub fn asqn(&self) -> i64 {
        self.record.asqn()
    }

    pub fn checksum(&self) -> u32 {
        self.metadata.checksum()
    }

    pub fn data(&self) -> &Bytes {
        self.record.data()
    }

    pub fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    pub fn record(&self) -> &RecordData {
        &self.record
    }

    /// The serialized data section, suitable for verbatim replication.
    pub fn serialized_record(&self) -> &Bytes {
        &self.serialized
    }

    /// Size of metadata plus data section as stored in the segment.
    pub fn total_length(&self) -> usize {
        self.total_length
    }
}
