//! # quill-journal
//!
//! Segmented append-only journal for quill.
//!
//! This crate provides a durable, index-addressed log with:
//! - Per-record CRC32C checksums for corruption detection
//! - Bounded segment files with a checksummed descriptor
//! - Configurable flush policies
//! - Recovery from partial writes and corrupted tails
//! - Verbatim re-append of records serialized by another node

pub mod error;
pub mod journal;
pub mod metrics;
pub mod record;
pub mod recovery;
pub mod segment;
pub mod serializer;

pub use error::{InsufficientSpace, JournalError};
pub use journal::{FlushPolicy, JournalConfig, JournalReader, SegmentedJournal};
pub use metrics::{JournalMetrics, JournalStats};
pub use record::{PersistedJournalRecord, RecordData, RecordMetadata, ASQN_IGNORE};
pub use recovery::{repair_journal, verify_journal, RecoveryResult, RecoveryScanner};
pub use segment::{Segment, SegmentDescriptor, SegmentId};
pub use serializer::{BinaryJournalSerializer, JournalFormat, JournalRecordSerializer};

/// Default segment size (64 MiB).
pub const DEFAULT_SEGMENT_SIZE: u32 = 64 * 1024 * 1024;

/// Segment descriptor size in bytes.
pub const SEGMENT_DESCRIPTOR_SIZE: usize = 32;
