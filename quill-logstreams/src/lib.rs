//! # quill-logstreams
//!
//! Application records and the exact bytes they occupy in a log segment.
//!
//! - [`AppendEntry`] describes a record to append; [`LogAppendEntry`] is the owned form
//! - [`LogEntrySerializer`] writes one entry, validating before any byte is written
//! - [`SequencedBatch`] writes several entries with consecutive positions
//! - [`LoggedEvent`] reads entries back without copying

pub mod batch;
pub mod entry;
pub mod error;
pub mod event;
pub mod metadata;
pub mod serializer;

pub use batch::SequencedBatch;
pub use entry::{processed, AppendEntry, LogAppendEntry, LogAppendEntryBuilder, Processed};
pub use error::LogStreamError;
pub use event::{LoggedEvent, LoggedEvents};
pub use metadata::{BrokerVersion, EventMetadata, RecordType, RejectionType, ValueType};
pub use serializer::{LogEntrySerializer, ENTRY_HEADER_LENGTH, ENTRY_VERSION, NO_SOURCE_POSITION};
