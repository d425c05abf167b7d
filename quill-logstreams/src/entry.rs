//! Application records handed to the log for appending.

use crate::metadata::EventMetadata;
use bytes::Bytes;

/// Source index meaning "no source entry in the same batch".
pub const NO_SOURCE_INDEX: i32 = -1;

/// Key of an entry that has not been assigned one.
pub const NO_KEY: i64 = -1;

/// An application record that can be written to the log.
pub trait AppendEntry {
    /// Record key, or [`NO_KEY`].
    fn key(&self) -> i64;

    /// Index within the same batch of the entry that caused this one, or
    /// [`NO_SOURCE_INDEX`].
    fn source_index(&self) -> i32 {
        NO_SOURCE_INDEX
    }

    fn metadata(&self) -> Option<&EventMetadata>;

    fn value(&self) -> Option<&[u8]>;

    /// Whether readers should skip this entry during processing.
    fn skip_processing(&self) -> bool {
        false
    }
}

/// An owned [`AppendEntry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogAppendEntry {
    key: i64,
    source_index: i32,
    metadata: Option<EventMetadata>,
    value: Option<Bytes>,
}

impl Default for LogAppendEntry {
    fn default() -> Self {
        Self {
            key: NO_KEY,
            source_index: NO_SOURCE_INDEX,
            metadata: None,
            value: None,
        }
    }
}

impl LogAppendEntry {
    /// Creates an entry with the given metadata and value and no key.
    pub fn new(metadata: EventMetadata, value: impl Into<Bytes>) -> Self {
        Self {
            metadata: Some(metadata),
            value: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn builder() -> LogAppendEntryBuilder {
        LogAppendEntryBuilder::default()
    }

    pub fn with_key(mut self, key: i64) -> Self {
        self.key = key;
        self
    }

    pub fn with_source_index(mut self, source_index: i32) -> Self {
        self.source_index = source_index;
        self
    }
}

impl AppendEntry for LogAppendEntry {
    fn key(&self) -> i64 {
        self.key
    }

    fn source_index(&self) -> i32 {
        self.source_index
    }

    fn metadata(&self) -> Option<&EventMetadata> {
        self.metadata.as_ref()
    }

    fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }
}

/// Builder for [`LogAppendEntry`]. Missing metadata or value is reported when
/// the entry is serialized.
#[derive(Debug, Default)]
pub struct LogAppendEntryBuilder {
    entry: LogAppendEntry,
}

impl LogAppendEntryBuilder {
    pub fn key(mut self, key: i64) -> Self {
        self.entry.key = key;
        self
    }

    pub fn source_index(mut self, source_index: i32) -> Self {
        self.entry.source_index = source_index;
        self
    }

    pub fn metadata(mut self, metadata: EventMetadata) -> Self {
        self.entry.metadata = Some(metadata);
        self
    }

    pub fn value(mut self, value: impl Into<Bytes>) -> Self {
        self.entry.value = Some(value.into());
        self
    }

    pub fn build(self) -> LogAppendEntry {
        self.entry
    }
}

/// View of an entry that is marked as already processed.
///
/// Every other property is taken from the wrapped entry.
#[derive(Debug)]
pub struct Processed<'a, E: AppendEntry + ?Sized> {
    entry: &'a E,
}

impl<'a, E: AppendEntry + ?Sized> Processed<'a, E> {
    pub fn new(entry: &'a E) -> Self {
        Self { entry }
    }

    pub fn inner(&self) -> &'a E {
        self.entry
    }
}

impl<E: AppendEntry + ?Sized> AppendEntry for Processed<'_, E> {
    fn key(&self) -> i64 {
        self.entry.key()
    }

    fn source_index(&self) -> i32 {
        self.entry.source_index()
    }

    fn metadata(&self) -> Option<&EventMetadata> {
        self.entry.metadata()
    }

    fn value(&self) -> Option<&[u8]> {
        self.entry.value()
    }

    fn skip_processing(&self) -> bool {
        true
    }
}

/// Wraps `entry` so it is written with the skip-processing flag set.
pub fn processed<E: AppendEntry + ?Sized>(entry: &E) -> Processed<'_, E> {
    Processed::new(entry)
}
