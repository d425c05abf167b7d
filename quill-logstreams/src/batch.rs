//! Batches of entries written with consecutive positions.

use crate::entry::AppendEntry;
use crate::error::{ensure_space, LogStreamError};
use crate::serializer::{validate_positions, LogEntrySerializer};

/// Entries appended together, receiving positions `first_position`,
/// `first_position + 1`, and so on.
#[derive(Debug, Clone)]
pub struct SequencedBatch<E> {
    first_position: i64,
    source_position: i64,
    timestamp: i64,
    entries: Vec<E>,
}

impl<E: AppendEntry> SequencedBatch<E> {
    /// Creates a batch. `source_position` is the source event position of every
    /// entry that does not reference another entry of the batch.
    pub fn new(first_position: i64, source_position: i64, timestamp: i64, entries: Vec<E>) -> Self {
        Self {
            first_position,
            source_position,
            timestamp,
            entries,
        }
    }

    pub fn first_position(&self) -> i64 {
        self.first_position
    }

    /// Position of the last entry, or `first_position - 1` for an empty batch.
    pub fn last_position(&self) -> i64 {
        let len = i64::try_from(self.entries.len()).unwrap_or(i64::MAX);
        self.first_position.saturating_add(len).saturating_sub(1)
    }

    pub fn entries(&self) -> &[E] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Position of the entry at `offset` in the batch.
    fn position_at(&self, offset: usize) -> Result<i64, LogStreamError> {
        i64::try_from(offset)
            .ok()
            .and_then(|offset| self.first_position.checked_add(offset))
            .ok_or(LogStreamError::PositionOverflow {
                first: self.first_position,
                offset,
            })
    }

    /// Source event position `entry` is written with.
    fn source_position_of(&self, entry: &E) -> Result<i64, LogStreamError> {
        match entry.source_index() {
            index if index >= 0 => self.position_at(index as usize),
            _ => Ok(self.source_position),
        }
    }

    /// Total serialized length of the batch.
    pub fn length(&self) -> Result<usize, LogStreamError> {
        let serializer = LogEntrySerializer::new();
        self.entries
            .iter()
            .map(|entry| serializer.framed_length(entry))
            .sum()
    }

    /// Writes every entry at `offset`, returning the bytes written.
    ///
    /// The whole batch is validated first; on error `buf` is left unchanged.
    pub fn serialize(&self, buf: &mut [u8], offset: usize) -> Result<usize, LogStreamError> {
        for (i, entry) in self.entries.iter().enumerate() {
            let source_index = entry.source_index();
            if source_index >= 0 && source_index as usize >= self.entries.len() {
                return Err(LogStreamError::InvalidSourceIndex {
                    index: source_index,
                    batch_size: self.entries.len(),
                });
            }
            validate_positions(
                self.position_at(i)?,
                self.source_position_of(entry)?,
                self.timestamp,
            )?;
        }

        let length = self.length()?;
        ensure_space(buf, offset, length)?;

        let serializer = LogEntrySerializer::new();
        let mut cursor = offset;
        for (i, entry) in self.entries.iter().enumerate() {
            cursor += serializer.serialize(
                buf,
                cursor,
                entry,
                self.position_at(i)?,
                self.source_position_of(entry)?,
                self.timestamp,
            )?;
        }

        Ok(cursor - offset)
    }
}
