//! Segmented journal.

use crate::error::JournalError;
use crate::metrics::{JournalMetrics, JournalStats};
use crate::record::{compute_checksum, PersistedJournalRecord, RecordData, ASQN_IGNORE};
use crate::segment::{decode_frame, Segment, SegmentDescriptor, SegmentId, SegmentScanner};
use crate::serializer::{
    BinaryJournalSerializer, BufferWriter, DirectCopyWriter, JournalRecordSerializer,
    RecordDataWriter,
};
use crate::{DEFAULT_SEGMENT_SIZE, SEGMENT_DESCRIPTOR_SIZE};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Number of records a [`JournalReader`] fetches at a time.
const READ_BATCH: usize = 256;

/// Flush policy for journal appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushPolicy {
    /// Fsync after every append (safest, slowest).
    #[default]
    EveryWrite,
    /// Fsync after N appends.
    EveryN(u32),
    /// Never fsync automatically (caller must call flush).
    Never,
}

/// Journal configuration.
#[derive(Clone)]
pub struct JournalConfig {
    /// Directory to store segments.
    pub dir: PathBuf,
    /// Maximum segment size in bytes, descriptor included.
    pub segment_size: u32,
    /// Flush policy.
    pub flush_policy: FlushPolicy,
    /// Counters updated by the journal.
    pub metrics: Arc<JournalMetrics>,
    /// Record codec.
    pub serializer: Arc<dyn JournalRecordSerializer>,
}

impl JournalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            flush_policy: FlushPolicy::default(),
            metrics: Arc::new(JournalMetrics::new()),
            serializer: Arc::new(BinaryJournalSerializer),
        }
    }

    pub fn with_segment_size(mut self, size: u32) -> Self {
        self.segment_size = size;
        self
    }

    pub fn with_flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush_policy = policy;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<JournalMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn JournalRecordSerializer>) -> Self {
        self.serializer = serializer;
        self
    }
}

impl fmt::Debug for JournalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JournalConfig")
            .field("dir", &self.dir)
            .field("segment_size", &self.segment_size)
            .field("flush_policy", &self.flush_policy)
            .field("format", &self.serializer.format())
            .finish()
    }
}

struct JournalState {
    /// Segments that no longer receive appends, by id.
    sealed: BTreeMap<SegmentId, Segment>,
    /// Segment receiving appends.
    current: Segment,
    /// Last asqn assigned by a caller, or `ASQN_IGNORE`.
    last_asqn: i64,
}

impl JournalState {
    fn segments(&self) -> impl DoubleEndedIterator<Item = &Segment> {
        self.sealed.values().chain(std::iter::once(&self.current))
    }

    fn first_index(&self) -> u64 {
        self.sealed
            .values()
            .next()
            .map(|s| s.first_index())
            .unwrap_or_else(|| self.current.first_index())
    }

    fn last_index(&self) -> u64 {
        self.current.next_index().saturating_sub(1)
    }

    fn next_index(&self) -> u64 {
        self.current.next_index()
    }
}

/// Append-only journal split into bounded segment files.
///
/// Records get consecutive indexes starting at the journal's first index. All
/// appends, truncations and reads are serialized through one lock; readers share it.
pub struct SegmentedJournal {
    config: JournalConfig,
    state: RwLock<JournalState>,
    /// Appends since last fsync (for EveryN policy).
    writes_since_flush: AtomicU64,
    closed: AtomicBool,
}

impl SegmentedJournal {
    /// Opens or creates a journal at the configured directory.
    ///
    /// Partially written or corrupted tails are truncated; segments following a
    /// corrupted record are discarded.
    pub fn open(config: JournalConfig) -> Result<Self, JournalError> {
        std::fs::create_dir_all(&config.dir)?;

        let state = Self::recover(&config)?;

        tracing::info!(
            "Journal opened at {}: {} segments, first_index={}, last_index={}",
            config.dir.display(),
            state.sealed.len() + 1,
            state.first_index(),
            state.last_index()
        );

        Ok(Self {
            config,
            state: RwLock::new(state),
            writes_since_flush: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    fn recover(config: &JournalConfig) -> Result<JournalState, JournalError> {
        let serializer = config.serializer.as_ref();
        let metrics = &config.metrics;
        let segment_ids = SegmentScanner::list_segments(&config.dir)?;
        let latest_id = segment_ids.last().copied();

        let mut segments: Vec<Segment> = Vec::new();
        let mut last_asqn = ASQN_IGNORE;
        let mut discard_rest = false;

        for seg_id in segment_ids {
            if discard_rest {
                std::fs::remove_file(config.dir.join(crate::segment::segment_filename(seg_id)))?;
                metrics.record_segments_deleted(1);
                tracing::warn!("Discarded segment {} following a corrupted record", seg_id);
                continue;
            }

            let mut segment = match Segment::open(&config.dir, seg_id) {
                Ok(segment) => segment,
                Err(JournalError::InvalidDescriptor { reason, .. }) => {
                    // The valid log ends before an unreadable descriptor
                    std::fs::remove_file(config.dir.join(crate::segment::segment_filename(seg_id)))?;
                    metrics.record_segments_deleted(1);
                    if Some(seg_id) == latest_id {
                        tracing::warn!("Removed incomplete segment {}: {}", seg_id, reason);
                    } else {
                        tracing::warn!("Removed segment {} with invalid descriptor: {}", seg_id, reason);
                    }
                    discard_rest = true;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(previous) = segments.last() {
                if segment.first_index() != previous.next_index() {
                    tracing::warn!(
                        "Segment {} starts at index {} but previous segment ends before {}; discarding it",
                        seg_id,
                        segment.first_index(),
                        previous.next_index()
                    );
                    segment.delete()?;
                    metrics.record_segments_deleted(1);
                    discard_rest = true;
                    continue;
                }
            }

            let scan = segment.scan(serializer)?;
            if let Some(asqn) = scan
                .records
                .iter()
                .rev()
                .map(|(_, record)| record.asqn())
                .find(|&asqn| asqn != ASQN_IGNORE)
            {
                last_asqn = asqn;
            }

            let trailing = scan.trailing_bytes();
            if trailing > 0 {
                let next_index = segment.next_index();
                segment.truncate_at(scan.valid_length, next_index)?;
                metrics.record_truncation(trailing);
                match &scan.corruption {
                    Some(e) => tracing::warn!(
                        "Truncated segment {} at offset {} after corrupted record (removed {} bytes): {}",
                        seg_id,
                        scan.valid_length,
                        trailing,
                        e
                    ),
                    None => tracing::warn!(
                        "Truncated segment {} at offset {} (removed {} bytes of partial write)",
                        seg_id,
                        scan.valid_length,
                        trailing
                    ),
                }
            }
            if scan.corruption.is_some() {
                discard_rest = true;
            }

            segments.push(segment);
        }

        let current = match segments.pop() {
            Some(segment) => segment,
            None => {
                let segment = Segment::create(
                    &config.dir,
                    SegmentDescriptor::new(1, 1, config.segment_size),
                )?;
                metrics.record_segment_created();
                segment
            }
        };

        Ok(JournalState {
            sealed: segments.into_iter().map(|s| (s.id(), s)).collect(),
            current,
            last_asqn,
        })
    }

    fn serializer(&self) -> &dyn JournalRecordSerializer {
        self.config.serializer.as_ref()
    }

    fn ensure_open(&self) -> Result<(), JournalError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(JournalError::Closed);
        }
        Ok(())
    }

    /// Appends a record with the next index.
    ///
    /// `asqn` is either [`ASQN_IGNORE`] or strictly greater than the last asqn
    /// appended.
    pub fn append(
        &self,
        asqn: i64,
        data: impl Into<Bytes>,
    ) -> Result<PersistedJournalRecord, JournalError> {
        self.ensure_open()?;
        let mut state = self.state.write();
        Self::check_asqn(&state, asqn)?;

        let record = RecordData::new(state.next_index(), asqn, data);
        let writer = RecordDataWriter::new(self.serializer(), &record);
        let persisted = self.append_with(&mut state, &writer)?;

        if asqn != ASQN_IGNORE {
            state.last_asqn = asqn;
        }
        Ok(persisted)
    }

    /// Appends a record that was serialized elsewhere, typically by a leader.
    ///
    /// The serialized data section is copied verbatim after its index and
    /// checksum have been verified.
    pub fn append_record(
        &self,
        record: &PersistedJournalRecord,
    ) -> Result<PersistedJournalRecord, JournalError> {
        self.ensure_open()?;
        let mut state = self.state.write();

        let expected = state.next_index();
        if record.index() != expected {
            return Err(JournalError::InvalidIndex {
                expected,
                actual: record.index(),
            });
        }

        let serialized = record.serialized_record();
        let actual = compute_checksum(serialized);
        if actual != record.checksum() {
            return Err(JournalError::InvalidChecksum {
                index: record.index(),
                expected: record.checksum(),
                actual,
            });
        }

        let decoded = self.serializer().read_data(serialized, 0, serialized.len())?;
        if decoded.index() != expected {
            return Err(JournalError::InvalidIndex {
                expected,
                actual: decoded.index(),
            });
        }
        Self::check_asqn(&state, decoded.asqn())?;

        let writer = DirectCopyWriter::new(serialized);
        let persisted = self.append_with(&mut state, &writer)?;

        if decoded.asqn() != ASQN_IGNORE {
            state.last_asqn = decoded.asqn();
        }
        Ok(persisted)
    }

    fn check_asqn(state: &JournalState, asqn: i64) -> Result<(), JournalError> {
        if asqn != ASQN_IGNORE && asqn <= state.last_asqn {
            return Err(JournalError::InvalidAsqn {
                last: state.last_asqn,
                actual: asqn,
            });
        }
        Ok(())
    }

    fn append_with(
        &self,
        state: &mut JournalState,
        writer: &dyn BufferWriter,
    ) -> Result<PersistedJournalRecord, JournalError> {
        let serializer = self.serializer();
        let capacity = (self.config.segment_size as usize).saturating_sub(SEGMENT_DESCRIPTOR_SIZE);

        let frame = match state.current.append(writer, serializer) {
            Ok((_, frame)) => frame,
            Err(JournalError::InsufficientSpace(space)) => {
                if state.current.is_empty() {
                    return Err(JournalError::RecordTooLarge {
                        size: space.required,
                        max: capacity,
                    });
                }
                self.roll_segment(state)?;
                match state.current.append(writer, serializer) {
                    Ok((_, frame)) => frame,
                    Err(JournalError::InsufficientSpace(space)) => {
                        return Err(JournalError::RecordTooLarge {
                            size: space.required,
                            max: capacity,
                        })
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };

        self.config.metrics.record_append(frame.len());
        self.apply_flush_policy(&mut state.current)?;

        decode_frame(&frame, serializer)
    }

    fn apply_flush_policy(&self, segment: &mut Segment) -> Result<(), JournalError> {
        let writes = self.writes_since_flush.fetch_add(1, Ordering::Relaxed) + 1;
        match self.config.flush_policy {
            FlushPolicy::EveryWrite => self.flush_segment(segment)?,
            FlushPolicy::EveryN(n) if writes >= n as u64 => self.flush_segment(segment)?,
            _ => {}
        }
        Ok(())
    }

    fn flush_segment(&self, segment: &mut Segment) -> Result<(), JournalError> {
        if segment.sync()? {
            self.config.metrics.record_flush();
        }
        self.writes_since_flush.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Seals the current segment and starts a new one at the next index.
    fn roll_segment(&self, state: &mut JournalState) -> Result<(), JournalError> {
        self.flush_segment(&mut state.current)?;

        let descriptor = SegmentDescriptor::new(
            state.current.id() + 1,
            state.next_index(),
            self.config.segment_size,
        );
        let segment = Segment::create(&self.config.dir, descriptor)?;
        let sealed = std::mem::replace(&mut state.current, segment);
        state.sealed.insert(sealed.id(), sealed);
        self.config.metrics.record_segment_created();

        tracing::debug!(
            "Rolled to segment {} at index {}",
            descriptor.id,
            descriptor.first_index
        );
        Ok(())
    }

    /// Forces a sync of the current segment to disk.
    pub fn flush(&self) -> Result<(), JournalError> {
        let mut state = self.state.write();
        self.flush_segment(&mut state.current)
    }

    /// Reads up to `limit` records starting at `index`.
    pub fn read_from(
        &self,
        index: u64,
        limit: Option<usize>,
    ) -> Result<Vec<PersistedJournalRecord>, JournalError> {
        self.ensure_open()?;
        let state = self.state.read();
        let mut results = Vec::new();
        let mut remaining = limit.unwrap_or(usize::MAX);

        for segment in state.segments() {
            if remaining == 0 {
                break;
            }
            match segment.last_index() {
                Some(last) if last >= index => {}
                _ => continue,
            }

            let scan = segment.read_records(self.serializer())?;
            for (_, record) in scan.records {
                if record.index() < index || !segment.contains(record.index()) {
                    continue;
                }
                results.push(record);
                remaining -= 1;
                if remaining == 0 {
                    break;
                }
            }
        }

        self.config.metrics.record_read();
        Ok(results)
    }

    /// Returns a reader positioned at the first record.
    pub fn reader(&self) -> JournalReader<'_> {
        JournalReader::new(self, self.first_index())
    }

    /// Index of the first record the journal holds (or will hold, when empty).
    pub fn first_index(&self) -> u64 {
        self.state.read().first_index()
    }

    /// Index of the last record, or `first_index() - 1` when empty.
    pub fn last_index(&self) -> u64 {
        self.state.read().last_index()
    }

    /// Index the next appended record receives.
    pub fn next_index(&self) -> u64 {
        self.state.read().next_index()
    }

    /// Last asqn appended, or [`ASQN_IGNORE`].
    pub fn last_asqn(&self) -> i64 {
        self.state.read().last_asqn
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.read();
        state.next_index() == state.first_index()
    }

    /// Returns the list of segment IDs.
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.state.read().segments().map(|s| s.id()).collect()
    }

    /// Removes every record after `index`.
    ///
    /// If `index` precedes the journal's first record the journal is reset so
    /// that the next append receives `index + 1`.
    pub fn delete_after(&self, index: u64) -> Result<(), JournalError> {
        self.ensure_open()?;
        let mut state = self.state.write();
        if index >= state.last_index() {
            return Ok(());
        }

        let mut removed_bytes = 0u64;
        let mut deleted = 0usize;
        while state.current.first_index() > index {
            let Some((_, previous)) = state.sealed.pop_last() else {
                break;
            };
            let doomed = std::mem::replace(&mut state.current, previous);
            removed_bytes += doomed.size();
            doomed.delete()?;
            deleted += 1;
        }
        self.config.metrics.record_segments_deleted(deleted);

        if state.current.first_index() > index {
            return self.reset_locked(&mut state, index + 1);
        }

        removed_bytes += state.current.truncate_after(index, self.serializer())?;
        state.last_asqn = self.find_last_asqn(&state)?;
        self.config.metrics.record_truncation(removed_bytes);

        tracing::info!(
            "Deleted journal records after index {} ({} bytes, {} segments)",
            index,
            removed_bytes,
            deleted
        );
        Ok(())
    }

    /// Deletes segments whose records all precede `index`.
    ///
    /// The segment receiving appends is never deleted. Returns the number of
    /// segments deleted.
    pub fn delete_until(&self, index: u64) -> Result<usize, JournalError> {
        self.ensure_open()?;
        let mut state = self.state.write();

        let doomed: Vec<SegmentId> = state
            .sealed
            .values()
            .take_while(|segment| segment.next_index() <= index)
            .map(|segment| segment.id())
            .collect();

        for seg_id in &doomed {
            if let Some(segment) = state.sealed.remove(seg_id) {
                segment.delete()?;
                tracing::info!("Compacted journal segment {}", seg_id);
            }
        }

        self.config.metrics.record_segments_deleted(doomed.len());
        Ok(doomed.len())
    }

    /// Deletes all records; the next append receives `next_index`.
    pub fn reset(&self, next_index: u64) -> Result<(), JournalError> {
        self.ensure_open()?;
        let mut state = self.state.write();
        self.reset_locked(&mut state, next_index)
    }

    fn reset_locked(&self, state: &mut JournalState, next_index: u64) -> Result<(), JournalError> {
        let next_index = next_index.max(1);
        let next_id = state.current.id() + 1;

        let sealed = std::mem::take(&mut state.sealed);
        let deleted = sealed.len() + 1;
        for (_, segment) in sealed {
            segment.delete()?;
        }

        let descriptor = SegmentDescriptor::new(next_id, next_index, self.config.segment_size);
        let fresh = Segment::create(&self.config.dir, descriptor)?;
        let old = std::mem::replace(&mut state.current, fresh);
        old.delete()?;
        state.last_asqn = ASQN_IGNORE;

        self.config.metrics.record_segments_deleted(deleted);
        self.config.metrics.record_segment_created();
        tracing::info!("Journal reset, next index is {}", next_index);
        Ok(())
    }

    fn find_last_asqn(&self, state: &JournalState) -> Result<i64, JournalError> {
        for segment in state.segments().rev() {
            if segment.is_empty() {
                continue;
            }
            let scan = segment.read_records(self.serializer())?;
            if let Some(asqn) = scan
                .records
                .iter()
                .rev()
                .filter(|(_, record)| segment.contains(record.index()))
                .map(|(_, record)| record.asqn())
                .find(|&asqn| asqn != ASQN_IGNORE)
            {
                return Ok(asqn);
            }
        }
        Ok(ASQN_IGNORE)
    }

    /// Returns the current I/O statistics.
    pub fn stats(&self) -> JournalStats {
        self.config.metrics.snapshot()
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Flushes and closes the journal. Later operations fail with
    /// [`JournalError::Closed`].
    pub fn close(&self) -> Result<(), JournalError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.flush()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Sequential reader over a journal.
///
/// Records are fetched in batches; after a truncation call [`seek`](Self::seek)
/// to drop records buffered before it.
pub struct JournalReader<'a> {
    journal: &'a SegmentedJournal,
    next_index: u64,
    buffered: VecDeque<PersistedJournalRecord>,
}

impl<'a> JournalReader<'a> {
    fn new(journal: &'a SegmentedJournal, next_index: u64) -> Self {
        Self {
            journal,
            next_index,
            buffered: VecDeque::new(),
        }
    }

    /// Index of the record the next call to `next` returns.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Positions the reader at `index`.
    pub fn seek(&mut self, index: u64) {
        self.next_index = index;
        self.buffered.clear();
    }

    pub fn seek_to_first(&mut self) {
        self.seek(self.journal.first_index());
    }

    /// Positions the reader at the last record.
    pub fn seek_to_last(&mut self) {
        let journal = self.journal;
        let index = if journal.is_empty() {
            journal.first_index()
        } else {
            journal.last_index()
        };
        self.seek(index);
    }

    /// Positions the reader at the last record whose asqn is at most `asqn`.
    ///
    /// Records without an asqn are skipped. If no record qualifies, the reader
    /// is positioned at the first record. Returns the index the reader now points to.
    pub fn seek_to_asqn(&mut self, asqn: i64) -> Result<u64, JournalError> {
        let journal = self.journal;
        let mut target = journal.first_index();
        for record in journal.read_from(journal.first_index(), None)? {
            if record.asqn() == ASQN_IGNORE {
                continue;
            }
            if record.asqn() > asqn {
                break;
            }
            target = record.index();
        }
        self.seek(target);
        Ok(target)
    }
}

impl Iterator for JournalReader<'_> {
    type Item = Result<PersistedJournalRecord, JournalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffered.is_empty() {
            match self.journal.read_from(self.next_index, Some(READ_BATCH)) {
                Ok(records) => self.buffered.extend(records),
                Err(e) => return Some(Err(e)),
            }
        }

        let record = self.buffered.pop_front()?;
        self.next_index = record.index() + 1;
        Some(Ok(record))
    }
}
