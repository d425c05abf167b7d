//! Offline journal verification and repair.
//!
//! Handles:
//! - Partial writes at the end of a segment
//! - Corrupted records (everything after them is dropped)
//! - Segments with unreadable descriptors
//! - Gaps between consecutive segments

use crate::error::JournalError;
use crate::record::ASQN_IGNORE;
use crate::segment::{segment_filename, Segment, SegmentId, SegmentScanner};
use crate::serializer::{BinaryJournalSerializer, JournalRecordSerializer};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result of a journal recovery scan.
#[derive(Debug, Default)]
pub struct RecoveryResult {
    /// Number of valid records found.
    pub valid_records: u64,
    /// Number of corrupted records found.
    pub invalid_records: u64,
    /// Bytes past the last valid record of each segment.
    pub bytes_truncated: u64,
    /// Segments whose tail was (or would be) truncated.
    pub segments_recovered: Vec<SegmentId>,
    /// Segments with an invalid descriptor or a gap before them.
    pub segments_with_errors: Vec<(SegmentId, String)>,
    /// Segments that follow a corruption or gap and are not part of the valid log.
    pub segments_discarded: Vec<SegmentId>,
    /// Index of the first valid record.
    pub first_index: Option<u64>,
    /// Index of the last valid record.
    pub last_index: Option<u64>,
    /// Last asqn found, or [`ASQN_IGNORE`].
    pub last_asqn: i64,
}

impl RecoveryResult {
    /// Returns true if opening the journal would not drop any data.
    pub fn is_clean(&self) -> bool {
        self.invalid_records == 0
            && self.bytes_truncated == 0
            && self.segments_with_errors.is_empty()
            && self.segments_discarded.is_empty()
    }
}

/// Journal recovery scanner.
pub struct RecoveryScanner {
    dir: PathBuf,
    serializer: Arc<dyn JournalRecordSerializer>,
}

impl RecoveryScanner {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            serializer: Arc::new(BinaryJournalSerializer),
        }
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn JournalRecordSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Scans and optionally repairs the journal.
    pub fn scan(&self, repair: bool) -> Result<RecoveryResult, JournalError> {
        let segment_ids = SegmentScanner::list_segments(&self.dir)?;

        let mut result = RecoveryResult {
            last_asqn: ASQN_IGNORE,
            ..Default::default()
        };
        let mut expected_first: Option<u64> = None;
        let mut discard_rest = false;

        for seg_id in segment_ids {
            if discard_rest {
                self.discard(seg_id, repair, &mut result)?;
                continue;
            }

            let mut segment = match Segment::open(&self.dir, seg_id) {
                Ok(segment) => segment,
                Err(e @ JournalError::InvalidDescriptor { .. }) => {
                    result.segments_with_errors.push((seg_id, e.to_string()));
                    self.discard(seg_id, repair, &mut result)?;
                    discard_rest = true;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(expected) = expected_first {
                if segment.first_index() != expected {
                    result.segments_with_errors.push((
                        seg_id,
                        format!(
                            "segment starts at index {}, expected {}",
                            segment.first_index(),
                            expected
                        ),
                    ));
                    self.discard(seg_id, repair, &mut result)?;
                    discard_rest = true;
                    continue;
                }
            }

            let scan = segment.scan(self.serializer.as_ref())?;
            result.valid_records += scan.records.len() as u64;
            if let Some(asqn) = scan
                .records
                .iter()
                .rev()
                .map(|(_, record)| record.asqn())
                .find(|&asqn| asqn != ASQN_IGNORE)
            {
                result.last_asqn = asqn;
            }
            if result.first_index.is_none() {
                result.first_index = Some(segment.first_index());
            }
            if let Some(last) = segment.last_index() {
                result.last_index = Some(last);
            }

            if scan.corruption.is_some() {
                result.invalid_records += 1;
                discard_rest = true;
            }

            let trailing = scan.trailing_bytes();
            if trailing > 0 {
                result.bytes_truncated += trailing;
                result.segments_recovered.push(seg_id);

                if repair {
                    let next_index = segment.next_index();
                    segment.truncate_at(scan.valid_length, next_index)?;
                    tracing::warn!(
                        "Truncated segment {} at offset {} (removed {} bytes)",
                        seg_id,
                        scan.valid_length,
                        trailing
                    );
                }
            }

            expected_first = Some(segment.next_index());
        }

        if result.first_index.is_some() && result.last_index.is_none() {
            // Only empty segments
            result.first_index = None;
        }

        Ok(result)
    }

    fn discard(
        &self,
        seg_id: SegmentId,
        repair: bool,
        result: &mut RecoveryResult,
    ) -> Result<(), JournalError> {
        result.segments_discarded.push(seg_id);
        if repair {
            std::fs::remove_file(self.dir.join(segment_filename(seg_id)))?;
            tracing::warn!("Removed segment {} from journal at {}", seg_id, self.dir.display());
        }
        Ok(())
    }
}

/// Verifies journal integrity without modifying anything.
pub fn verify_journal(dir: impl AsRef<Path>) -> Result<RecoveryResult, JournalError> {
    RecoveryScanner::new(dir).scan(false)
}

/// Repairs a journal so that it opens without data loss beyond what is reported.
pub fn repair_journal(dir: impl AsRef<Path>) -> Result<RecoveryResult, JournalError> {
    RecoveryScanner::new(dir).scan(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordData;
    use crate::segment::SegmentDescriptor;
    use crate::serializer::RecordDataWriter;
    use bytes::Bytes;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_segment(dir: &Path, id: SegmentId, first_index: u64, count: u64) -> Segment {
        let serializer = BinaryJournalSerializer;
        let mut segment =
            Segment::create(dir, SegmentDescriptor::new(id, first_index, 4096)).unwrap();
        for i in 0..count {
            let record = RecordData::new(
                first_index + i,
                (first_index + i) as i64 * 10,
                Bytes::from(format!(r#"{{"seq":{}}}"#, i)),
            );
            let writer = RecordDataWriter::new(&serializer, &record);
            segment.append(&writer, &serializer).unwrap();
        }
        segment.sync().unwrap();
        segment
    }

    #[test]
    fn test_recovery_clean_journal() {
        let dir = TempDir::new().unwrap();
        write_segment(dir.path(), 1, 1, 5);
        write_segment(dir.path(), 2, 6, 3);

        let result = verify_journal(dir.path()).unwrap();
        assert!(result.is_clean());
        assert_eq!(result.valid_records, 8);
        assert_eq!(result.first_index, Some(1));
        assert_eq!(result.last_index, Some(8));
        assert_eq!(result.last_asqn, 80);
    }

    #[test]
    fn test_recovery_partial_write() {
        let dir = TempDir::new().unwrap();
        let segment = write_segment(dir.path(), 1, 1, 3);

        // Append garbage to simulate partial write
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(segment.path())
            .unwrap();
        file.write_all(&[1, 0, 0, 0, 0, 0, 0, 1, 0]).unwrap(); // Metadata without data
        drop(file);

        // Verify detects the issue
        let result = verify_journal(dir.path()).unwrap();
        assert_eq!(result.valid_records, 3);
        assert_eq!(result.bytes_truncated, 9);
        assert_eq!(result.segments_recovered, vec![1]);

        // Repair fixes it
        let result = repair_journal(dir.path()).unwrap();
        assert_eq!(result.valid_records, 3);

        // Verify again - should be clean
        let result = verify_journal(dir.path()).unwrap();
        assert!(result.is_clean());
    }

    #[test]
    fn test_recovery_discards_segments_after_corruption() {
        let dir = TempDir::new().unwrap();
        let first = write_segment(dir.path(), 1, 1, 4);
        write_segment(dir.path(), 2, 5, 4);

        let mut bytes = std::fs::read(first.path()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(first.path(), &bytes).unwrap();

        let result = verify_journal(dir.path()).unwrap();
        assert_eq!(result.valid_records, 3);
        assert_eq!(result.invalid_records, 1);
        assert_eq!(result.segments_discarded, vec![2]);
        assert_eq!(result.last_index, Some(3));
        assert!(dir.path().join(segment_filename(2)).exists());

        repair_journal(dir.path()).unwrap();
        assert!(!dir.path().join(segment_filename(2)).exists());
        assert!(verify_journal(dir.path()).unwrap().is_clean());
    }

    #[test]
    fn test_recovery_detects_gap() {
        let dir = TempDir::new().unwrap();
        write_segment(dir.path(), 1, 1, 2);
        write_segment(dir.path(), 2, 10, 2);

        let result = verify_journal(dir.path()).unwrap();
        assert_eq!(result.valid_records, 2);
        assert_eq!(result.segments_discarded, vec![2]);
        assert_eq!(result.segments_with_errors.len(), 1);
        assert!(!result.is_clean());
    }

    #[test]
    fn test_recovery_empty_directory() {
        let dir = TempDir::new().unwrap();
        let result = verify_journal(dir.path()).unwrap();
        assert!(result.is_clean());
        assert_eq!(result.valid_records, 0);
        assert_eq!(result.first_index, None);
        assert_eq!(result.last_asqn, ASQN_IGNORE);
    }
}
