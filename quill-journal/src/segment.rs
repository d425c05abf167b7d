//! Journal segment files.
//!
//! The journal is split into bounded segments. Each segment file starts with a
//! fixed descriptor followed by records laid out back to back:
//!
//! ```text
//! +-------+---------+----------+---------+-------------+------------------+--------+
//! | magic | version | reserved | id      | first_index | max_segment_size | crc32c |
//! | 4     | 1       | 3        | 8       | 8           | 4                | 4      |
//! +-------+---------+----------+---------+-------------+------------------+--------+
//! | metadata | data | metadata | data | ...                                        |
//! +----------------------------------------------------------------------------------+
//! ```

use crate::error::{InsufficientSpace, JournalError};
use crate::record::{compute_checksum, PersistedJournalRecord, RecordMetadata};
use crate::serializer::{BufferWriter, JournalRecordSerializer};
use crate::SEGMENT_DESCRIPTOR_SIZE;
use bytes::{Buf, BufMut, Bytes};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Segment identifier (monotonically increasing).
pub type SegmentId = u64;

/// Magic bytes for segment files: "QJNL"
pub const SEGMENT_MAGIC: [u8; 4] = *b"QJNL";

/// Current segment descriptor version.
pub const DESCRIPTOR_VERSION: u8 = 1;

/// Segment file name format: NNNNNNNNNNNNNNNN.log (16 hex digits)
pub fn segment_filename(id: SegmentId) -> String {
    format!("{:016x}.log", id)
}

/// Parse segment ID from filename.
pub fn parse_segment_filename(name: &str) -> Option<SegmentId> {
    let name = name.strip_suffix(".log")?;
    if name.len() != 16 {
        return None;
    }
    u64::from_str_radix(name, 16).ok()
}

/// Header stored at the start of every segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub id: SegmentId,
    /// Index of the first record stored in this segment.
    pub first_index: u64,
    /// Maximum file size, descriptor included.
    pub max_segment_size: u32,
}

impl SegmentDescriptor {
    pub fn new(id: SegmentId, first_index: u64, max_segment_size: u32) -> Self {
        Self {
            id,
            first_index,
            max_segment_size,
        }
    }

    pub fn encode(&self) -> [u8; SEGMENT_DESCRIPTOR_SIZE] {
        let mut out = [0u8; SEGMENT_DESCRIPTOR_SIZE];
        let mut dst = &mut out[..];
        dst.put_slice(&SEGMENT_MAGIC);
        dst.put_u8(DESCRIPTOR_VERSION);
        dst.put_slice(&[0u8; 3]);
        dst.put_u64(self.id);
        dst.put_u64(self.first_index);
        dst.put_u32(self.max_segment_size);

        let crc = crc32c::crc32c(&out[..SEGMENT_DESCRIPTOR_SIZE - 4]);
        out[SEGMENT_DESCRIPTOR_SIZE - 4..].copy_from_slice(&crc.to_be_bytes());
        out
    }

    /// Decodes a descriptor, checking it belongs to segment `expected_id`.
    pub fn decode(buf: &[u8], expected_id: SegmentId) -> Result<Self, JournalError> {
        let invalid = |reason: String| JournalError::InvalidDescriptor {
            segment: expected_id,
            reason,
        };

        if buf.len() < SEGMENT_DESCRIPTOR_SIZE {
            return Err(invalid(format!("descriptor truncated to {} bytes", buf.len())));
        }

        let mut src = &buf[..SEGMENT_DESCRIPTOR_SIZE];
        let mut magic = [0u8; 4];
        src.copy_to_slice(&mut magic);
        if magic != SEGMENT_MAGIC {
            return Err(invalid(format!("invalid magic: {:?}", magic)));
        }

        let version = src.get_u8();
        if version != DESCRIPTOR_VERSION {
            return Err(invalid(format!("unsupported descriptor version {}", version)));
        }
        src.advance(3);

        let id = src.get_u64();
        let first_index = src.get_u64();
        let max_segment_size = src.get_u32();
        let crc_expected = src.get_u32();

        let crc_actual = crc32c::crc32c(&buf[..SEGMENT_DESCRIPTOR_SIZE - 4]);
        if crc_actual != crc_expected {
            return Err(invalid(format!(
                "CRC mismatch (expected {:#x}, got {:#x})",
                crc_expected, crc_actual
            )));
        }

        if id != expected_id {
            return Err(invalid(format!("descriptor names segment {}", id)));
        }

        Ok(Self {
            id,
            first_index,
            max_segment_size,
        })
    }
}

/// Outcome of scanning a segment's records.
#[derive(Debug)]
pub struct SegmentScan {
    /// Valid records with their byte offsets, in index order.
    pub records: Vec<(u64, PersistedJournalRecord)>,
    /// Bytes from the start of the file up to the end of the last valid record.
    pub valid_length: u64,
    /// Size of the file when it was scanned.
    pub file_length: u64,
    /// Set when the scan stopped at a corrupted record rather than at clean end of data.
    pub corruption: Option<JournalError>,
}

impl SegmentScan {
    /// Bytes past the last valid record.
    pub fn trailing_bytes(&self) -> u64 {
        self.file_length.saturating_sub(self.valid_length)
    }
}

/// Reads every valid record from a segment file.
///
/// Scanning stops at the first unwritten region, partial write or corrupted
/// record; everything from there on is not part of the valid log.
pub fn scan_segment_file(
    path: &Path,
    descriptor: &SegmentDescriptor,
    serializer: &dyn JournalRecordSerializer,
) -> Result<SegmentScan, JournalError> {
    let buf = Bytes::from(std::fs::read(path)?);
    let metadata_length = serializer.metadata_length();

    let mut records = Vec::new();
    let mut offset = SEGMENT_DESCRIPTOR_SIZE;
    let mut expected_index = descriptor.first_index;
    let mut corruption = None;

    while offset < buf.len() {
        let metadata = match serializer.read_metadata(&buf, offset) {
            Ok(Some(metadata)) => metadata,
            Ok(None) => break,
            Err(e) => {
                corruption = Some(e);
                break;
            }
        };

        let data_offset = offset + metadata_length;
        let length = metadata.length() as usize;
        if data_offset + length > buf.len() {
            // Partial write
            break;
        }

        let serialized = buf.slice(data_offset..data_offset + length);
        let actual = compute_checksum(&serialized);
        if actual != metadata.checksum() {
            corruption = Some(JournalError::CorruptedRecord {
                offset: offset as u64,
                expected: metadata.checksum(),
                actual,
            });
            break;
        }

        let record = match serializer.read_data(&buf, data_offset, length) {
            Ok(record) => record,
            Err(e) => {
                corruption = Some(e);
                break;
            }
        };

        if record.index() != expected_index {
            corruption = Some(JournalError::InvalidRecord {
                offset: offset as u64,
                reason: format!(
                    "expected index {} but found {}",
                    expected_index,
                    record.index()
                ),
            });
            break;
        }

        let total_length = metadata_length + length;
        records.push((
            offset as u64,
            PersistedJournalRecord::new(metadata, record, serialized, total_length),
        ));
        offset += total_length;
        expected_index += 1;
    }

    Ok(SegmentScan {
        records,
        valid_length: offset.min(buf.len()).max(SEGMENT_DESCRIPTOR_SIZE) as u64,
        file_length: buf.len() as u64,
        corruption,
    })
}

/// Decodes the record contained in a single serialized frame (metadata + data).
pub fn decode_frame(
    frame: &Bytes,
    serializer: &dyn JournalRecordSerializer,
) -> Result<PersistedJournalRecord, JournalError> {
    let metadata =
        serializer
            .read_metadata(frame, 0)?
            .ok_or_else(|| JournalError::InvalidRecord {
                offset: 0,
                reason: "frame holds no record".to_string(),
            })?;
    let metadata_length = serializer.metadata_length();
    let length = metadata.length() as usize;
    let record = serializer.read_data(frame, metadata_length, length)?;
    let serialized = frame.slice(metadata_length..metadata_length + length);
    Ok(PersistedJournalRecord::new(
        metadata,
        record,
        serialized,
        metadata_length + length,
    ))
}

/// A single journal segment file.
pub struct Segment {
    descriptor: SegmentDescriptor,
    path: PathBuf,
    file: File,
    size: u64,
    next_index: u64,
    sync_pending: bool,
}

impl Segment {
    /// Creates a new segment file and durably writes its descriptor.
    pub fn create(dir: &Path, descriptor: SegmentDescriptor) -> Result<Self, JournalError> {
        let path = dir.join(segment_filename(descriptor.id));
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;

        file.write_all(&descriptor.encode())?;
        file.sync_all()?;

        tracing::debug!(
            "Created segment {} (first_index={}, max_size={})",
            descriptor.id,
            descriptor.first_index,
            descriptor.max_segment_size
        );

        Ok(Self {
            descriptor,
            path,
            file,
            size: SEGMENT_DESCRIPTOR_SIZE as u64,
            next_index: descriptor.first_index,
            sync_pending: false,
        })
    }

    /// Opens an existing segment file and validates its descriptor.
    ///
    /// The segment reports no records until [`scan`](Self::scan) has run.
    pub fn open(dir: &Path, id: SegmentId) -> Result<Self, JournalError> {
        let path = dir.join(segment_filename(id));
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header = [0u8; SEGMENT_DESCRIPTOR_SIZE];
        if let Err(e) = file.read_exact(&mut header) {
            if e.kind() == ErrorKind::UnexpectedEof {
                return Err(JournalError::InvalidDescriptor {
                    segment: id,
                    reason: "file shorter than descriptor".to_string(),
                });
            }
            return Err(e.into());
        }
        let descriptor = SegmentDescriptor::decode(&header, id)?;
        let size = file.metadata()?.len();

        Ok(Self {
            descriptor,
            path,
            file,
            size,
            next_index: descriptor.first_index,
            sync_pending: false,
        })
    }

    pub fn id(&self) -> SegmentId {
        self.descriptor.id
    }

    pub fn descriptor(&self) -> &SegmentDescriptor {
        &self.descriptor
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current size of the segment file.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn first_index(&self) -> u64 {
        self.descriptor.first_index
    }

    /// Index the next appended record must carry.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Index of the last record, or `None` if the segment holds no records.
    pub fn last_index(&self) -> Option<u64> {
        if self.is_empty() {
            None
        } else {
            Some(self.next_index - 1)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.next_index == self.descriptor.first_index
    }

    /// Bytes still available before the segment reaches its maximum size.
    pub fn remaining(&self) -> usize {
        (self.descriptor.max_segment_size as u64).saturating_sub(self.size) as usize
    }

    /// Returns whether `index` falls within this segment's records.
    pub fn contains(&self, index: u64) -> bool {
        index >= self.descriptor.first_index && index < self.next_index
    }

    /// Appends one record whose data section is produced by `writer`.
    ///
    /// Returns the record's byte offset and its serialized frame. Fails with
    /// [`JournalError::InsufficientSpace`] without writing anything when the frame
    /// does not fit.
    pub fn append(
        &mut self,
        writer: &dyn BufferWriter,
        serializer: &dyn JournalRecordSerializer,
    ) -> Result<(u64, Bytes), JournalError> {
        let metadata_length = serializer.metadata_length();
        let frame_length = metadata_length + writer.length();
        let available = self.remaining();
        if frame_length > available {
            return Err(InsufficientSpace {
                required: frame_length,
                available,
            }
            .into());
        }

        let mut frame = vec![0u8; frame_length];
        writer.write(&mut frame, metadata_length)?;
        let metadata = RecordMetadata::for_serialized(&frame[metadata_length..]);
        serializer.write_metadata(&metadata, &mut frame, 0)?;

        let offset = self.size;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&frame)?;
        self.size += frame_length as u64;
        self.next_index += 1;
        self.sync_pending = true;

        Ok((offset, Bytes::from(frame)))
    }

    /// Syncs the segment to disk.
    pub fn sync(&mut self) -> Result<bool, JournalError> {
        if self.sync_pending {
            self.file.sync_data()?;
            self.sync_pending = false;
            return Ok(true);
        }
        Ok(false)
    }

    /// Reads all valid records without changing the segment.
    pub fn read_records(
        &self,
        serializer: &dyn JournalRecordSerializer,
    ) -> Result<SegmentScan, JournalError> {
        scan_segment_file(&self.path, &self.descriptor, serializer)
    }

    /// Scans the segment and positions it after its last valid record.
    pub fn scan(
        &mut self,
        serializer: &dyn JournalRecordSerializer,
    ) -> Result<SegmentScan, JournalError> {
        let scan = self.read_records(serializer)?;
        self.next_index = self.descriptor.first_index + scan.records.len() as u64;
        Ok(scan)
    }

    /// Truncates the segment at `offset`, which must be the end of a valid record
    /// preceding `next_index`.
    pub fn truncate_at(&mut self, offset: u64, next_index: u64) -> Result<(), JournalError> {
        self.file.set_len(offset)?;
        self.size = offset;
        self.next_index = next_index;
        self.sync_pending = true;
        self.sync()?;
        Ok(())
    }

    /// Removes every record after `index`, returning the number of bytes removed.
    pub fn truncate_after(
        &mut self,
        index: u64,
        serializer: &dyn JournalRecordSerializer,
    ) -> Result<u64, JournalError> {
        match self.last_index() {
            Some(last) if index < last => {}
            _ => return Ok(0),
        }

        let scan = self.read_records(serializer)?;
        let (offset, next_index) = if index < self.descriptor.first_index {
            (SEGMENT_DESCRIPTOR_SIZE as u64, self.descriptor.first_index)
        } else {
            scan.records
                .iter()
                .find(|(_, record)| record.index() == index)
                .map(|(offset, record)| (offset + record.total_length() as u64, index + 1))
                .unwrap_or((scan.valid_length, self.next_index))
        };

        let removed = self.size.saturating_sub(offset);
        self.truncate_at(offset, next_index)?;
        Ok(removed)
    }

    /// Closes and removes the segment file.
    pub fn delete(self) -> Result<(), JournalError> {
        let path = self.path.clone();
        drop(self.file);
        std::fs::remove_file(&path)?;
        tracing::debug!("Deleted segment file {}", path.display());
        Ok(())
    }
}

/// Segment directory scanner.
pub struct SegmentScanner;

impl SegmentScanner {
    /// Lists all segment IDs in a directory, sorted ascending.
    pub fn list_segments(dir: &Path) -> Result<Vec<SegmentId>, JournalError> {
        let mut segments = Vec::new();

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = parse_segment_filename(&name) {
                segments.push(id);
            }
        }

        segments.sort();
        Ok(segments)
    }

    /// Returns the latest segment ID, or None if no segments exist.
    pub fn latest_segment(dir: &Path) -> Result<Option<SegmentId>, JournalError> {
        let segments = Self::list_segments(dir)?;
        Ok(segments.last().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordData;
    use crate::serializer::{BinaryJournalSerializer, RecordDataWriter};
    use tempfile::TempDir;

    fn append_record(segment: &mut Segment, asqn: i64, data: &'static [u8]) -> (u64, Bytes) {
        let serializer = BinaryJournalSerializer;
        let record = RecordData::new(segment.next_index(), asqn, Bytes::from_static(data));
        let writer = RecordDataWriter::new(&serializer, &record);
        segment.append(&writer, &serializer).unwrap()
    }

    #[test]
    fn test_segment_filename() {
        assert_eq!(segment_filename(0), "0000000000000000.log");
        assert_eq!(segment_filename(255), "00000000000000ff.log");
        assert_eq!(segment_filename(0xDEADBEEF), "00000000deadbeef.log");
    }

    #[test]
    fn test_parse_segment_filename() {
        assert_eq!(parse_segment_filename("0000000000000000.log"), Some(0));
        assert_eq!(parse_segment_filename("00000000000000ff.log"), Some(255));
        assert_eq!(parse_segment_filename("invalid.log"), None);
        assert_eq!(parse_segment_filename("0000000000000000.txt"), None);
    }

    #[test]
    fn test_descriptor_roundtrip() {
        let descriptor = SegmentDescriptor::new(7, 1000, 4096);
        let encoded = descriptor.encode();
        assert_eq!(SegmentDescriptor::decode(&encoded, 7).unwrap(), descriptor);
    }

    #[test]
    fn test_descriptor_detects_corruption() {
        let mut encoded = SegmentDescriptor::new(7, 1000, 4096).encode();
        encoded[12] ^= 0xFF;
        assert!(matches!(
            SegmentDescriptor::decode(&encoded, 7),
            Err(JournalError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn test_descriptor_wrong_id() {
        let encoded = SegmentDescriptor::new(7, 1, 4096).encode();
        assert!(SegmentDescriptor::decode(&encoded, 8).is_err());
    }

    #[test]
    fn test_segment_create_and_append() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::create(dir.path(), SegmentDescriptor::new(1, 1, 4096)).unwrap();
        assert!(segment.is_empty());

        let (offset, frame) = append_record(&mut segment, 10, b"first");
        assert_eq!(offset, SEGMENT_DESCRIPTOR_SIZE as u64);
        assert_eq!(segment.size(), offset + frame.len() as u64);
        assert_eq!(segment.last_index(), Some(1));

        let record = decode_frame(&frame, &BinaryJournalSerializer).unwrap();
        assert_eq!(record.index(), 1);
        assert_eq!(record.asqn(), 10);
        assert_eq!(record.data().as_ref(), b"first");
    }

    #[test]
    fn test_segment_scan_after_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut segment =
                Segment::create(dir.path(), SegmentDescriptor::new(1, 5, 4096)).unwrap();
            for _ in 0..5 {
                append_record(&mut segment, -1, b"entry");
            }
            segment.sync().unwrap();
        }

        let mut segment = Segment::open(dir.path(), 1).unwrap();
        let scan = segment.scan(&BinaryJournalSerializer).unwrap();
        assert_eq!(scan.records.len(), 5);
        assert!(scan.corruption.is_none());
        assert_eq!(scan.trailing_bytes(), 0);
        assert_eq!(segment.first_index(), 5);
        assert_eq!(segment.last_index(), Some(9));
        for (i, (_, record)) in scan.records.iter().enumerate() {
            assert_eq!(record.index(), 5 + i as u64);
        }
    }

    #[test]
    fn test_segment_full_returns_insufficient_space() {
        let dir = TempDir::new().unwrap();
        let max = SEGMENT_DESCRIPTOR_SIZE as u32 + 64;
        let mut segment = Segment::create(dir.path(), SegmentDescriptor::new(1, 1, max)).unwrap();

        append_record(&mut segment, -1, b"0123456789");
        let size_before = segment.size();

        let serializer = BinaryJournalSerializer;
        let record = RecordData::new(2, -1, Bytes::from_static(b"0123456789"));
        let writer = RecordDataWriter::new(&serializer, &record);
        let result = segment.append(&writer, &serializer);
        assert!(matches!(result, Err(JournalError::InsufficientSpace(_))));
        assert_eq!(segment.size(), size_before);
        assert_eq!(segment.next_index(), 2);
    }

    #[test]
    fn test_scan_stops_at_corrupted_record() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::create(dir.path(), SegmentDescriptor::new(1, 1, 4096)).unwrap();
        append_record(&mut segment, -1, b"good");
        let (offset, _) = append_record(&mut segment, -1, b"bad!");
        append_record(&mut segment, -1, b"after");
        segment.sync().unwrap();

        // Flip the last payload byte of the second record.
        let mut bytes = std::fs::read(segment.path()).unwrap();
        let second_end = offset as usize + crate::serializer::METADATA_LENGTH + 20 + 4;
        bytes[second_end - 1] ^= 0xFF;
        std::fs::write(segment.path(), &bytes).unwrap();

        let scan = segment.read_records(&BinaryJournalSerializer).unwrap();
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.valid_length, offset);
        assert!(matches!(
            scan.corruption,
            Some(JournalError::CorruptedRecord { .. })
        ));
    }

    #[test]
    fn test_scan_ignores_partial_write() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::create(dir.path(), SegmentDescriptor::new(1, 1, 4096)).unwrap();
        append_record(&mut segment, -1, b"one");
        append_record(&mut segment, -1, b"two");
        segment.sync().unwrap();
        let valid = segment.size();

        let mut file = OpenOptions::new().append(true).open(segment.path()).unwrap();
        file.write_all(&[1, 0, 0, 0, 0, 0, 0, 0, 99, 1, 2]).unwrap();

        let scan = segment.read_records(&BinaryJournalSerializer).unwrap();
        assert_eq!(scan.records.len(), 2);
        assert_eq!(scan.valid_length, valid);
        assert!(scan.trailing_bytes() > 0);
        assert!(scan.corruption.is_none());
    }

    #[test]
    fn test_truncate_after() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::create(dir.path(), SegmentDescriptor::new(1, 1, 4096)).unwrap();
        for _ in 0..5 {
            append_record(&mut segment, -1, b"entry");
        }

        let removed = segment.truncate_after(3, &BinaryJournalSerializer).unwrap();
        assert!(removed > 0);
        assert_eq!(segment.last_index(), Some(3));

        let scan = segment.read_records(&BinaryJournalSerializer).unwrap();
        assert_eq!(scan.records.len(), 3);

        segment.truncate_after(0, &BinaryJournalSerializer).unwrap();
        assert!(segment.is_empty());
        assert_eq!(segment.size(), SEGMENT_DESCRIPTOR_SIZE as u64);
    }

    #[test]
    fn test_open_rejects_truncated_descriptor() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(segment_filename(3)), b"QJNL").unwrap();
        assert!(matches!(
            Segment::open(dir.path(), 3),
            Err(JournalError::InvalidDescriptor { segment: 3, .. })
        ));
    }

    #[test]
    fn test_list_segments() {
        let dir = TempDir::new().unwrap();
        for id in [3, 1, 2] {
            Segment::create(dir.path(), SegmentDescriptor::new(id, id, 4096)).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        assert_eq!(
            SegmentScanner::list_segments(dir.path()).unwrap(),
            vec![1, 2, 3]
        );
        assert_eq!(SegmentScanner::latest_segment(dir.path()).unwrap(), Some(3));
    }
}
