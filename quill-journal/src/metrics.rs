//! Journal I/O counters.
//!
//! A [`JournalMetrics`] handle is created by whoever owns the journal and handed
//! to it through [`JournalConfig`](crate::JournalConfig), so several journals can
//! share or separate their counters as the owner sees fit.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by the journal.
#[derive(Debug, Default)]
pub struct JournalMetrics {
    appends: AtomicU64,
    bytes_appended: AtomicU64,
    reads: AtomicU64,
    flushes: AtomicU64,
    segments_created: AtomicU64,
    segments_deleted: AtomicU64,
    bytes_truncated: AtomicU64,
}

/// Point-in-time copy of [`JournalMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JournalStats {
    /// Records appended.
    pub appends: u64,
    /// Bytes written for appended records, metadata included.
    pub bytes_appended: u64,
    /// Read operations served.
    pub reads: u64,
    /// fsync calls issued.
    pub flushes: u64,
    pub segments_created: u64,
    pub segments_deleted: u64,
    /// Bytes discarded by recovery or tail truncation.
    pub bytes_truncated: u64,
}

impl JournalMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_append(&self, bytes: usize) {
        self.appends.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_segment_created(&self) {
        self.segments_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_segments_deleted(&self, count: usize) {
        self.segments_deleted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_truncation(&self, bytes: u64) {
        self.bytes_truncated.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> JournalStats {
        JournalStats {
            appends: self.appends.load(Ordering::Relaxed),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            segments_created: self.segments_created.load(Ordering::Relaxed),
            segments_deleted: self.segments_deleted.load(Ordering::Relaxed),
            bytes_truncated: self.bytes_truncated.load(Ordering::Relaxed),
        }
    }
}
