//! Backup contents and status.

use crate::identifier::{BackupIdentifier, BackupIndexIdentifier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// What a backup was taken of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupDescriptor {
    /// Snapshot the backup contains, if any.
    pub snapshot_id: Option<String>,
    /// Log position of the checkpoint.
    pub checkpoint_position: u64,
    pub number_of_partitions: u32,
    pub broker_version: String,
}

/// Local files making up one part of a backup, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamedFileSet {
    files: BTreeMap<String, PathBuf>,
}

impl NamedFileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.insert(name, path);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.files.insert(name.into(), path.into());
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.files.get(name).map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.files
            .iter()
            .map(|(name, path)| (name.as_str(), path.as_path()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// A backup: its identity, descriptor and files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub id: BackupIdentifier,
    pub descriptor: BackupDescriptor,
    pub snapshot: NamedFileSet,
    pub segments: NamedFileSet,
}

/// Lifecycle state of a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupStatusCode {
    DoesNotExist,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for BackupStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackupStatusCode::DoesNotExist => "DOES_NOT_EXIST",
            BackupStatusCode::InProgress => "IN_PROGRESS",
            BackupStatusCode::Completed => "COMPLETED",
            BackupStatusCode::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Status of a backup as reported by a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupStatus {
    pub id: BackupIdentifier,
    pub code: BackupStatusCode,
    pub descriptor: Option<BackupDescriptor>,
    pub failure_reason: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl BackupStatus {
    pub fn does_not_exist(id: BackupIdentifier) -> Self {
        Self {
            id,
            code: BackupStatusCode::DoesNotExist,
            descriptor: None,
            failure_reason: None,
            created: None,
            last_modified: None,
        }
    }
}

/// A backup index stored as a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupIndexHandle {
    pub id: BackupIndexIdentifier,
    pub path: PathBuf,
}

impl BackupIndexHandle {
    pub fn new(id: BackupIndexIdentifier, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
        }
    }
}
