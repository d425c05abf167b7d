//! Partition backups for quill.
//!
//! A [`BackupStore`] saves the snapshot and journal segment files of a
//! partition at a checkpoint, reports their status and restores them.
//! [`FileSystemBackupStore`] keeps everything under one directory, with a
//! JSON manifest and CRC32C checksum per file.

pub mod backup;
pub mod error;
pub mod identifier;
pub mod store;

pub use backup::{
    Backup, BackupDescriptor, BackupIndexHandle, BackupStatus, BackupStatusCode, NamedFileSet,
};
pub use error::BackupError;
pub use identifier::{BackupIdentifier, BackupIdentifierWildcard, BackupIndexIdentifier};
pub use store::{BackupStore, FileSystemBackupStore};
