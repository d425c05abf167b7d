//! Backup stores.

use crate::backup::{
    Backup, BackupDescriptor, BackupIndexHandle, BackupStatus, BackupStatusCode, NamedFileSet,
};
use crate::error::BackupError;
use crate::identifier::{BackupIdentifier, BackupIdentifierWildcard, BackupIndexIdentifier};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

/// Storage for partition backups.
pub trait BackupStore: Send + Sync {
    /// Saves a backup, copying all its files. Returns the completed status.
    fn save(&self, backup: &Backup) -> Result<BackupStatus, BackupError>;

    /// Returns the status of a backup; unknown backups report `DoesNotExist`.
    fn get_status(&self, id: &BackupIdentifier) -> Result<BackupStatus, BackupError>;

    /// Lists the status of every backup matching `wildcard`.
    fn list(&self, wildcard: &BackupIdentifierWildcard) -> Result<Vec<BackupStatus>, BackupError>;

    /// Copies a completed backup into `target`, verifying every file.
    fn restore(&self, id: &BackupIdentifier, target: &Path) -> Result<Backup, BackupError>;

    /// Marks a backup as failed.
    fn mark_failed(&self, id: &BackupIdentifier, reason: &str)
        -> Result<BackupStatus, BackupError>;

    fn delete(&self, id: &BackupIdentifier) -> Result<(), BackupError>;

    /// Copies the stored index into `target`, returning a handle to the copy.
    fn restore_index(
        &self,
        id: &BackupIndexIdentifier,
        target: &Path,
    ) -> Result<BackupIndexHandle, BackupError>;

    /// Uploads the index file the handle points to.
    fn store_index(&self, handle: &BackupIndexHandle) -> Result<BackupIndexHandle, BackupError>;
}

/// Checksum and size of one stored file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntry {
    size: u64,
    checksum: String,
}

/// Stored next to every backup's files.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    id: BackupIdentifier,
    descriptor: BackupDescriptor,
    code: BackupStatusCode,
    failure_reason: Option<String>,
    created: DateTime<Utc>,
    last_modified: DateTime<Utc>,
    snapshot_files: BTreeMap<String, FileEntry>,
    segment_files: BTreeMap<String, FileEntry>,
}

impl Manifest {
    fn status(&self) -> BackupStatus {
        BackupStatus {
            id: self.id,
            code: self.code,
            descriptor: Some(self.descriptor.clone()),
            failure_reason: self.failure_reason.clone(),
            created: Some(self.created),
            last_modified: Some(self.last_modified),
        }
    }
}

const MANIFEST_FILE: &str = "manifest.json";
const SNAPSHOT_DIR: &str = "snapshot";
const SEGMENTS_DIR: &str = "segments";
const INDEX_FILE: &str = "index";
const INDEX_CHECKSUM_FILE: &str = "index.json";

fn checksum(data: &[u8]) -> String {
    format!("{:08x}", crc32c::crc32c(data))
}

fn validate_name(name: &str) -> Result<(), BackupError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(BackupError::InvalidFileName(name.to_string()));
    }
    Ok(())
}

/// Writes `data` to `path` through a temporary file and rename.
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), BackupError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let mut file = File::create(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Backup store on a local or mounted filesystem.
///
/// Layout under the root directory:
///
/// ```text
/// backups/<partition>/<checkpoint>/<node>/manifest.json
/// backups/<partition>/<checkpoint>/<node>/snapshot/<file>
/// backups/<partition>/<checkpoint>/<node>/segments/<file>
/// indexes/<partition>/<node>/index
/// ```
pub struct FileSystemBackupStore {
    root: PathBuf,
    /// Serializes manifest updates.
    write_lock: Mutex<()>,
}

impl FileSystemBackupStore {
    /// Opens or creates a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, BackupError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("backups"))?;
        fs::create_dir_all(root.join("indexes"))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn backup_dir(&self, id: &BackupIdentifier) -> PathBuf {
        self.root
            .join("backups")
            .join(id.partition_id.to_string())
            .join(id.checkpoint_id.to_string())
            .join(id.node_id.to_string())
    }

    fn index_dir(&self, id: &BackupIndexIdentifier) -> PathBuf {
        self.root
            .join("indexes")
            .join(id.partition_id.to_string())
            .join(id.node_id.to_string())
    }

    fn load_manifest(&self, id: &BackupIdentifier) -> Result<Option<Manifest>, BackupError> {
        let path = self.backup_dir(id).join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(&path)?);
        Ok(Some(serde_json::from_reader(reader)?))
    }

    fn save_manifest(&self, manifest: &Manifest) -> Result<(), BackupError> {
        let path = self.backup_dir(&manifest.id).join(MANIFEST_FILE);
        let data = serde_json::to_vec_pretty(manifest)?;
        write_atomic(&path, &data)
    }

    /// Copies `files` into `dir`, returning their checksums.
    fn copy_files(
        dir: &Path,
        files: &NamedFileSet,
    ) -> Result<BTreeMap<String, FileEntry>, BackupError> {
        fs::create_dir_all(dir)?;
        let mut entries = BTreeMap::new();
        for (name, source) in files.iter() {
            let data = fs::read(source)?;
            write_atomic(&dir.join(name), &data)?;
            entries.insert(
                name.to_string(),
                FileEntry {
                    size: data.len() as u64,
                    checksum: checksum(&data),
                },
            );
        }
        Ok(entries)
    }

    /// Copies stored files into `target`, verifying their checksums.
    fn restore_files(
        source_dir: &Path,
        target: &Path,
        entries: &BTreeMap<String, FileEntry>,
    ) -> Result<NamedFileSet, BackupError> {
        fs::create_dir_all(target)?;
        let mut files = NamedFileSet::new();
        for (name, entry) in entries {
            let data = fs::read(source_dir.join(name))?;
            let actual = checksum(&data);
            if actual != entry.checksum || data.len() as u64 != entry.size {
                return Err(BackupError::Corruption(format!(
                    "file {} checksum mismatch (expected {}, got {})",
                    name, entry.checksum, actual
                )));
            }
            let path = target.join(name);
            write_atomic(&path, &data)?;
            files.insert(name.clone(), path);
        }
        Ok(files)
    }

    fn list_numeric_dirs(dir: &Path) -> Result<Vec<u64>, BackupError> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

impl BackupStore for FileSystemBackupStore {
    fn save(&self, backup: &Backup) -> Result<BackupStatus, BackupError> {
        for name in backup.snapshot.names().chain(backup.segments.names()) {
            validate_name(name)?;
        }

        let _guard = self.write_lock.lock();
        if self.load_manifest(&backup.id)?.is_some() {
            return Err(BackupError::AlreadyExists(backup.id));
        }

        let dir = self.backup_dir(&backup.id);
        fs::create_dir_all(&dir)?;

        let now = Utc::now();
        let mut manifest = Manifest {
            id: backup.id,
            descriptor: backup.descriptor.clone(),
            code: BackupStatusCode::InProgress,
            failure_reason: None,
            created: now,
            last_modified: now,
            snapshot_files: BTreeMap::new(),
            segment_files: BTreeMap::new(),
        };
        self.save_manifest(&manifest)?;

        let copied = Self::copy_files(&dir.join(SNAPSHOT_DIR), &backup.snapshot).and_then(
            |snapshot| {
                Self::copy_files(&dir.join(SEGMENTS_DIR), &backup.segments)
                    .map(|segments| (snapshot, segments))
            },
        );

        match copied {
            Ok((snapshot_files, segment_files)) => {
                manifest.snapshot_files = snapshot_files;
                manifest.segment_files = segment_files;
                manifest.code = BackupStatusCode::Completed;
                manifest.last_modified = Utc::now();
                self.save_manifest(&manifest)?;

                tracing::info!(
                    "Saved backup {} ({} snapshot files, {} segment files)",
                    backup.id,
                    backup.snapshot.len(),
                    backup.segments.len()
                );
                Ok(manifest.status())
            }
            Err(e) => {
                manifest.code = BackupStatusCode::Failed;
                manifest.failure_reason = Some(e.to_string());
                manifest.last_modified = Utc::now();
                self.save_manifest(&manifest)?;
                tracing::warn!("Backup {} failed: {}", backup.id, e);
                Err(e)
            }
        }
    }

    fn get_status(&self, id: &BackupIdentifier) -> Result<BackupStatus, BackupError> {
        Ok(self
            .load_manifest(id)?
            .map(|manifest| manifest.status())
            .unwrap_or_else(|| BackupStatus::does_not_exist(*id)))
    }

    fn list(&self, wildcard: &BackupIdentifierWildcard) -> Result<Vec<BackupStatus>, BackupError> {
        let backups = self.root.join("backups");
        let mut statuses = Vec::new();

        for partition_id in Self::list_numeric_dirs(&backups)? {
            let partition_dir = backups.join(partition_id.to_string());
            for checkpoint_id in Self::list_numeric_dirs(&partition_dir)? {
                let checkpoint_dir = partition_dir.join(checkpoint_id.to_string());
                for node_id in Self::list_numeric_dirs(&checkpoint_dir)? {
                    let (Ok(node_id), Ok(partition_id)) =
                        (u32::try_from(node_id), u32::try_from(partition_id))
                    else {
                        continue;
                    };
                    let id = BackupIdentifier::new(node_id, partition_id, checkpoint_id);
                    if !wildcard.matches(&id) {
                        continue;
                    }
                    if let Some(manifest) = self.load_manifest(&id)? {
                        statuses.push(manifest.status());
                    }
                }
            }
        }

        Ok(statuses)
    }

    fn restore(&self, id: &BackupIdentifier, target: &Path) -> Result<Backup, BackupError> {
        let manifest = self.load_manifest(id)?.ok_or(BackupError::NotFound(*id))?;
        if manifest.code != BackupStatusCode::Completed {
            return Err(BackupError::NotCompleted {
                id: *id,
                status: manifest.code.to_string(),
            });
        }

        let dir = self.backup_dir(id);
        let snapshot = Self::restore_files(
            &dir.join(SNAPSHOT_DIR),
            &target.join(SNAPSHOT_DIR),
            &manifest.snapshot_files,
        )?;
        let segments = Self::restore_files(
            &dir.join(SEGMENTS_DIR),
            &target.join(SEGMENTS_DIR),
            &manifest.segment_files,
        )?;

        tracing::info!("Restored backup {} into {}", id, target.display());

        Ok(Backup {
            id: *id,
            descriptor: manifest.descriptor,
            snapshot,
            segments,
        })
    }

    fn mark_failed(
        &self,
        id: &BackupIdentifier,
        reason: &str,
    ) -> Result<BackupStatus, BackupError> {
        let _guard = self.write_lock.lock();
        let mut manifest = self.load_manifest(id)?.ok_or(BackupError::NotFound(*id))?;
        manifest.code = BackupStatusCode::Failed;
        manifest.failure_reason = Some(reason.to_string());
        manifest.last_modified = Utc::now();
        self.save_manifest(&manifest)?;
        Ok(manifest.status())
    }

    fn delete(&self, id: &BackupIdentifier) -> Result<(), BackupError> {
        let _guard = self.write_lock.lock();
        let dir = self.backup_dir(id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            tracing::info!("Deleted backup {}", id);
        }
        Ok(())
    }

    fn restore_index(
        &self,
        id: &BackupIndexIdentifier,
        target: &Path,
    ) -> Result<BackupIndexHandle, BackupError> {
        let dir = self.index_dir(id);
        let index_path = dir.join(INDEX_FILE);
        if !index_path.exists() {
            return Err(BackupError::IndexNotFound(*id));
        }

        let data = fs::read(&index_path)?;
        let reader = BufReader::new(File::open(dir.join(INDEX_CHECKSUM_FILE))?);
        let entry: FileEntry = serde_json::from_reader(reader)?;
        let actual = checksum(&data);
        if actual != entry.checksum {
            return Err(BackupError::Corruption(format!(
                "backup index {} checksum mismatch (expected {}, got {})",
                id, entry.checksum, actual
            )));
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(target, &data)?;
        Ok(BackupIndexHandle::new(*id, target))
    }

    fn store_index(&self, handle: &BackupIndexHandle) -> Result<BackupIndexHandle, BackupError> {
        let _guard = self.write_lock.lock();
        let data = fs::read(&handle.path)?;
        let dir = self.index_dir(&handle.id);
        fs::create_dir_all(&dir)?;

        write_atomic(&dir.join(INDEX_FILE), &data)?;
        let entry = FileEntry {
            size: data.len() as u64,
            checksum: checksum(&data),
        };
        write_atomic(
            &dir.join(INDEX_CHECKSUM_FILE),
            &serde_json::to_vec_pretty(&entry)?,
        )?;

        tracing::debug!("Stored backup index {} ({} bytes)", handle.id, data.len());
        Ok(handle.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn descriptor() -> BackupDescriptor {
        BackupDescriptor {
            snapshot_id: Some("100-1-200-190".to_string()),
            checkpoint_position: 200,
            number_of_partitions: 3,
            broker_version: "8.5.0".to_string(),
        }
    }

    fn backup(source: &Path, id: BackupIdentifier) -> Backup {
        fs::create_dir_all(source).unwrap();
        fs::write(source.join("snapshot.chunk"), b"snapshot data").unwrap();
        fs::write(source.join("checksum.sfv"), b"1234").unwrap();
        fs::write(source.join("segment-1.log"), b"segment data").unwrap();

        Backup {
            id,
            descriptor: descriptor(),
            snapshot: NamedFileSet::new()
                .with_file("snapshot.chunk", source.join("snapshot.chunk"))
                .with_file("checksum.sfv", source.join("checksum.sfv")),
            segments: NamedFileSet::new().with_file("segment-1.log", source.join("segment-1.log")),
        }
    }

    #[test]
    fn test_save_and_restore() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemBackupStore::open(dir.path().join("store")).unwrap();
        let id = BackupIdentifier::new(1, 2, 10);

        let status = store.save(&backup(&dir.path().join("src"), id)).unwrap();
        assert_eq!(status.code, BackupStatusCode::Completed);
        assert_eq!(status.descriptor, Some(descriptor()));

        let target = dir.path().join("restored");
        let restored = store.restore(&id, &target).unwrap();
        assert_eq!(restored.descriptor, descriptor());
        assert_eq!(restored.snapshot.len(), 2);
        let segment = restored.segments.get("segment-1.log").unwrap();
        assert_eq!(fs::read(segment).unwrap(), b"segment data");
    }

    #[test]
    fn test_status_of_unknown_backup() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemBackupStore::open(dir.path()).unwrap();
        let status = store.get_status(&BackupIdentifier::new(1, 1, 1)).unwrap();
        assert_eq!(status.code, BackupStatusCode::DoesNotExist);
        assert!(status.descriptor.is_none());
    }

    #[test]
    fn test_save_twice_fails() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemBackupStore::open(dir.path().join("store")).unwrap();
        let id = BackupIdentifier::new(1, 1, 1);
        let backup = backup(&dir.path().join("src"), id);

        store.save(&backup).unwrap();
        assert!(matches!(store.save(&backup), Err(BackupError::AlreadyExists(_))));
    }

    #[test]
    fn test_save_with_missing_file_marks_failed() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemBackupStore::open(dir.path().join("store")).unwrap();
        let id = BackupIdentifier::new(1, 1, 5);
        let mut backup = backup(&dir.path().join("src"), id);
        backup.segments.insert("missing.log", dir.path().join("nope.log"));

        assert!(store.save(&backup).is_err());
        let status = store.get_status(&id).unwrap();
        assert_eq!(status.code, BackupStatusCode::Failed);
        assert!(status.failure_reason.is_some());

        assert!(matches!(
            store.restore(&id, &dir.path().join("target")),
            Err(BackupError::NotCompleted { .. })
        ));
    }

    #[test]
    fn test_list_by_wildcard() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemBackupStore::open(dir.path().join("store")).unwrap();
        let source = dir.path().join("src");
        for (node, partition, checkpoint) in [(1, 1, 10), (2, 1, 10), (1, 2, 10), (1, 1, 20)] {
            store
                .save(&backup(&source, BackupIdentifier::new(node, partition, checkpoint)))
                .unwrap();
        }

        assert_eq!(store.list(&BackupIdentifierWildcard::any()).unwrap().len(), 4);
        assert_eq!(
            store
                .list(&BackupIdentifierWildcard::for_partition(1))
                .unwrap()
                .len(),
            3
        );
        let checkpoint_10_node_1 = store
            .list(&BackupIdentifierWildcard::any().with_checkpoint(10).with_node(1))
            .unwrap();
        assert_eq!(checkpoint_10_node_1.len(), 2);
    }

    #[test]
    fn test_restore_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemBackupStore::open(dir.path().join("store")).unwrap();
        let id = BackupIdentifier::new(1, 1, 1);
        store.save(&backup(&dir.path().join("src"), id)).unwrap();

        let stored = store
            .backup_dir(&id)
            .join(SEGMENTS_DIR)
            .join("segment-1.log");
        fs::write(&stored, b"tampered").unwrap();

        assert!(matches!(
            store.restore(&id, &dir.path().join("target")),
            Err(BackupError::Corruption(_))
        ));
    }

    #[test]
    fn test_mark_failed_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemBackupStore::open(dir.path().join("store")).unwrap();
        let id = BackupIdentifier::new(3, 1, 7);
        store.save(&backup(&dir.path().join("src"), id)).unwrap();

        let status = store.mark_failed(&id, "checkpoint aborted").unwrap();
        assert_eq!(status.code, BackupStatusCode::Failed);
        assert_eq!(status.failure_reason.as_deref(), Some("checkpoint aborted"));

        store.delete(&id).unwrap();
        assert_eq!(
            store.get_status(&id).unwrap().code,
            BackupStatusCode::DoesNotExist
        );
    }

    #[test]
    fn test_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemBackupStore::open(dir.path().join("store")).unwrap();
        let mut backup = backup(&dir.path().join("src"), BackupIdentifier::new(1, 1, 1));
        backup.snapshot.insert("../escape", dir.path().join("src/checksum.sfv"));

        assert!(matches!(
            store.save(&backup),
            Err(BackupError::InvalidFileName(_))
        ));
    }

    #[test]
    fn test_index_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemBackupStore::open(dir.path().join("store")).unwrap();
        let id = BackupIndexIdentifier::new(1, 2);

        assert!(matches!(
            store.restore_index(&id, &dir.path().join("restored-index")),
            Err(BackupError::IndexNotFound(_))
        ));

        let local = dir.path().join("local-index");
        fs::write(&local, b"index v1").unwrap();
        let handle = store.store_index(&BackupIndexHandle::new(id, &local)).unwrap();
        assert_eq!(handle.path, local);

        let restored = store
            .restore_index(&id, &dir.path().join("restored/index"))
            .unwrap();
        assert_eq!(fs::read(&restored.path).unwrap(), b"index v1");
        assert_eq!(restored.id, id);
    }

    #[test]
    fn test_index_replaced_atomically() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemBackupStore::open(dir.path().join("store")).unwrap();
        let id = BackupIndexIdentifier::new(1, 2);
        let local = dir.path().join("local-index");

        fs::write(&local, b"index v1").unwrap();
        store.store_index(&BackupIndexHandle::new(id, &local)).unwrap();
        fs::write(&local, b"index v2, longer").unwrap();
        store.store_index(&BackupIndexHandle::new(id, &local)).unwrap();

        let mut names: Vec<_> = fs::read_dir(store.index_dir(&id))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![INDEX_FILE, INDEX_CHECKSUM_FILE]);

        let restored = store.restore_index(&id, &dir.path().join("restored")).unwrap();
        assert_eq!(fs::read(&restored.path).unwrap(), b"index v2, longer");
    }
}
