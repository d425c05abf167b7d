//! Durable Raft metadata: current term, vote and latest configuration.
//!
//! Term and vote always live in `<name>.meta` and are synced on every write:
//!
//! ```text
//! +-----------+---------------+-------------------+
//! | term      | vote_len      | vote              |
//! | u64 BE    | i32 BE (-1)   | vote_len bytes    |
//! +-----------+---------------+-------------------+
//! ```
//!
//! The configuration lives in `<name>.conf` or in memory, depending on the
//! storage level:
//!
//! ```text
//! +----------+--------+-----------------+
//! | presence | length | codec bytes     |
//! | 1 byte   | u32 BE | length bytes    |
//! +----------+--------+-----------------+
//! ```

use crate::codec::{ConfigurationCodec, JsonConfigurationCodec};
use crate::configuration::Configuration;
use crate::error::MetaStoreError;
use crate::member::MemberId;
use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

const TERM_OFFSET: u64 = 0;
const VOTE_OFFSET: u64 = 8;
const META_HEADER_LENGTH: u64 = 12;
const NO_VOTE: i32 = -1;
const CONFIGURATION_HEADER_LENGTH: usize = 5;

/// Where the configuration is kept. Term and vote are always on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageLevel {
    #[default]
    Disk,
    Memory,
}

impl FromStr for StorageLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disk" => Ok(StorageLevel::Disk),
            "memory" => Ok(StorageLevel::Memory),
            other => Err(format!("unknown storage level: {}", other)),
        }
    }
}

impl fmt::Display for StorageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLevel::Disk => f.write_str("disk"),
            StorageLevel::Memory => f.write_str("memory"),
        }
    }
}

/// MetaStore configuration.
#[derive(Clone)]
pub struct MetaStoreConfig {
    /// Directory holding the store's files.
    pub dir: PathBuf,
    /// File name prefix, usually the partition name.
    pub name: String,
    pub storage_level: StorageLevel,
    pub codec: Arc<dyn ConfigurationCodec>,
}

impl MetaStoreConfig {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            storage_level: StorageLevel::default(),
            codec: Arc::new(JsonConfigurationCodec),
        }
    }

    pub fn with_storage_level(mut self, level: StorageLevel) -> Self {
        self.storage_level = level;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn ConfigurationCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(format!("{}.meta", self.name))
    }

    pub fn configuration_path(&self) -> PathBuf {
        self.dir.join(format!("{}.conf", self.name))
    }
}

impl fmt::Debug for MetaStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaStoreConfig")
            .field("dir", &self.dir)
            .field("name", &self.name)
            .field("storage_level", &self.storage_level)
            .finish()
    }
}

enum ConfigurationRegion {
    Disk(File),
    Memory(BytesMut),
}

struct Handles {
    meta: File,
    configuration: ConfigurationRegion,
}

/// Persists term, vote and configuration for one Raft partition.
///
/// Every operation takes the store's single lock, so calls are linearized.
pub struct MetaStore {
    config: MetaStoreConfig,
    /// `None` once closed.
    handles: Mutex<Option<Handles>>,
}

impl MetaStore {
    /// Opens or creates the store. A new store reports term 0 and no vote.
    pub fn open(config: MetaStoreConfig) -> Result<Self, MetaStoreError> {
        std::fs::create_dir_all(&config.dir)?;

        let mut meta = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(config.meta_path())?;

        let len = meta.metadata()?.len();
        if len == 0 {
            let mut header = [0u8; META_HEADER_LENGTH as usize];
            let mut dst = &mut header[..];
            dst.put_u64(0);
            dst.put_i32(NO_VOTE);
            meta.seek(SeekFrom::Start(TERM_OFFSET))?;
            meta.write_all(&header)?;
            meta.set_len(META_HEADER_LENGTH)?;
            meta.sync_all()?;
            tracing::debug!("Initialized meta file {}", config.meta_path().display());
        } else if len < META_HEADER_LENGTH {
            return Err(MetaStoreError::CorruptMeta(format!(
                "{} is {} bytes, expected at least {}",
                config.meta_path().display(),
                len,
                META_HEADER_LENGTH
            )));
        }

        let configuration = match config.storage_level {
            StorageLevel::Disk => ConfigurationRegion::Disk(
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(config.configuration_path())?,
            ),
            StorageLevel::Memory => ConfigurationRegion::Memory(BytesMut::new()),
        };

        tracing::info!(
            "Opened meta store {} in {} (storage level {})",
            config.name,
            config.dir.display(),
            config.storage_level
        );

        Ok(Self {
            config,
            handles: Mutex::new(Some(Handles {
                meta,
                configuration,
            })),
        })
    }

    fn with_handles<T>(
        &self,
        f: impl FnOnce(&mut Handles) -> Result<T, MetaStoreError>,
    ) -> Result<T, MetaStoreError> {
        let mut guard = self.handles.lock();
        match guard.as_mut() {
            Some(handles) => f(handles),
            None => Err(MetaStoreError::Closed),
        }
    }

    /// Durably stores the current term.
    pub fn store_term(&self, term: u64) -> Result<(), MetaStoreError> {
        self.with_handles(|handles| {
            let mut current = [0u8; 8];
            handles.meta.seek(SeekFrom::Start(TERM_OFFSET))?;
            handles.meta.read_exact(&mut current)?;
            let current = u64::from_be_bytes(current);
            if term < current {
                tracing::warn!(
                    "Term for {} going backwards: {} -> {}",
                    self.config.name,
                    current,
                    term
                );
            }

            handles.meta.seek(SeekFrom::Start(TERM_OFFSET))?;
            handles.meta.write_all(&term.to_be_bytes())?;
            handles.meta.sync_data()?;
            tracing::debug!("Stored term {} for {}", term, self.config.name);
            Ok(())
        })
    }

    /// Returns the stored term, or 0 if none was ever stored.
    pub fn load_term(&self) -> Result<u64, MetaStoreError> {
        self.with_handles(|handles| {
            let mut buf = [0u8; 8];
            handles.meta.seek(SeekFrom::Start(TERM_OFFSET))?;
            handles.meta.read_exact(&mut buf)?;
            Ok(u64::from_be_bytes(buf))
        })
    }

    /// Durably stores the vote for the current term; `None` clears it.
    pub fn store_vote(&self, vote: Option<&MemberId>) -> Result<(), MetaStoreError> {
        self.with_handles(|handles| {
            let id = vote.map(|id| id.as_str().as_bytes()).unwrap_or_default();
            let mut buf = Vec::with_capacity(4 + id.len());
            match vote {
                Some(_) => buf.put_i32(
                    i32::try_from(id.len()).map_err(|_| MetaStoreError::TooLarge("vote", id.len()))?,
                ),
                None => buf.put_i32(NO_VOTE),
            }
            buf.put_slice(id);

            handles.meta.seek(SeekFrom::Start(VOTE_OFFSET))?;
            handles.meta.write_all(&buf)?;
            handles.meta.set_len(VOTE_OFFSET + buf.len() as u64)?;
            handles.meta.sync_data()?;

            match vote {
                Some(id) => tracing::debug!("Stored vote for {} in {}", id, self.config.name),
                None => tracing::debug!("Cleared vote in {}", self.config.name),
            }
            Ok(())
        })
    }

    /// Returns the stored vote, if any.
    pub fn load_vote(&self) -> Result<Option<MemberId>, MetaStoreError> {
        self.with_handles(|handles| {
            let mut len_buf = [0u8; 4];
            handles.meta.seek(SeekFrom::Start(VOTE_OFFSET))?;
            handles.meta.read_exact(&mut len_buf)?;

            let len = i32::from_be_bytes(len_buf);
            if len == NO_VOTE {
                return Ok(None);
            }
            if len < 0 {
                return Err(MetaStoreError::CorruptMeta(format!(
                    "invalid vote length {}",
                    len
                )));
            }

            let available = handles
                .meta
                .metadata()?
                .len()
                .saturating_sub(VOTE_OFFSET + 4);
            if len as u64 > available {
                return Err(MetaStoreError::CorruptMeta(format!(
                    "vote length {} exceeds the {} bytes left in the file",
                    len, available
                )));
            }

            let mut id = vec![0u8; len as usize];
            handles.meta.read_exact(&mut id)?;
            let id = String::from_utf8(id)
                .map_err(|e| MetaStoreError::CorruptMeta(format!("vote is not UTF-8: {}", e)))?;
            Ok(Some(MemberId::new(id)))
        })
    }

    /// Stores `configuration`, replacing the previous one.
    pub fn store_configuration(&self, configuration: &Configuration) -> Result<(), MetaStoreError> {
        let bytes = self.config.codec.encode(configuration)?;
        let length = u32::try_from(bytes.len())
            .map_err(|_| MetaStoreError::TooLarge("configuration", bytes.len()))?;
        let mut buf = BytesMut::with_capacity(CONFIGURATION_HEADER_LENGTH + bytes.len());
        buf.put_u8(1);
        buf.put_u32(length);
        buf.put_slice(&bytes);

        self.with_handles(|handles| {
            match &mut handles.configuration {
                ConfigurationRegion::Disk(file) => {
                    file.seek(SeekFrom::Start(0))?;
                    file.write_all(&buf)?;
                    file.set_len(buf.len() as u64)?;
                    file.sync_data()?;
                }
                ConfigurationRegion::Memory(region) => {
                    region.clear();
                    region.extend_from_slice(&buf);
                }
            }
            Ok(())
        })?;

        tracing::info!(
            "Stored configuration for {} at index {} (term {}, {} members, joint={})",
            self.config.name,
            configuration.index(),
            configuration.term(),
            configuration.all_members().len(),
            configuration.requires_joint_consensus()
        );
        Ok(())
    }

    /// Returns the stored configuration, if any.
    pub fn load_configuration(&self) -> Result<Option<Configuration>, MetaStoreError> {
        let region = self.with_handles(|handles| match &mut handles.configuration {
            ConfigurationRegion::Disk(file) => {
                let mut buf = Vec::new();
                file.seek(SeekFrom::Start(0))?;
                file.read_to_end(&mut buf)?;
                Ok(buf)
            }
            ConfigurationRegion::Memory(region) => Ok(region.to_vec()),
        })?;

        let mut src = &region[..];
        if !src.has_remaining() {
            return Ok(None);
        }
        let present = src.get_u8();
        if present == 0 {
            return Ok(None);
        }
        if src.remaining() < CONFIGURATION_HEADER_LENGTH - 1 {
            return Err(MetaStoreError::CorruptConfiguration(format!(
                "header is {} bytes, expected {}",
                region.len(),
                CONFIGURATION_HEADER_LENGTH
            )));
        }
        let length = src.get_u32() as usize;
        if length == 0 {
            return Ok(None);
        }
        if src.len() < length {
            return Err(MetaStoreError::CorruptConfiguration(format!(
                "expected {} bytes, found {}",
                length,
                src.len()
            )));
        }

        self.config
            .codec
            .decode(&src[..length])
            .map(Some)
            .map_err(|e| MetaStoreError::CorruptConfiguration(e.to_string()))
    }

    /// Syncs and releases all file handles. Later operations fail with
    /// [`MetaStoreError::Closed`].
    pub fn close(&self) -> Result<(), MetaStoreError> {
        let handles = self.handles.lock().take();
        if let Some(handles) = handles {
            handles.meta.sync_all()?;
            tracing::debug!("Closed meta store {}", self.config.name);
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.handles.lock().is_none()
    }

    pub fn storage_level(&self) -> StorageLevel {
        self.config.storage_level
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }
}
