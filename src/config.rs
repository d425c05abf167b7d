//! quill configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via QUILL_CONFIG or --config)
//! 3. Environment variables

use quill_raft::StorageLevel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Identity of this node.
    pub node: NodeConfig,
}

impl Config {
    /// Loads configuration from `path` if given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides looked up by environment variable name.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        self.storage.apply_overrides(&var);
        self.node.apply_overrides(&var);
    }

    /// Checks values that cannot be expressed in the types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage.segment_size().map(|_| ())
    }

    /// Renders the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Directory holding this node's partition data.
    pub fn partition_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .join("partitions")
            .join(self.node.partition_id.to_string())
    }

    /// Journal directory of this node's partition.
    pub fn journal_dir(&self) -> PathBuf {
        self.partition_dir().join("journal")
    }

    /// Raft metadata directory of this node's partition.
    pub fn meta_dir(&self) -> PathBuf {
        self.partition_dir().join("meta")
    }

    /// Name of this partition's metadata store files.
    pub fn meta_store_name(&self) -> String {
        format!("raft-partition-{}", self.node.partition_id)
    }

    /// Root of the filesystem backup store.
    pub fn backup_dir(&self) -> PathBuf {
        self.storage.data_dir.join("backups")
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory.
    pub data_dir: PathBuf,
    /// Where the Raft configuration is kept.
    pub storage_level: StorageLevel,
    /// Journal segment size in megabytes.
    pub segment_size_mb: u32,
    /// Flush policy for journal appends.
    pub flush_policy: FlushPolicy,
}

/// Flush policy for journal appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Fsync after every append.
    EveryWrite,
    /// Fsync after N appends.
    EveryN(u32),
    /// Leave flushing to the caller.
    Never,
}

impl From<FlushPolicy> for quill_journal::FlushPolicy {
    fn from(policy: FlushPolicy) -> Self {
        match policy {
            FlushPolicy::EveryWrite => quill_journal::FlushPolicy::EveryWrite,
            FlushPolicy::EveryN(n) => quill_journal::FlushPolicy::EveryN(n),
            FlushPolicy::Never => quill_journal::FlushPolicy::Never,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            storage_level: StorageLevel::Disk,
            segment_size_mb: 64,
            flush_policy: FlushPolicy::EveryWrite,
        }
    }
}

impl StorageConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var("QUILL_DATA") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Some(level) = var("QUILL_STORAGE_LEVEL") {
            if let Ok(parsed) = level.parse() {
                self.storage_level = parsed;
            }
        }

        if let Some(size) = var("QUILL_SEGMENT_SIZE_MB") {
            if let Ok(mb) = size.parse() {
                self.segment_size_mb = mb;
            }
        }

        if let Some(policy) = var("QUILL_FLUSH_POLICY") {
            self.flush_policy = match policy.to_lowercase().as_str() {
                "every_write" | "everywrite" => FlushPolicy::EveryWrite,
                "never" => FlushPolicy::Never,
                s if s.starts_with("every_n:") => {
                    let n = s[8..].parse().unwrap_or(100);
                    FlushPolicy::EveryN(n)
                }
                _ => FlushPolicy::EveryWrite,
            };
        }
    }

    /// Returns the journal segment size in bytes.
    pub fn segment_size(&self) -> Result<u32, ConfigError> {
        match self.segment_size_mb.checked_mul(1024 * 1024) {
            Some(bytes) if bytes > 0 => Ok(bytes),
            _ => Err(ConfigError::ValidationError(format!(
                "segment_size_mb must be between 1 and 4095, got {}",
                self.segment_size_mb
            ))),
        }
    }
}

/// Identity of this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Raft member id.
    pub member_id: String,
    /// Partition whose data this node inspects.
    pub partition_id: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            member_id: "0".to_string(),
            partition_id: 1,
        }
    }
}

impl NodeConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(id) = var("QUILL_MEMBER_ID") {
            self.member_id = id;
        }

        if let Some(partition) = var("QUILL_PARTITION") {
            if let Ok(id) = partition.parse() {
                self.partition_id = id;
            }
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    SerializeError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::SerializeError(e) => write!(f, "failed to render config: {}", e),
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.segment_size().unwrap(), 64 * 1024 * 1024);
        assert_eq!(config.storage.storage_level, StorageLevel::Disk);
        assert_eq!(config.storage.flush_policy, FlushPolicy::EveryWrite);
        assert_eq!(config.node.partition_id, 1);
    }

    #[test]
    fn test_partition_paths() {
        let config = Config::default();
        assert_eq!(
            config.journal_dir(),
            PathBuf::from("./data/partitions/1/journal")
        );
        assert_eq!(config.meta_dir(), PathBuf::from("./data/partitions/1/meta"));
        assert_eq!(config.meta_store_name(), "raft-partition-1");
        assert_eq!(config.backup_dir(), PathBuf::from("./data/backups"));
    }

    #[test]
    fn test_yaml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("quill.yaml");
        std::fs::write(
            &path,
            "storage:\n  data_dir: /var/lib/quill\n  storage_level: memory\n  flush_policy: !every_n 10\nnode:\n  partition_id: 3\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/quill"));
        assert_eq!(config.storage.storage_level, StorageLevel::Memory);
        assert_eq!(config.storage.flush_policy, FlushPolicy::EveryN(10));
        assert_eq!(config.storage.segment_size_mb, 64);
        assert_eq!(config.node.partition_id, 3);
        assert_eq!(config.node.member_id, "0");
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/quill.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(..)));
        assert!(err.to_string().contains("/nonexistent/quill.yaml"));
    }

    #[test]
    fn test_invalid_yaml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("quill.yaml");
        std::fs::write(&path, "storage:\n  segment_size_mb: lots\n").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::ParseError(..))
        ));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.apply_overrides(env(&[
            ("QUILL_DATA", "/tmp/quill"),
            ("QUILL_STORAGE_LEVEL", "MEMORY"),
            ("QUILL_SEGMENT_SIZE_MB", "8"),
            ("QUILL_FLUSH_POLICY", "every_n:50"),
            ("QUILL_PARTITION", "7"),
            ("QUILL_MEMBER_ID", "node-2"),
        ]));

        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/quill"));
        assert_eq!(config.storage.storage_level, StorageLevel::Memory);
        assert_eq!(config.storage.segment_size().unwrap(), 8 * 1024 * 1024);
        assert_eq!(config.storage.flush_policy, FlushPolicy::EveryN(50));
        assert_eq!(config.node.partition_id, 7);
        assert_eq!(config.node.member_id, "node-2");
    }

    #[test]
    fn test_unparseable_overrides_ignored() {
        let mut config = Config::default();
        config.apply_overrides(env(&[
            ("QUILL_STORAGE_LEVEL", "tape"),
            ("QUILL_SEGMENT_SIZE_MB", "big"),
            ("QUILL_FLUSH_POLICY", "sometimes"),
        ]));
        assert_eq!(config.storage.storage_level, StorageLevel::Disk);
        assert_eq!(config.storage.segment_size_mb, 64);
        assert_eq!(config.storage.flush_policy, FlushPolicy::EveryWrite);
    }

    #[test]
    fn test_segment_size_validation() {
        let mut config = Config::default();
        config.storage.segment_size_mb = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
        config.storage.segment_size_mb = 4096;
        assert!(config.validate().is_err());
        config.storage.segment_size_mb = 4095;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flush_policy_conversion() {
        assert_eq!(
            quill_journal::FlushPolicy::from(FlushPolicy::EveryN(5)),
            quill_journal::FlushPolicy::EveryN(5)
        );
        assert_eq!(
            quill_journal::FlushPolicy::from(FlushPolicy::Never),
            quill_journal::FlushPolicy::Never
        );
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = Config::default();
        config.storage.flush_policy = FlushPolicy::EveryN(25);
        config.node.member_id = "a".to_string();

        let yaml = config.to_yaml().unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.storage.flush_policy, FlushPolicy::EveryN(25));
        assert_eq!(parsed.node.member_id, "a");
    }
}
