//! Backup identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one node's backup of one partition at one checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackupIdentifier {
    pub node_id: u32,
    pub partition_id: u32,
    pub checkpoint_id: u64,
}

impl BackupIdentifier {
    pub fn new(node_id: u32, partition_id: u32, checkpoint_id: u64) -> Self {
        Self {
            node_id,
            partition_id,
            checkpoint_id,
        }
    }
}

impl fmt::Display for BackupIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node={} partition={} checkpoint={}",
            self.node_id, self.partition_id, self.checkpoint_id
        )
    }
}

/// Selects backups; unset fields match anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupIdentifierWildcard {
    pub node_id: Option<u32>,
    pub partition_id: Option<u32>,
    pub checkpoint_id: Option<u64>,
}

impl BackupIdentifierWildcard {
    /// Matches every backup.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn for_partition(partition_id: u32) -> Self {
        Self {
            partition_id: Some(partition_id),
            ..Self::default()
        }
    }

    pub fn with_node(mut self, node_id: u32) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn with_checkpoint(mut self, checkpoint_id: u64) -> Self {
        self.checkpoint_id = Some(checkpoint_id);
        self
    }

    pub fn matches(&self, id: &BackupIdentifier) -> bool {
        self.node_id.map_or(true, |n| n == id.node_id)
            && self.partition_id.map_or(true, |p| p == id.partition_id)
            && self.checkpoint_id.map_or(true, |c| c == id.checkpoint_id)
    }
}

impl From<BackupIdentifier> for BackupIdentifierWildcard {
    fn from(id: BackupIdentifier) -> Self {
        Self {
            node_id: Some(id.node_id),
            partition_id: Some(id.partition_id),
            checkpoint_id: Some(id.checkpoint_id),
        }
    }
}

/// Identifies the backup index kept by one node for one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackupIndexIdentifier {
    pub partition_id: u32,
    pub node_id: u32,
}

impl BackupIndexIdentifier {
    pub fn new(partition_id: u32, node_id: u32) -> Self {
        Self {
            partition_id,
            node_id,
        }
    }
}

impl fmt::Display for BackupIndexIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partition={} node={}", self.partition_id, self.node_id)
    }
}
