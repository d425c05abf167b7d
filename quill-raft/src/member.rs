//! Cluster members.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Unique identifier of a cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MemberId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Role of a member in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberType {
    /// Not participating in replication.
    Inactive,
    /// Receives replicated entries but never votes.
    Passive,
    /// Catching up; becomes active once promoted.
    Promotable,
    /// Full voting member.
    Active,
}

impl MemberType {
    /// Returns true if the member takes part in elections and commit quorums.
    pub fn is_voting(self) -> bool {
        matches!(self, MemberType::Active)
    }
}

/// A member of a Raft configuration.
///
/// Two members are equal when their ids are equal, whatever their type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftMember {
    id: MemberId,
    #[serde(rename = "type")]
    member_type: MemberType,
    updated: DateTime<Utc>,
}

impl RaftMember {
    pub fn new(id: impl Into<MemberId>, member_type: MemberType) -> Self {
        Self {
            id: id.into(),
            member_type,
            updated: Utc::now(),
        }
    }

    pub fn with_updated(mut self, updated: DateTime<Utc>) -> Self {
        self.updated = updated;
        self
    }

    pub fn id(&self) -> &MemberId {
        &self.id
    }

    pub fn member_type(&self) -> MemberType {
        self.member_type
    }

    /// Time of the last change to this member.
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.updated
    }
}

impl PartialEq for RaftMember {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RaftMember {}

impl Hash for RaftMember {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
