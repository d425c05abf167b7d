//! Raft cluster membership configuration.

use crate::error::ConfigurationError;
use crate::member::{MemberId, RaftMember};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Immutable snapshot of cluster membership.
///
/// While `old_members` is non-empty the cluster is in joint consensus: decisions
/// need a majority of both the old and the new member sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ConfigurationData")]
pub struct Configuration {
    index: u64,
    term: u64,
    time: i64,
    new_members: Vec<RaftMember>,
    old_members: Vec<RaftMember>,
}

/// Unvalidated wire form of [`Configuration`].
#[derive(Deserialize)]
struct ConfigurationData {
    index: u64,
    term: u64,
    time: i64,
    new_members: Vec<RaftMember>,
    #[serde(default)]
    old_members: Vec<RaftMember>,
}

impl TryFrom<ConfigurationData> for Configuration {
    type Error = ConfigurationError;

    fn try_from(data: ConfigurationData) -> Result<Self, Self::Error> {
        Configuration::new(
            data.index,
            data.term,
            data.time,
            data.new_members,
            data.old_members,
        )
    }
}

fn dedup_by_id(members: Vec<RaftMember>) -> Vec<RaftMember> {
    let mut seen = HashSet::with_capacity(members.len());
    members
        .into_iter()
        .filter(|member| seen.insert(member.id().clone()))
        .collect()
}

impl Configuration {
    /// Creates a configuration. Members are deduplicated by id, keeping the
    /// first occurrence.
    pub fn new(
        index: u64,
        term: u64,
        time: i64,
        new_members: Vec<RaftMember>,
        old_members: Vec<RaftMember>,
    ) -> Result<Self, ConfigurationError> {
        if time <= 0 {
            return Err(ConfigurationError::InvalidTime(time));
        }

        Ok(Self {
            index,
            term,
            time,
            new_members: dedup_by_id(new_members),
            old_members: dedup_by_id(old_members),
        })
    }

    /// Creates a configuration outside of joint consensus.
    pub fn stable(
        index: u64,
        term: u64,
        time: i64,
        members: Vec<RaftMember>,
    ) -> Result<Self, ConfigurationError> {
        Self::new(index, term, time, members, Vec::new())
    }

    /// Journal index of the entry that introduced this configuration.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    /// Creation time in milliseconds since the Unix epoch.
    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn new_members(&self) -> &[RaftMember] {
        &self.new_members
    }

    pub fn old_members(&self) -> &[RaftMember] {
        &self.old_members
    }

    pub fn requires_joint_consensus(&self) -> bool {
        !self.old_members.is_empty()
    }

    /// Union of new and old members, deduplicated by id.
    pub fn all_members(&self) -> Vec<RaftMember> {
        dedup_by_id(
            self.new_members
                .iter()
                .chain(self.old_members.iter())
                .cloned()
                .collect(),
        )
    }

    /// Looks up a member of either set.
    pub fn member(&self, id: &MemberId) -> Option<&RaftMember> {
        self.new_members
            .iter()
            .chain(self.old_members.iter())
            .find(|member| member.id() == id)
    }
}
