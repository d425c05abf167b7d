//! # quill-raft
//!
//! The state a Raft node must never forget.
//!
//! This crate provides:
//! - Cluster members and the membership [`Configuration`], including joint consensus
//! - A pluggable [`ConfigurationCodec`] with a JSON implementation
//! - The [`MetaStore`], which durably persists term, vote and configuration

pub mod codec;
pub mod configuration;
pub mod error;
pub mod member;
pub mod meta_store;

pub use codec::{ConfigurationCodec, JsonConfigurationCodec};
pub use configuration::Configuration;
pub use error::{CodecError, ConfigurationError, MetaStoreError};
pub use member::{MemberId, MemberType, RaftMember};
pub use meta_store::{MetaStore, MetaStoreConfig, StorageLevel};
