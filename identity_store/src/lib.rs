// SPDX-License-Identifier: MIT OR Apache-2.0
//! Group and identity resolution core.
//!
//! Maintains a hierarchy of groups (collections of entities and other
//! groups), answers transitive membership and policy questions, and
//! persists everything through a bounded set of storage buckets.
//!
//! Layering, leaf first:
//! - [`packer`]: maps many logical objects onto few durable records
//! - [`memdb`]: multi-index in-memory view of the live group set
//! - graph validation: keeps the membership hierarchy a DAG
//! - resolver: transitive ancestor groups and policy unions per entity
//!
//! Mutations persist to storage first and commit to the in-memory
//! indexes second, so a storage failure never strands the indexes.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::format_collect)]

mod error;
mod graph;
mod group;
mod memdb;
mod packer;
mod resolve;
mod store;


pub use error::{IdentityError, Result};
pub use group::{parse_metadata, parse_policies, Entity, Group, GroupParams};
pub use memdb::GroupIndex;
pub use packer::{PackedItem, StoragePacker};
pub use store::IdentityStore;

/// Configuration for an [`IdentityStore`].
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Number of durable buckets for packed group records.
    pub group_bucket_count: u64,
    /// Number of durable buckets for packed entity records.
    pub entity_bucket_count: u64,
    /// Storage key prefix for group buckets.
    pub group_bucket_prefix: String,
    /// Storage key prefix for entity buckets.
    pub entity_bucket_prefix: String,
    /// Prefix for system-assigned group names.
    pub generated_name_prefix: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            group_bucket_count: 256,
            entity_bucket_count: 256,
            group_bucket_prefix: "packer/buckets/group/".to_string(),
            entity_bucket_prefix: "packer/buckets/entity/".to_string(),
            generated_name_prefix: "group_".to_string(),
        }
    }
}

impl IdentityConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn group_bucket_count(mut self, count: u64) -> Self {
        self.group_bucket_count = count;
        self
    }

    #[must_use]
    pub fn entity_bucket_count(mut self, count: u64) -> Self {
        self.entity_bucket_count = count;
        self
    }

    #[must_use]
    pub fn generated_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.generated_name_prefix = prefix.into();
        self
    }
}
