// SPDX-License-Identifier: MIT OR Apache-2.0
//! Group and entity records, plus the request parameters accepted at the
//! dispatch boundary.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::{IdentityError, Result};

/// A named collection of entities and other groups.
///
/// The membership relation is kept symmetric by explicit code: a group's
/// member groups are the groups whose `parent_group_ids` contain its ID.
/// Both sides of every edge are updated in the same committed mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Globally unique, immutable once assigned.
    pub id: String,
    /// Unique across all live groups; mutable.
    pub name: String,
    /// Arbitrary string annotations.
    pub metadata: HashMap<String, String>,
    /// Entity IDs directly assigned to this group.
    pub member_entity_ids: BTreeSet<String>,
    /// IDs of groups that list this group as a member.
    pub parent_group_ids: BTreeSet<String>,
    /// Policy names granted to every transitive member.
    pub policies: BTreeSet<String>,
    /// Durable bucket this record packs into. Derived, never user-set.
    pub bucket_key: String,
    /// Unix milliseconds at creation.
    pub creation_time: u64,
    /// Unix milliseconds at the last committed update.
    pub last_update_time: u64,
    /// Incremented on every committed update.
    pub modify_index: u64,
}

/// A unique identity. Minted by the external auth layer through the
/// registration path; the group core consumes only the ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    /// Durable bucket this record packs into.
    pub bucket_key: String,
    /// Unix milliseconds at creation.
    pub creation_time: u64,
}

/// Parameters for a group create or update request.
///
/// Every field is optional: on update, an absent field leaves the current
/// value in place, while an explicitly empty list clears the set.
#[derive(Debug, Clone, Default)]
pub struct GroupParams {
    /// Target group ID. Set to update an existing group by ID.
    pub id: Option<String>,
    /// Group name. System-assigned when absent on create.
    pub name: Option<String>,
    pub policies: Option<Vec<String>>,
    pub metadata: Option<HashMap<String, String>>,
    pub member_entity_ids: Option<Vec<String>>,
    pub member_group_ids: Option<Vec<String>>,
}

impl GroupParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn policies<I, S>(mut self, policies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policies = Some(policies.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[must_use]
    pub fn member_entity_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.member_entity_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn member_group_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.member_group_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }
}

/// Parse a comma-separated policy string into a list.
///
/// Empty segments are dropped, so `"a,,b"` and `"a, b"` both yield two
/// policies.
pub fn parse_policies(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Parse `key=value` metadata pairs as received at the dispatch boundary.
pub fn parse_metadata(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut metadata = HashMap::with_capacity(pairs.len());
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(IdentityError::InvalidMetadata(pair.clone()));
        };
        if key.is_empty() {
            return Err(IdentityError::InvalidMetadata(pair.clone()));
        }
        metadata.insert(key.to_string(), value.to_string());
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_policies_splits_and_trims() {
        assert_eq!(
            parse_policies("testpolicy1, testpolicy2"),
            vec!["testpolicy1", "testpolicy2"]
        );
        assert_eq!(parse_policies("a,,b"), vec!["a", "b"]);
        assert!(parse_policies("").is_empty());
    }

    #[test]
    fn parse_metadata_accepts_key_value_pairs() {
        let pairs = vec![
            "testkey1=testvalue1".to_string(),
            "testkey2=testvalue2".to_string(),
        ];
        let metadata = parse_metadata(&pairs).unwrap();
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata["testkey1"], "testvalue1");
        assert_eq!(metadata["testkey2"], "testvalue2");
    }

    #[test]
    fn parse_metadata_rejects_malformed_pairs() {
        let err = parse_metadata(&["noequals".to_string()]).unwrap_err();
        assert!(matches!(err, IdentityError::InvalidMetadata(_)));

        let err = parse_metadata(&["=value".to_string()]).unwrap_err();
        assert!(matches!(err, IdentityError::InvalidMetadata(_)));
    }

    #[test]
    fn parse_metadata_keeps_equals_in_value() {
        let metadata = parse_metadata(&["key=a=b".to_string()]).unwrap();
        assert_eq!(metadata["key"], "a=b");
    }
}
