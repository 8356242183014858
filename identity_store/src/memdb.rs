// SPDX-License-Identifier: MIT OR Apache-2.0
//! Indexed in-memory store for the live group set.
//!
//! One coarse `RwLock` guards every index table, so an upsert or delete
//! is atomic relative to all queries: no reader ever observes a group
//! present in one index and absent from another. Read accessors return
//! owned copies; mutation goes through [`GroupIndex::upsert`], which
//! takes ownership of the new value.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

use crate::{Group, IdentityError, Result};

#[derive(Debug, Default)]
struct Tables {
    by_id: HashMap<String, Group>,
    /// name -> group ID. Bijection onto live groups.
    by_name: HashMap<String, String>,
    /// parent group ID -> IDs of its direct member groups.
    by_parent: HashMap<String, BTreeSet<String>>,
    /// policy name -> IDs of groups granting it.
    by_policy: HashMap<String, BTreeSet<String>>,
    /// entity ID -> IDs of groups listing it directly.
    by_member_entity: HashMap<String, BTreeSet<String>>,
}

impl Tables {
    fn link(&mut self, group: Group) {
        self.by_name.insert(group.name.clone(), group.id.clone());
        for parent in &group.parent_group_ids {
            self.by_parent
                .entry(parent.clone())
                .or_default()
                .insert(group.id.clone());
        }
        for policy in &group.policies {
            self.by_policy
                .entry(policy.clone())
                .or_default()
                .insert(group.id.clone());
        }
        for entity in &group.member_entity_ids {
            self.by_member_entity
                .entry(entity.clone())
                .or_default()
                .insert(group.id.clone());
        }
        self.by_id.insert(group.id.clone(), group);
    }

    fn unlink(&mut self, group: &Group) {
        self.by_name.remove(&group.name);
        for parent in &group.parent_group_ids {
            Self::remove_posting(&mut self.by_parent, parent, &group.id);
        }
        for policy in &group.policies {
            Self::remove_posting(&mut self.by_policy, policy, &group.id);
        }
        for entity in &group.member_entity_ids {
            Self::remove_posting(&mut self.by_member_entity, entity, &group.id);
        }
        self.by_id.remove(&group.id);
    }

    fn remove_posting(table: &mut HashMap<String, BTreeSet<String>>, key: &str, id: &str) {
        if let Some(ids) = table.get_mut(key) {
            ids.remove(id);
            if ids.is_empty() {
                table.remove(key);
            }
        }
    }

    fn collect(&self, table: &HashMap<String, BTreeSet<String>>, key: &str) -> Vec<Group> {
        table
            .get(key)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Multi-index view of the live group set.
#[derive(Debug, Default)]
pub struct GroupIndex {
    tables: RwLock<Tables>,
}

impl GroupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `group` across every index.
    ///
    /// Rejects a name already held by a different group; on rejection
    /// nothing changes.
    pub fn upsert(&self, group: Group) -> Result<()> {
        let mut tables = self.tables.write();
        if let Some(holder_id) = tables.by_name.get(&group.name) {
            if *holder_id != group.id {
                return Err(IdentityError::DuplicateName {
                    name: group.name.clone(),
                    holder_id: holder_id.clone(),
                });
            }
        }
        if let Some(old) = tables.by_id.get(&group.id).cloned() {
            tables.unlink(&old);
        }
        tables.link(group);
        Ok(())
    }

    /// Remove the group from every index, returning it.
    pub fn delete(&self, id: &str) -> Option<Group> {
        let mut tables = self.tables.write();
        let group = tables.by_id.get(id).cloned()?;
        tables.unlink(&group);
        Some(group)
    }

    pub fn group_by_id(&self, id: &str) -> Option<Group> {
        self.tables.read().by_id.get(id).cloned()
    }

    pub fn group_by_name(&self, name: &str) -> Option<Group> {
        let tables = self.tables.read();
        let id = tables.by_name.get(name)?;
        tables.by_id.get(id).cloned()
    }

    /// Groups that are direct members of the group `parent_id`.
    pub fn groups_by_parent_group_id(&self, parent_id: &str) -> Vec<Group> {
        let tables = self.tables.read();
        tables.collect(&tables.by_parent, parent_id)
    }

    /// Groups whose policy set contains `policy`.
    pub fn groups_by_policy(&self, policy: &str) -> Vec<Group> {
        let tables = self.tables.read();
        tables.collect(&tables.by_policy, policy)
    }

    /// Groups that directly list `entity_id` as a member.
    pub fn groups_by_member_entity_id(&self, entity_id: &str) -> Vec<Group> {
        let tables = self.tables.read();
        tables.collect(&tables.by_member_entity, entity_id)
    }

    /// IDs of the direct member groups of `group_id` (one hop).
    pub fn member_group_ids(&self, group_id: &str) -> Vec<String> {
        self.tables
            .read()
            .by_parent
            .get(group_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live groups.
    pub fn len(&self) -> usize {
        self.tables.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: &str, name: &str) -> Group {
        Group {
            id: id.to_string(),
            name: name.to_string(),
            ..Group::default()
        }
    }

    #[test]
    fn upsert_then_query_every_index() {
        let index = GroupIndex::new();
        let mut g = group("g1", "eng");
        g.parent_group_ids.insert("p1".to_string());
        g.policies.insert("engpolicy".to_string());
        g.member_entity_ids.insert("e1".to_string());
        index.upsert(g).unwrap();

        assert_eq!(index.group_by_id("g1").unwrap().name, "eng");
        assert_eq!(index.group_by_name("eng").unwrap().id, "g1");
        assert_eq!(index.groups_by_parent_group_id("p1").len(), 1);
        assert_eq!(index.groups_by_policy("engpolicy").len(), 1);
        assert_eq!(index.groups_by_member_entity_id("e1").len(), 1);
    }

    #[test]
    fn upsert_is_idempotent() {
        let index = GroupIndex::new();
        let mut g = group("g1", "eng");
        g.policies.insert("engpolicy".to_string());
        index.upsert(g.clone()).unwrap();
        index.upsert(g).unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.groups_by_policy("engpolicy").len(), 1);
    }

    #[test]
    fn upsert_rederives_postings() {
        let index = GroupIndex::new();
        let mut g = group("g1", "eng");
        g.policies.insert("old".to_string());
        index.upsert(g.clone()).unwrap();

        g.policies.clear();
        g.policies.insert("new".to_string());
        g.name = "engineering".to_string();
        index.upsert(g).unwrap();

        assert!(index.groups_by_policy("old").is_empty());
        assert_eq!(index.groups_by_policy("new").len(), 1);
        assert!(index.group_by_name("eng").is_none());
        assert_eq!(index.group_by_name("engineering").unwrap().id, "g1");
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let index = GroupIndex::new();
        index.upsert(group("g1", "eng")).unwrap();

        let err = index.upsert(group("g2", "eng")).unwrap_err();
        assert_eq!(
            err,
            IdentityError::DuplicateName {
                name: "eng".to_string(),
                holder_id: "g1".to_string(),
            }
        );
        // Rejection leaves the index unchanged.
        assert_eq!(index.len(), 1);
        assert!(index.group_by_id("g2").is_none());
    }

    #[test]
    fn delete_removes_every_posting() {
        let index = GroupIndex::new();
        let mut g = group("g1", "eng");
        g.parent_group_ids.insert("p1".to_string());
        g.policies.insert("engpolicy".to_string());
        g.member_entity_ids.insert("e1".to_string());
        index.upsert(g).unwrap();

        let removed = index.delete("g1").unwrap();
        assert_eq!(removed.id, "g1");
        assert!(index.group_by_id("g1").is_none());
        assert!(index.group_by_name("eng").is_none());
        assert!(index.groups_by_parent_group_id("p1").is_empty());
        assert!(index.groups_by_policy("engpolicy").is_empty());
        assert!(index.groups_by_member_entity_id("e1").is_empty());

        assert!(index.delete("g1").is_none());
    }
}
