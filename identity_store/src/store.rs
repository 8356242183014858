// SPDX-License-Identifier: MIT OR Apache-2.0
//! Identity store orchestration: entity registration, group CRUD, and
//! the commit discipline tying the packer and the in-memory indexes
//! together.
//!
//! Every group mutation follows the same shape: validate against the
//! committed graph, build the new parent plus every symmetrically
//! affected child, persist all of them through the packer, then commit
//! all of them to memdb. The durable write happens first, so a storage
//! failure aborts with the indexes unchanged.

use std::{
    collections::BTreeSet,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use kv_store::StorageBackend;

use crate::{
    graph::{membership_diff, would_cycle},
    Entity, Group, GroupIndex, GroupParams, IdentityConfig, IdentityError, Result, StoragePacker,
};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

fn generate_id() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// The group/identity resolution core.
///
/// Owns the live indexes and the durable packers. Constructed explicitly
/// at startup and handed to request handlers; holds no ambient global
/// state.
#[derive(Debug)]
pub struct IdentityStore {
    memdb: GroupIndex,
    entities: DashMap<String, Entity>,
    group_packer: StoragePacker<Group>,
    entity_packer: StoragePacker<Entity>,
    config: IdentityConfig,
    /// Serializes every group mutation: the cycle check and the
    /// symmetric edge commit must not interleave with another mutation.
    mutation_lock: Mutex<()>,
}

impl IdentityStore {
    /// Open a store over `backend`, rebuilding the in-memory indexes
    /// from the packed buckets.
    pub fn open(backend: Arc<dyn StorageBackend>, config: IdentityConfig) -> Result<Self> {
        let group_packer = StoragePacker::new(
            backend.clone(),
            config.group_bucket_prefix.clone(),
            config.group_bucket_count,
        );
        let entity_packer = StoragePacker::new(
            backend,
            config.entity_bucket_prefix.clone(),
            config.entity_bucket_count,
        );

        let store = Self {
            memdb: GroupIndex::new(),
            entities: DashMap::new(),
            group_packer,
            entity_packer,
            config,
            mutation_lock: Mutex::new(()),
        };

        for entity in store.entity_packer.all_items()? {
            store.entities.insert(entity.id.clone(), entity);
        }
        for group in store.group_packer.all_items()? {
            store.memdb.upsert(group)?;
        }

        debug!(
            groups = store.memdb.len(),
            entities = store.entities.len(),
            "identity store loaded"
        );
        Ok(store)
    }

    /// Open with the default configuration.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Result<Self> {
        Self::open(backend, IdentityConfig::default())
    }

    /// Mint a new entity. Called by the external auth layer; the group
    /// core consumes only the returned ID.
    pub fn register_entity(&self) -> Result<Entity> {
        let id = generate_id();
        let entity = Entity {
            bucket_key: self.entity_packer.bucket_key(&id),
            creation_time: now_millis(),
            id: id.clone(),
        };
        self.entity_packer.put_item(&entity)?;
        self.entities.insert(id, entity.clone());
        debug!(entity_id = %entity.id, "entity registered");
        Ok(entity)
    }

    pub fn entity_by_id(&self, id: &str) -> Option<Entity> {
        self.entities.get(id).map(|e| e.value().clone())
    }

    /// Create a group, or update one resolved by `id` (not-found if
    /// unknown) or by an existing `name`.
    pub fn register_group(&self, params: GroupParams) -> Result<Group> {
        let _guard = self.mutation_lock.lock();

        if let Some(id) = params.id.clone() {
            let group = self
                .memdb
                .group_by_id(&id)
                .ok_or(IdentityError::GroupNotFound(id))?;
            return self.apply_group_update(group, false, params);
        }
        if let Some(name) = &params.name {
            if let Some(group) = self.memdb.group_by_name(name) {
                return self.apply_group_update(group, false, params);
            }
        }

        let id = generate_id();
        let name = params
            .name
            .clone()
            .unwrap_or_else(|| format!("{}{}", self.config.generated_name_prefix, &id[..8]));
        let group = Group {
            bucket_key: self.group_packer.bucket_key(&id),
            id,
            name,
            ..Group::default()
        };
        self.apply_group_update(group, true, params)
    }

    /// Update an existing group addressed by name. Lookup miss is a
    /// not-found error, never an implicit create.
    pub fn update_group_by_name(&self, name: &str, params: GroupParams) -> Result<Group> {
        let _guard = self.mutation_lock.lock();
        let group = self
            .memdb
            .group_by_name(name)
            .ok_or_else(|| IdentityError::GroupNameNotFound(name.to_string()))?;
        self.apply_group_update(group, false, params)
    }

    /// Replace the member-group set of `group_id`. All edge changes
    /// apply atomically or not at all.
    pub fn set_member_groups(&self, group_id: &str, member_group_ids: &[String]) -> Result<Group> {
        let _guard = self.mutation_lock.lock();
        let group = self
            .memdb
            .group_by_id(group_id)
            .ok_or_else(|| IdentityError::GroupNotFound(group_id.to_string()))?;
        let params = GroupParams::new().member_group_ids(member_group_ids.iter().cloned());
        self.apply_group_update(group, false, params)
    }

    /// Delete a group. Unknown IDs are a no-op; children referencing the
    /// group as a parent are rewritten in the same mutation.
    pub fn delete_group(&self, id: &str) -> Result<()> {
        let _guard = self.mutation_lock.lock();
        if self.memdb.group_by_id(id).is_none() {
            return Ok(());
        }

        let mut children = self.memdb.groups_by_parent_group_id(id);
        let now = now_millis();
        for child in &mut children {
            child.parent_group_ids.remove(id);
            child.last_update_time = now.max(child.last_update_time);
            child.modify_index += 1;
        }

        for child in &children {
            self.group_packer.put_item(child)?;
        }
        self.group_packer.delete_item(id)?;

        for child in children {
            self.memdb.upsert(child)?;
        }
        self.memdb.delete(id);
        debug!(group_id = %id, "group deleted");
        Ok(())
    }

    pub fn group_by_id(&self, id: &str) -> Option<Group> {
        self.memdb.group_by_id(id)
    }

    pub fn group_by_name(&self, name: &str) -> Option<Group> {
        self.memdb.group_by_name(name)
    }

    /// Direct member groups of `parent_id`.
    pub fn groups_by_parent_group_id(&self, parent_id: &str) -> Vec<Group> {
        self.memdb.groups_by_parent_group_id(parent_id)
    }

    pub fn groups_by_policy(&self, policy: &str) -> Vec<Group> {
        self.memdb.groups_by_policy(policy)
    }

    pub fn groups_by_member_entity_id(&self, entity_id: &str) -> Vec<Group> {
        self.memdb.groups_by_member_entity_id(entity_id)
    }

    /// IDs of the direct member groups of `group_id` (one hop).
    pub fn member_group_ids_by_id(&self, group_id: &str) -> Result<Vec<String>> {
        if self.memdb.group_by_id(group_id).is_none() {
            return Err(IdentityError::GroupNotFound(group_id.to_string()));
        }
        Ok(self.memdb.member_group_ids(group_id))
    }

    /// Every group the entity transitively belongs to.
    pub fn transitive_groups_by_entity_id(&self, entity_id: &str) -> Vec<Group> {
        crate::resolve::transitive_groups(&self.memdb, entity_id)
    }

    /// De-duplicated union of policies across the entity's transitive
    /// groups.
    pub fn group_policies_by_entity_id(&self, entity_id: &str) -> Vec<String> {
        crate::resolve::group_policies(&self.memdb, entity_id)
    }

    /// Validate `params` against the committed graph, then persist and
    /// commit the group plus every symmetrically affected child.
    ///
    /// Caller holds `mutation_lock`.
    fn apply_group_update(&self, mut group: Group, create: bool, params: GroupParams) -> Result<Group> {
        if let Some(name) = params.name {
            group.name = name;
        }
        if let Some(existing) = self.memdb.group_by_name(&group.name) {
            if existing.id != group.id {
                return Err(IdentityError::DuplicateName {
                    name: group.name,
                    holder_id: existing.id,
                });
            }
        }

        if let Some(policies) = params.policies {
            group.policies = policies.into_iter().collect();
        }
        if let Some(metadata) = params.metadata {
            group.metadata = metadata;
        }
        if let Some(entity_ids) = params.member_entity_ids {
            for entity_id in &entity_ids {
                if !self.entities.contains_key(entity_id) {
                    return Err(IdentityError::MemberEntityNotFound(entity_id.clone()));
                }
            }
            group.member_entity_ids = entity_ids.into_iter().collect();
        }

        let mut updated_children = Vec::new();
        if let Some(member_group_ids) = params.member_group_ids {
            let requested: BTreeSet<String> = member_group_ids.into_iter().collect();
            let current: BTreeSet<String> =
                self.memdb.member_group_ids(&group.id).into_iter().collect();
            let diff = membership_diff(&current, &requested);

            for child_id in &diff.added {
                let Some(mut child) = self.memdb.group_by_id(child_id) else {
                    return Err(IdentityError::MemberGroupNotFound(child_id.clone()));
                };
                if would_cycle(&self.memdb, &group.id, child_id) {
                    warn!(
                        group_id = %group.id,
                        member_group_id = %child_id,
                        "rejected member group: would create a cycle"
                    );
                    return Err(IdentityError::CycleDetected {
                        group_id: group.id,
                        member_group_id: child_id.clone(),
                    });
                }
                child.parent_group_ids.insert(group.id.clone());
                updated_children.push(child);
            }
            for child_id in &diff.removed {
                if let Some(mut child) = self.memdb.group_by_id(child_id) {
                    child.parent_group_ids.remove(&group.id);
                    updated_children.push(child);
                }
            }
        }

        let now = now_millis().max(group.last_update_time);
        if create {
            group.creation_time = now;
        }
        group.last_update_time = now;
        group.modify_index += 1;
        for child in &mut updated_children {
            child.last_update_time = now.max(child.last_update_time);
            child.modify_index += 1;
        }

        // Durable first. A failure here aborts with memdb untouched.
        for child in &updated_children {
            self.group_packer.put_item(child)?;
        }
        self.group_packer.put_item(&group)?;

        for child in updated_children {
            self.memdb.upsert(child)?;
        }
        self.memdb.upsert(group.clone())?;
        debug!(
            group_id = %group.id,
            modify_index = group.modify_index,
            created = create,
            "group committed"
        );
        Ok(group)
    }
}
