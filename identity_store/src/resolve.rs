// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transitive membership resolution.
//!
//! An entity belongs to the groups that list it directly, plus every
//! ancestor reachable by walking `parent_group_ids` upward. The result
//! is a pure set computation over graph reachability: visit order never
//! changes membership, and shared ancestors reached via multiple paths
//! appear exactly once.

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::{Group, GroupIndex};

/// Every group `entity_id` transitively belongs to, sorted by group ID.
pub(crate) fn transitive_groups(index: &GroupIndex, entity_id: &str) -> Vec<Group> {
    let mut visited = HashSet::new();
    let mut result = Vec::new();
    let mut queue = VecDeque::new();

    for group in index.groups_by_member_entity_id(entity_id) {
        if visited.insert(group.id.clone()) {
            queue.push_back(group.clone());
            result.push(group);
        }
    }

    while let Some(group) = queue.pop_front() {
        for parent_id in &group.parent_group_ids {
            if visited.contains(parent_id) {
                continue;
            }
            // Dangling parent references resolve to nothing.
            let Some(parent) = index.group_by_id(parent_id) else {
                continue;
            };
            visited.insert(parent.id.clone());
            queue.push_back(parent.clone());
            result.push(parent);
        }
    }

    result.sort_by(|a, b| a.id.cmp(&b.id));
    result
}

/// De-duplicated union of policies across the entity's transitive groups.
pub(crate) fn group_policies(index: &GroupIndex, entity_id: &str) -> Vec<String> {
    let mut policies = BTreeSet::new();
    for group in transitive_groups(index, entity_id) {
        policies.extend(group.policies);
    }
    policies.into_iter().collect()
}
