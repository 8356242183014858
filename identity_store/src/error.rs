// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error types for the identity core.

use std::fmt;

use kv_store::StorageError;

/// Error type for identity store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Group with the given ID was not found.
    GroupNotFound(String),
    /// Group with the given name was not found.
    GroupNameNotFound(String),
    /// Requested name is already held by a different group.
    DuplicateName { name: String, holder_id: String },
    /// Adding the member group would make the parent its own ancestor.
    CycleDetected {
        group_id: String,
        member_group_id: String,
    },
    /// A requested member group does not exist.
    MemberGroupNotFound(String),
    /// A requested member entity does not exist.
    MemberEntityNotFound(String),
    /// A metadata pair was not in `key=value` form.
    InvalidMetadata(String),
    /// Underlying storage operation failed.
    Storage(StorageError),
    /// A bucket record failed to serialize.
    Encoding(String),
    /// A durable bucket failed to deserialize. Data-integrity problem,
    /// distinct from absence.
    CorruptBucket { bucket_key: String, detail: String },
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GroupNotFound(id) => write!(f, "group not found: {id}"),
            Self::GroupNameNotFound(name) => write!(f, "group name not found: {name}"),
            Self::DuplicateName { name, holder_id } => {
                write!(f, "group name '{name}' is already in use by group {holder_id}")
            },
            Self::CycleDetected {
                group_id,
                member_group_id,
            } => {
                write!(
                    f,
                    "making group {member_group_id} a member of group {group_id} would create a cycle"
                )
            },
            Self::MemberGroupNotFound(id) => write!(f, "member group not found: {id}"),
            Self::MemberEntityNotFound(id) => write!(f, "member entity not found: {id}"),
            Self::InvalidMetadata(pair) => {
                write!(f, "invalid metadata pair '{pair}': expected key=value")
            },
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Encoding(msg) => write!(f, "bucket encoding failed: {msg}"),
            Self::CorruptBucket { bucket_key, detail } => {
                write!(f, "corrupt bucket {bucket_key}: {detail}")
            },
        }
    }
}

impl std::error::Error for IdentityError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for IdentityError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

/// Result type alias for identity store operations.
pub type Result<T> = std::result::Result<T, IdentityError>;
