// SPDX-License-Identifier: MIT OR Apache-2.0
//! Durable key-value storage contract.
//!
//! The identity core persists through this narrow boundary: opaque byte
//! values addressed by string keys, with prefix enumeration for startup
//! scans. The production storage engine lives outside this workspace;
//! [`MemoryBackend`] is the reference implementation used by tests and
//! embedded deployments.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

use std::fmt;

use dashmap::DashMap;

/// Errors from a storage backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend failed to serve the request.
    Backend(String),
    /// The backend is shut down or otherwise unreachable.
    Unavailable,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(msg) => write!(f, "storage backend error: {msg}"),
            Self::Unavailable => write!(f, "storage backend unavailable"),
        }
    }
}

impl std::error::Error for StorageError {}

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Contract every durable backend must satisfy.
///
/// Reads of absent keys return `Ok(None)`, never an error. Deletes of
/// absent keys are no-ops. Implementations must be safe for concurrent
/// use; serialization of read-modify-write sequences is the caller's
/// responsibility.
pub trait StorageBackend: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any existing value.
    fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove `key`. Absent keys are ignored.
    fn delete(&self, key: &str) -> Result<()>;

    /// Enumerate all keys beginning with `prefix`.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory backend over a concurrent hash map.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect())
    }
}
