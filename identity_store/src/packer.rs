// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bucketed object packer.
//!
//! Many logical objects share a bounded number of durable records: an
//! object's ID hashes to one of a fixed set of buckets, and each bucket
//! stores the bincode-encoded list of every object placed in it. The
//! bucket count never changes for a live prefix, so placement is stable
//! across restarts.

use std::{fmt, marker::PhantomData, sync::Arc};

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use kv_store::StorageBackend;

use crate::{Entity, Group, IdentityError, Result};

/// An object that can be packed into a storage bucket.
pub trait PackedItem: Clone + Serialize + DeserializeOwned {
    /// Unique ID used for bucket placement and in-bucket lookup.
    fn item_id(&self) -> &str;
}

impl PackedItem for Group {
    fn item_id(&self) -> &str {
        &self.id
    }
}

impl PackedItem for Entity {
    fn item_id(&self) -> &str {
        &self.id
    }
}

/// Packs objects of one kind under one key prefix.
///
/// Read-modify-write of a bucket is serialized by a per-bucket mutex;
/// concurrent writers to different buckets do not contend.
pub struct StoragePacker<T> {
    backend: Arc<dyn StorageBackend>,
    prefix: String,
    bucket_count: u64,
    locks: Vec<Mutex<()>>,
    _marker: PhantomData<T>,
}

impl<T> fmt::Debug for StoragePacker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoragePacker")
            .field("prefix", &self.prefix)
            .field("bucket_count", &self.bucket_count)
            .finish_non_exhaustive()
    }
}

impl<T: PackedItem> StoragePacker<T> {
    /// Create a packer over `backend` with keys under `prefix`.
    ///
    /// `bucket_count` must match the value used when the prefix was first
    /// written; changing it re-shuffles placement and orphans records.
    pub fn new(backend: Arc<dyn StorageBackend>, prefix: impl Into<String>, bucket_count: u64) -> Self {
        let bucket_count = bucket_count.max(1);
        let locks = (0..bucket_count).map(|_| Mutex::new(())).collect();
        Self {
            backend,
            prefix: prefix.into(),
            bucket_count,
            locks,
            _marker: PhantomData,
        }
    }

    fn bucket_index(&self, item_id: &str) -> u64 {
        let hash = blake3::hash(item_id.as_bytes());
        let mut prefix_bytes = [0u8; 8];
        prefix_bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_be_bytes(prefix_bytes) % self.bucket_count
    }

    /// Durable storage key of the bucket holding `item_id`.
    ///
    /// Deterministic: the same ID always maps to the same bucket.
    pub fn bucket_key(&self, item_id: &str) -> String {
        format!("{}{}", self.prefix, self.bucket_index(item_id))
    }

    fn read_bucket(&self, bucket_key: &str) -> Result<Vec<T>> {
        let Some(bytes) = self.backend.get(bucket_key)? else {
            return Ok(Vec::new());
        };
        bincode::deserialize(&bytes).map_err(|e| {
            warn!(bucket_key, error = %e, "bucket failed to deserialize");
            IdentityError::CorruptBucket {
                bucket_key: bucket_key.to_string(),
                detail: e.to_string(),
            }
        })
    }

    fn write_bucket(&self, bucket_key: &str, items: &[T]) -> Result<()> {
        if items.is_empty() {
            self.backend.delete(bucket_key)?;
            return Ok(());
        }
        let bytes = bincode::serialize(items).map_err(|e| IdentityError::Encoding(e.to_string()))?;
        self.backend.put(bucket_key, bytes)?;
        Ok(())
    }

    /// Insert or replace `item` in its bucket as one storage write.
    pub fn put_item(&self, item: &T) -> Result<()> {
        let index = self.bucket_index(item.item_id());
        let bucket_key = format!("{}{index}", self.prefix);
        let _guard = self.locks[index as usize].lock();

        let mut items = self.read_bucket(&bucket_key)?;
        match items.iter_mut().find(|i| i.item_id() == item.item_id()) {
            Some(existing) => *existing = item.clone(),
            None => items.push(item.clone()),
        }
        self.write_bucket(&bucket_key, &items)
    }

    /// Fetch the item with `item_id`, if present.
    pub fn get_item(&self, item_id: &str) -> Result<Option<T>> {
        let index = self.bucket_index(item_id);
        let bucket_key = format!("{}{index}", self.prefix);
        let _guard = self.locks[index as usize].lock();

        let items = self.read_bucket(&bucket_key)?;
        Ok(items.into_iter().find(|i| i.item_id() == item_id))
    }

    /// Remove the item with `item_id`. Absent items are ignored.
    pub fn delete_item(&self, item_id: &str) -> Result<()> {
        let index = self.bucket_index(item_id);
        let bucket_key = format!("{}{index}", self.prefix);
        let _guard = self.locks[index as usize].lock();

        let mut items = self.read_bucket(&bucket_key)?;
        let before = items.len();
        items.retain(|i| i.item_id() != item_id);
        if items.len() == before {
            return Ok(());
        }
        self.write_bucket(&bucket_key, &items)
    }

    /// Enumerate every item in every bucket. Startup rebuild path.
    pub fn all_items(&self) -> Result<Vec<T>> {
        let mut all = Vec::new();
        for index in 0..self.bucket_count {
            let bucket_key = format!("{}{index}", self.prefix);
            let _guard = self.locks[index as usize].lock();
            all.extend(self.read_bucket(&bucket_key)?);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_store::{MemoryBackend, StorageBackend};

    fn packer(bucket_count: u64) -> (Arc<MemoryBackend>, StoragePacker<Entity>) {
        let backend = Arc::new(MemoryBackend::new());
        let packer = StoragePacker::new(backend.clone(), "packer/buckets/entity/", bucket_count);
        (backend, packer)
    }

    fn entity(id: &str) -> Entity {
        Entity {
            id: id.to_string(),
            bucket_key: String::new(),
            creation_time: 0,
        }
    }

    #[test]
    fn bucket_key_is_stable() {
        let (_, a) = packer(256);
        let (_, b) = packer(256);

        assert_eq!(a.bucket_key("testentityid1"), b.bucket_key("testentityid1"));
        assert!(a.bucket_key("testentityid1").starts_with("packer/buckets/entity/"));
    }

    #[test]
    fn put_get_delete_roundtrip() {
        let (_, packer) = packer(8);
        packer.put_item(&entity("e1")).unwrap();

        let fetched = packer.get_item("e1").unwrap().unwrap();
        assert_eq!(fetched.id, "e1");
        assert_eq!(packer.get_item("missing").unwrap(), None);

        packer.delete_item("e1").unwrap();
        assert_eq!(packer.get_item("e1").unwrap(), None);
        // Deleting again is a no-op.
        packer.delete_item("e1").unwrap();
    }

    #[test]
    fn put_replaces_by_id() {
        let (_, packer) = packer(1);
        let mut e = entity("e1");
        packer.put_item(&e).unwrap();
        e.creation_time = 42;
        packer.put_item(&e).unwrap();

        let items = packer.all_items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].creation_time, 42);
    }

    #[test]
    fn many_items_share_one_bucket() {
        let (backend, packer) = packer(1);
        for i in 0..10 {
            packer.put_item(&entity(&format!("e{i}"))).unwrap();
        }

        // One physical record for ten logical objects.
        assert_eq!(backend.len(), 1);
        assert_eq!(packer.all_items().unwrap().len(), 10);
    }

    #[test]
    fn empty_bucket_record_is_deleted() {
        let (backend, packer) = packer(1);
        packer.put_item(&entity("e1")).unwrap();
        assert_eq!(backend.len(), 1);

        packer.delete_item("e1").unwrap();
        assert_eq!(backend.len(), 0);
    }

    #[test]
    fn corrupt_bucket_is_reported() {
        let (backend, packer) = packer(1);
        packer.put_item(&entity("e1")).unwrap();
        let bucket_key = packer.bucket_key("e1");
        backend.put(&bucket_key, vec![0xff, 0x00, 0xff]).unwrap();

        let err = packer.get_item("e1").unwrap_err();
        assert!(matches!(err, IdentityError::CorruptBucket { .. }));
        let err = packer.all_items().unwrap_err();
        assert!(matches!(err, IdentityError::CorruptBucket { .. }));
    }
}
