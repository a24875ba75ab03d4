/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! In-process store backend
//!
//! Reference implementation of the store traits, backed by plain maps. Used
//! when no distributed store is configured and as the test double for the
//! cache layer.

use crate::{BlobStore, FieldMapStore, RawFields, Result, SetStore};
use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// In-memory store backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    maps: Mutex<AHashMap<String, RawFields>>,
    blobs: Mutex<AHashMap<String, BlobEntry>>,
    sets: Mutex<AHashMap<String, AHashSet<String>>>,
}

#[derive(Debug)]
struct BlobEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FieldMapStore for MemoryStore {
    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.maps.lock().contains_key(key))
    }

    fn get_all(&self, key: &str) -> Result<Option<RawFields>> {
        Ok(self.maps.lock().get(key).cloned())
    }

    fn get_field(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .maps
            .lock()
            .get(key)
            .and_then(|fields| fields.get(field).cloned()))
    }

    fn set_field(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.maps
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn set_fields(&self, key: &str, fields: &RawFields) -> Result<()> {
        let mut maps = self.maps.lock();
        let map = maps.entry(key.to_string()).or_default();
        for (field, value) in fields {
            map.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    fn delete_field(&self, key: &str, field: &str) -> Result<()> {
        if let Some(fields) = self.maps.lock().get_mut(key) {
            fields.remove(field);
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.maps.lock().remove(key);
        Ok(())
    }
}

impl BlobStore for MemoryStore {
    fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut blobs = self.blobs.lock();
        match blobs.get(key) {
            Some(entry) => {
                if entry
                    .expires_at
                    .is_some_and(|expires_at| Instant::now() >= expires_at)
                {
                    blobs.remove(key);
                    Ok(None)
                } else {
                    Ok(Some(entry.value.clone()))
                }
            }
            None => Ok(None),
        }
    }

    fn set_blob(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.blobs.lock().insert(
            key.to_string(),
            BlobEntry {
                value: value.to_vec(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    fn delete_blob(&self, key: &str) -> Result<()> {
        self.blobs.lock().remove(key);
        Ok(())
    }
}

impl SetStore for MemoryStore {
    fn set_add(&self, key: &str, member: &str) -> Result<()> {
        self.sets
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut sets = self.sets.lock();
        if let Some(set) = sets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                sets.remove(key);
            }
        }
        Ok(())
    }

    fn set_members(&self, key: &str) -> Result<AHashSet<String>> {
        Ok(self.sets.lock().get(key).cloned().unwrap_or_default())
    }

    fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .sets
            .lock()
            .get(key)
            .is_some_and(|set| set.contains(member)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_map_operations() {
        let store = MemoryStore::new();

        assert!(!store.exists("mbox:a:folder:1").unwrap());
        assert_eq!(store.get_all("mbox:a:folder:1").unwrap(), None);

        store.set_field("mbox:a:folder:1", "name", "Inbox").unwrap();
        store.set_field("mbox:a:folder:1", "flags", "4").unwrap();

        assert!(store.exists("mbox:a:folder:1").unwrap());
        assert_eq!(
            store.get_field("mbox:a:folder:1", "name").unwrap(),
            Some("Inbox".to_string())
        );

        let all = store.get_all("mbox:a:folder:1").unwrap().unwrap();
        assert_eq!(all.len(), 2);

        store.delete_field("mbox:a:folder:1", "flags").unwrap();
        assert_eq!(store.get_field("mbox:a:folder:1", "flags").unwrap(), None);

        store.delete("mbox:a:folder:1").unwrap();
        assert!(!store.exists("mbox:a:folder:1").unwrap());
    }

    #[test]
    fn test_blob_expiry() {
        let store = MemoryStore::new();

        store.set_blob("k", b"data", None).unwrap();
        assert_eq!(store.get_blob("k").unwrap(), Some(b"data".to_vec()));

        store
            .set_blob("k", b"data", Some(Duration::from_secs(0)))
            .unwrap();
        assert_eq!(store.get_blob("k").unwrap(), None);
        // Expired entry is dropped on read
        assert_eq!(store.get_blob("k").unwrap(), None);
    }

    #[test]
    fn test_set_operations() {
        let store = MemoryStore::new();

        store.set_add("ids", "1").unwrap();
        store.set_add("ids", "2").unwrap();
        store.set_add("ids", "2").unwrap();

        assert_eq!(store.set_members("ids").unwrap().len(), 2);
        assert!(store.set_contains("ids", "1").unwrap());

        store.set_remove("ids", "1").unwrap();
        assert!(!store.set_contains("ids", "1").unwrap());

        store.set_remove("ids", "2").unwrap();
        assert!(store.set_members("ids").unwrap().is_empty());
    }
}
