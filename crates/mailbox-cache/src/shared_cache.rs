/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Shared-state cache engine
//!
//! Cache of entities that must stay coherent across concurrently running
//! mailbox-serving processes. The local map is the fast path; on miss the
//! entity is lazily reconstructed from its field map in the distributed store
//! and bound to a live accessor so that subsequent mutations write through.
//! Cross-process consistency is read-repair against the store's authoritative
//! live-id index, not locking: concurrent writers to the same field map are
//! last-writer-wins.

use crate::{
    error::Result,
    item::{AccountId, FieldMap, ItemData},
    map_cache::{CacheStats, IdentityCodec, MapItemCache},
    shared_state::{SharedItem, SharedState, StoreAccessor},
};
use ahash::AHashSet;
use shared_store::Store;
use std::{num::NonZeroUsize, sync::Arc};
use tracing::{debug, warn};

/// Key layout of one mailbox's entities of one kind in the distributed store.
pub struct Keyspace {
    account: AccountId,
    kind: &'static str,
}

impl Keyspace {
    pub fn new(account: AccountId, kind: &'static str) -> Self {
        Self { account, kind }
    }

    /// Field-map key of one entity: `mbox:{account}:{kind}:{id}`.
    pub fn entry(&self, id: u32) -> String {
        format!("mbox:{}:{}:{}", self.account, self.kind, id)
    }

    /// Live-id set key: `mbox:{account}:{kind}s`.
    pub fn index(&self) -> String {
        format!("mbox:{}:{}s", self.account, self.kind)
    }
}

/// Local fast path plus lazy reconstruction and write-through binding against
/// the distributed field-map store.
pub struct SharedStateCache {
    store: Arc<dyn Store>,
    keyspace: Keyspace,
    local: MapItemCache<IdentityCodec>,
}

impl SharedStateCache {
    pub fn new(
        store: Arc<dyn Store>,
        account: AccountId,
        kind: &'static str,
        secondary_key: fn(&SharedItem) -> Option<String>,
        capacity: Option<NonZeroUsize>,
    ) -> Self {
        let local = match capacity {
            Some(capacity) => MapItemCache::with_capacity(IdentityCodec, secondary_key, capacity),
            None => MapItemCache::new(IdentityCodec, secondary_key),
        };
        Self {
            store,
            keyspace: Keyspace::new(account, kind),
            local,
        }
    }

    /// Local map first; on miss, reconstructs from the backing field map and
    /// attaches, or reports not-found if no backing map exists.
    pub fn get(&self, id: u32) -> Result<Option<SharedItem>> {
        if let Some(item) = self.local.get(id) {
            return Ok(Some(item));
        }
        let key = self.keyspace.entry(id);
        let Some(raw) = self.store.get_all(&key)? else {
            return Ok(None);
        };
        let item = SharedItem::new(ItemData::from_fields(id, &FieldMap::from_raw(&raw)));
        // The backing map is already populated; bind without re-pushing state
        item.bind_existing(Arc::new(StoreAccessor::new(self.store.clone(), key)));
        self.local.put(&item)?;
        debug!(
            account = self.keyspace.account.as_str(),
            kind = self.keyspace.kind,
            id = id,
            "Materialized shared entity from store"
        );
        Ok(Some(item))
    }

    /// Secondary-key lookup. On local miss the local map is reconciled with
    /// the store first, since there is no per-key remote query to fall back
    /// on.
    pub fn get_by_key(&self, key: &str) -> Result<Option<SharedItem>> {
        if let Some(item) = self.local.get_by_key(key) {
            return Ok(Some(item));
        }
        self.reconcile()?;
        Ok(self.local.get_by_key(key))
    }

    /// Inserts into the local map; the first writer establishes the backing
    /// field map and attaches.
    pub fn put(&self, item: &SharedItem) -> Result<()> {
        self.local.put(item)?;
        if !item.is_attached() {
            let accessor = StoreAccessor::new(self.store.clone(), self.keyspace.entry(item.id()));
            item.attach(Arc::new(accessor))?;
            self.store
                .set_add(&self.keyspace.index(), &item.id().to_string())?;
        }
        Ok(())
    }

    /// Evicts locally, detaches any bound accessor (further mutation through
    /// a stale reference is a no-op), and removes the entity from the
    /// authoritative store.
    pub fn remove(&self, id: u32) -> Result<Option<SharedItem>> {
        let item = self.local.remove(id);
        if let Some(item) = &item {
            item.detach();
        }
        self.store
            .set_remove(&self.keyspace.index(), &id.to_string())?;
        self.store.delete(&self.keyspace.entry(id))?;
        Ok(item)
    }

    /// Reconciles the local map against the authoritative live-id index, then
    /// returns the local values.
    pub fn values(&self) -> Result<Vec<SharedItem>> {
        self.reconcile()?;
        Ok(self.local.values())
    }

    /// Clears the local materialized view only; the authoritative store is
    /// untouched.
    pub fn clear(&self) {
        self.local.clear();
    }

    /// Trims the local materialized view to the `keep` most recently used
    /// entries.
    pub fn trim(&self, keep: usize) {
        self.local.trim(keep);
    }

    pub fn len(&self) -> usize {
        self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.local.stats()
    }

    /// Read-repair: purges locally cached ids no longer present in the
    /// authoritative index and materializes ids present there but not yet
    /// local.
    fn reconcile(&self) -> Result<()> {
        let members = self.store.set_members(&self.keyspace.index())?;
        let mut live = AHashSet::with_capacity(members.len());
        for member in &members {
            match member.parse::<u32>() {
                Ok(id) => {
                    live.insert(id);
                }
                Err(_) => warn!(
                    member = member.as_str(),
                    key = self.keyspace.index().as_str(),
                    "Ignoring unparsable id in live-id index"
                ),
            }
        }
        for id in self.local.ids() {
            if !live.contains(&id) {
                if let Some(item) = self.local.remove(id) {
                    item.detach();
                    debug!(
                        account = self.keyspace.account.as_str(),
                        kind = self.keyspace.kind,
                        id = id,
                        "Purged entity absent from authoritative index"
                    );
                }
            }
        }
        for id in live {
            if !self.local.contains(id) {
                // A map missing for a listed id is simply not materialized
                self.get(id)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{item::ItemData, map_cache::uuid_key};
    use shared_store::MemoryStore;
    use uuid::Uuid;

    fn cache_pair() -> (Arc<dyn Store>, SharedStateCache, SharedStateCache) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let a = SharedStateCache::new(store.clone(), "acct".to_string(), "folder", uuid_key, None);
        let b = SharedStateCache::new(store.clone(), "acct".to_string(), "folder", uuid_key, None);
        (store, a, b)
    }

    #[test]
    fn test_put_establishes_backing_map_and_attaches() {
        let (store, cache, _) = cache_pair();
        let item = SharedItem::new(ItemData::new_folder(5, Uuid::new_v4(), "Inbox"));
        cache.put(&item).unwrap();

        assert!(item.is_attached());
        assert!(store.exists("mbox:acct:folder:5").unwrap());
        assert!(store.set_contains("mbox:acct:folders", "5").unwrap());

        // Mutations now write through
        item.set_unread_count(2).unwrap();
        assert_eq!(
            store
                .get_field("mbox:acct:folder:5", "unreadCount")
                .unwrap(),
            Some("2".to_string())
        );
    }

    #[test]
    fn test_get_materializes_and_attaches_from_remote_writer() {
        let (store, writer, reader) = cache_pair();
        let uuid = Uuid::new_v4();
        writer
            .put(&SharedItem::new(ItemData::new_folder(5, uuid, "Inbox")))
            .unwrap();

        // A different process sees the entity without having put it
        let seen = reader.get(5).unwrap().unwrap();
        assert_eq!(seen.name(), Some("Inbox".to_string()));
        assert_eq!(seen.uuid(), Some(uuid));
        assert!(seen.is_attached());

        // ...and its mutations are visible through the store
        seen.set_name(Some("Mail".to_string())).unwrap();
        assert_eq!(
            store.get_field("mbox:acct:folder:5", "name").unwrap(),
            Some("Mail".to_string())
        );
    }

    #[test]
    fn test_get_miss_when_no_backing_map() {
        let (_, cache, _) = cache_pair();
        assert!(cache.get(99).unwrap().is_none());
    }

    #[test]
    fn test_secondary_key_lookup_reconciles_on_miss() {
        let (_, writer, reader) = cache_pair();
        let uuid = Uuid::new_v4();
        writer
            .put(&SharedItem::new(ItemData::new_folder(5, uuid, "Inbox")))
            .unwrap();

        let seen = reader.get_by_key(&uuid.to_string()).unwrap().unwrap();
        assert_eq!(seen.id(), 5);
    }

    #[test]
    fn test_remove_detaches_and_deletes() {
        let (store, cache, _) = cache_pair();
        let item = SharedItem::new(ItemData::new_folder(5, Uuid::new_v4(), "Inbox"));
        cache.put(&item).unwrap();
        cache.remove(5).unwrap();

        assert!(!item.is_attached());
        assert!(!store.exists("mbox:acct:folder:5").unwrap());
        assert!(!store.set_contains("mbox:acct:folders", "5").unwrap());
        assert!(cache.get(5).unwrap().is_none());

        // Mutating the stale reference neither fails nor resurrects state
        item.set_name(Some("zombie".to_string())).unwrap();
        assert!(!store.exists("mbox:acct:folder:5").unwrap());
    }

    #[test]
    fn test_values_purges_ids_removed_by_other_process() {
        let (_, a, b) = cache_pair();
        a.put(&SharedItem::new(ItemData::new_folder(1, Uuid::new_v4(), "One")))
            .unwrap();
        a.put(&SharedItem::new(ItemData::new_folder(2, Uuid::new_v4(), "Two")))
            .unwrap();

        // Warm the other process's local cache, then delete id 1 through it
        assert!(b.get(1).unwrap().is_some());
        assert!(b.get(2).unwrap().is_some());
        b.remove(1).unwrap();

        let values = a.values().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].id(), 2);
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn test_values_materializes_remote_only_ids() {
        let (_, writer, reader) = cache_pair();
        writer
            .put(&SharedItem::new(ItemData::new_folder(1, Uuid::new_v4(), "One")))
            .unwrap();
        writer
            .put(&SharedItem::new(ItemData::new_folder(2, Uuid::new_v4(), "Two")))
            .unwrap();

        let mut ids: Vec<u32> = reader.values().unwrap().iter().map(|i| i.id()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_clear_is_local_only() {
        let (_, cache, _) = cache_pair();
        cache
            .put(&SharedItem::new(ItemData::new_folder(1, Uuid::new_v4(), "One")))
            .unwrap();
        cache.clear();
        assert!(cache.is_empty());

        // The authoritative copy survives and is re-materialized on read
        assert!(cache.get(1).unwrap().is_some());
    }
}
