/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Per-mailbox cache facades
//!
//! `FolderCache` and `TagCache` expose one mailbox's folders and tags over
//! either a purely local map or the shared-state engine, selected by
//! configuration. `ItemCache` covers the high-churn message population:
//! its shared backend writes flattened field maps through to the store but
//! never binds live accessors, so a cached item is a point-in-time copy.
//! `MailboxCaches` bundles the per-mailbox set, including the per-thread
//! item cache views and the folder/tag snapshot.

use crate::{
    config::{CacheBackendKind, CacheConfig},
    error::{CacheError, Result},
    item::{AccountId, FieldMap, ItemData},
    map_cache::{CacheCodec, CacheStats, FieldCodec, IdentityCodec, MapItemCache, name_key, uuid_key},
    registry::ClearableCache,
    shared_cache::{Keyspace, SharedStateCache},
    shared_state::SharedItem,
    snapshot::{
        FolderTagSnapshot, FolderTagSnapshotCache, LocalFolderTagCache, SharedFolderTagCache,
    },
    thread_cache::ThreadLocalCache,
};
use shared_store::Store;
use std::{num::NonZeroUsize, sync::Arc};
use tracing::debug;

fn local_map<C: CacheCodec>(
    codec: C,
    secondary_key: fn(&SharedItem) -> Option<String>,
    capacity: Option<NonZeroUsize>,
) -> MapItemCache<C> {
    match capacity {
        Some(capacity) => MapItemCache::with_capacity(codec, secondary_key, capacity),
        None => MapItemCache::new(codec, secondary_key),
    }
}

enum EntityBackend {
    Local(MapItemCache<IdentityCodec>),
    Shared(SharedStateCache),
}

/// Folder/tag cache engine behind the two public facades.
struct EntityCache {
    backend: EntityBackend,
}

impl EntityCache {
    fn open(
        account: &AccountId,
        kind: &'static str,
        secondary_key: fn(&SharedItem) -> Option<String>,
        store: Option<&Arc<dyn Store>>,
        capacity: Option<NonZeroUsize>,
    ) -> Self {
        let backend = match store {
            Some(store) => EntityBackend::Shared(SharedStateCache::new(
                store.clone(),
                account.clone(),
                kind,
                secondary_key,
                capacity,
            )),
            None => EntityBackend::Local(local_map(IdentityCodec, secondary_key, capacity)),
        };
        Self { backend }
    }

    fn put(&self, item: &SharedItem) -> Result<()> {
        match &self.backend {
            EntityBackend::Local(cache) => cache.put(item),
            EntityBackend::Shared(cache) => cache.put(item),
        }
    }

    fn get(&self, id: u32) -> Result<Option<SharedItem>> {
        match &self.backend {
            EntityBackend::Local(cache) => Ok(cache.get(id)),
            EntityBackend::Shared(cache) => cache.get(id),
        }
    }

    fn get_by_key(&self, key: &str) -> Result<Option<SharedItem>> {
        match &self.backend {
            EntityBackend::Local(cache) => Ok(cache.get_by_key(key)),
            EntityBackend::Shared(cache) => cache.get_by_key(key),
        }
    }

    fn remove(&self, id: u32) -> Result<Option<SharedItem>> {
        match &self.backend {
            EntityBackend::Local(cache) => Ok(cache.remove(id)),
            EntityBackend::Shared(cache) => cache.remove(id),
        }
    }

    fn values(&self) -> Result<Vec<SharedItem>> {
        match &self.backend {
            EntityBackend::Local(cache) => Ok(cache.values()),
            EntityBackend::Shared(cache) => cache.values(),
        }
    }

    fn clear(&self) {
        match &self.backend {
            EntityBackend::Local(cache) => cache.clear(),
            EntityBackend::Shared(cache) => cache.clear(),
        }
    }

    fn trim(&self, keep: usize) {
        match &self.backend {
            EntityBackend::Local(cache) => cache.trim(keep),
            EntityBackend::Shared(cache) => cache.trim(keep),
        }
    }

    fn len(&self) -> usize {
        match &self.backend {
            EntityBackend::Local(cache) => cache.len(),
            EntityBackend::Shared(cache) => cache.len(),
        }
    }

    fn stats(&self) -> CacheStats {
        match &self.backend {
            EntityBackend::Local(cache) => cache.stats(),
            EntityBackend::Shared(cache) => cache.stats(),
        }
    }
}

/// One mailbox's folder cache, keyed by id and folder UUID.
pub struct FolderCache {
    inner: EntityCache,
}

impl FolderCache {
    pub fn open(
        account: &AccountId,
        store: Option<&Arc<dyn Store>>,
        capacity: Option<NonZeroUsize>,
    ) -> Self {
        Self {
            inner: EntityCache::open(account, "folder", uuid_key, store, capacity),
        }
    }

    pub fn put(&self, folder: &SharedItem) -> Result<()> {
        self.inner.put(folder)
    }

    pub fn get(&self, id: u32) -> Result<Option<SharedItem>> {
        self.inner.get(id)
    }

    pub fn get_by_uuid(&self, uuid: &str) -> Result<Option<SharedItem>> {
        self.inner.get_by_key(uuid)
    }

    pub fn remove(&self, id: u32) -> Result<Option<SharedItem>> {
        self.inner.remove(id)
    }

    pub fn values(&self) -> Result<Vec<SharedItem>> {
        self.inner.values()
    }

    pub fn trim(&self, keep: usize) {
        self.inner.trim(keep)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

impl ClearableCache for FolderCache {
    fn clear_cache(&self) {
        self.inner.clear();
    }
}

/// One mailbox's tag cache, keyed by id and case-insensitive name.
pub struct TagCache {
    inner: EntityCache,
}

impl TagCache {
    pub fn open(
        account: &AccountId,
        store: Option<&Arc<dyn Store>>,
        capacity: Option<NonZeroUsize>,
    ) -> Self {
        Self {
            inner: EntityCache::open(account, "tag", name_key, store, capacity),
        }
    }

    pub fn put(&self, tag: &SharedItem) -> Result<()> {
        self.inner.put(tag)
    }

    pub fn get(&self, id: u32) -> Result<Option<SharedItem>> {
        self.inner.get(id)
    }

    /// Name lookup is case-insensitive.
    pub fn get_by_name(&self, name: &str) -> Result<Option<SharedItem>> {
        self.inner.get_by_key(&name.to_lowercase())
    }

    pub fn remove(&self, id: u32) -> Result<Option<SharedItem>> {
        self.inner.remove(id)
    }

    pub fn values(&self) -> Result<Vec<SharedItem>> {
        self.inner.values()
    }

    pub fn trim(&self, keep: usize) {
        self.inner.trim(keep)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

impl ClearableCache for TagCache {
    fn clear_cache(&self) {
        self.inner.clear();
    }
}

enum ItemBackend {
    Local(MapItemCache<IdentityCodec>),
    /// Serialize-on-write local tier plus write-through to the store. Items
    /// are never bound to live accessors; a read is a point-in-time copy.
    Shared {
        local: MapItemCache<FieldCodec>,
        store: Arc<dyn Store>,
        keyspace: Keyspace,
    },
}

/// One mailbox's message/item cache.
pub struct ItemCache {
    backend: ItemBackend,
}

impl ItemCache {
    pub fn open(
        account: &AccountId,
        store: Option<&Arc<dyn Store>>,
        capacity: Option<NonZeroUsize>,
    ) -> Self {
        let backend = match store {
            Some(store) => ItemBackend::Shared {
                local: local_map(FieldCodec, uuid_key, capacity),
                store: store.clone(),
                keyspace: Keyspace::new(account.clone(), "item"),
            },
            None => ItemBackend::Local(local_map(IdentityCodec, uuid_key, capacity)),
        };
        Self { backend }
    }

    pub fn put(&self, item: &SharedItem) -> Result<()> {
        match &self.backend {
            ItemBackend::Local(cache) => cache.put(item),
            ItemBackend::Shared {
                local,
                store,
                keyspace,
            } => {
                local.put(item)?;
                store.set_fields(&keyspace.entry(item.id()), &item.data().to_fields().to_raw())?;
                Ok(())
            }
        }
    }

    pub fn get(&self, id: u32) -> Result<Option<SharedItem>> {
        match &self.backend {
            ItemBackend::Local(cache) => Ok(cache.get(id)),
            ItemBackend::Shared {
                local,
                store,
                keyspace,
            } => {
                if let Some(item) = local.get(id) {
                    return Ok(Some(item));
                }
                let Some(raw) = store.get_all(&keyspace.entry(id))? else {
                    return Ok(None);
                };
                let item = SharedItem::new(ItemData::from_fields(id, &FieldMap::from_raw(&raw)));
                local.put(&item)?;
                Ok(Some(item))
            }
        }
    }

    pub fn get_by_uuid(&self, uuid: &str) -> Result<Option<SharedItem>> {
        match &self.backend {
            ItemBackend::Local(cache) => Ok(cache.get_by_key(uuid)),
            ItemBackend::Shared { local, .. } => Ok(local.get_by_key(uuid)),
        }
    }

    pub fn remove(&self, id: u32) -> Result<Option<SharedItem>> {
        match &self.backend {
            ItemBackend::Local(cache) => Ok(cache.remove(id)),
            ItemBackend::Shared {
                local,
                store,
                keyspace,
            } => {
                let item = local.remove(id);
                store.delete(&keyspace.entry(id))?;
                Ok(item)
            }
        }
    }

    /// Enumerates the locally cached items only; the shared backend has no
    /// authoritative enumeration.
    pub fn values(&self) -> Result<Vec<SharedItem>> {
        match &self.backend {
            ItemBackend::Local(cache) => Ok(cache.values()),
            ItemBackend::Shared { local, .. } => Ok(local.values()),
        }
    }

    pub fn trim(&self, keep: usize) {
        match &self.backend {
            ItemBackend::Local(cache) => cache.trim(keep),
            ItemBackend::Shared { local, .. } => local.trim(keep),
        }
    }

    pub fn len(&self) -> usize {
        match &self.backend {
            ItemBackend::Local(cache) => cache.len(),
            ItemBackend::Shared { local, .. } => local.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        match &self.backend {
            ItemBackend::Local(cache) => cache.stats(),
            ItemBackend::Shared { local, .. } => local.stats(),
        }
    }
}

impl ClearableCache for ItemCache {
    fn clear_cache(&self) {
        match &self.backend {
            ItemBackend::Local(cache) => cache.clear(),
            ItemBackend::Shared { local, .. } => local.clear(),
        }
    }
}

/// The full cache set of one mailbox.
pub struct MailboxCaches {
    account: AccountId,
    store: Option<Arc<dyn Store>>,
    capacity: Option<NonZeroUsize>,
    folders: Arc<FolderCache>,
    tags: Arc<TagCache>,
    items: Arc<ThreadLocalCache<ItemCache>>,
    snapshot: Arc<dyn FolderTagSnapshotCache>,
}

impl MailboxCaches {
    /// Opens the cache set. The shared backend requires a store; opening it
    /// without one is a configuration error.
    pub fn open(
        account: AccountId,
        config: &CacheConfig,
        store: Option<Arc<dyn Store>>,
    ) -> Result<Self> {
        let store = match (config.backend, store) {
            (CacheBackendKind::Shared, None) => {
                return Err(CacheError::Config(
                    "shared cache backend requires a store".to_string(),
                ));
            }
            (CacheBackendKind::Shared, store) => store,
            (CacheBackendKind::Local, _) => None,
        };

        let snapshot: Arc<dyn FolderTagSnapshotCache> = match &store {
            Some(store) => Arc::new(SharedFolderTagCache::new(
                store.clone(),
                &account,
                config.snapshot.shared_enabled,
                config.snapshot.ttl(),
            )),
            None => Arc::new(LocalFolderTagCache::new()),
        };

        debug!(
            account = account.as_str(),
            shared = store.is_some(),
            "Opening mailbox cache set"
        );
        let capacity = config.capacity();
        Ok(Self {
            folders: Arc::new(FolderCache::open(&account, store.as_ref(), capacity)),
            tags: Arc::new(TagCache::open(&account, store.as_ref(), capacity)),
            items: ThreadLocalCache::new(
                format!("items:{account}"),
                &config.thread_cache.to_policy(),
            ),
            snapshot,
            account,
            store,
            capacity,
        })
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn folders(&self) -> &Arc<FolderCache> {
        &self.folders
    }

    pub fn tags(&self) -> &Arc<TagCache> {
        &self.tags
    }

    /// Returns the calling thread's item cache view, created on first access.
    /// Threads inside and outside a transaction get views from independent
    /// pools.
    pub fn items(&self, in_transaction: bool) -> Arc<ItemCache> {
        self.items.get(in_transaction, || {
            ItemCache::open(&self.account, self.store.as_ref(), self.capacity)
        })
    }

    /// Drops the calling thread's item cache views.
    pub fn flush(&self) {
        self.items.flush_thread();
    }

    pub fn get_tags_and_folders(&self) -> Result<Option<FolderTagSnapshot>> {
        self.snapshot.get_tags_and_folders()
    }

    pub fn cache_tags_and_folders(&self, folders: &[ItemData], tags: &[ItemData]) -> Result<()> {
        self.snapshot.cache_tags_and_folders(folders, tags)
    }

    pub fn clear_snapshot(&self) -> Result<()> {
        self.snapshot.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_state::SharedState;
    use shared_store::MemoryStore;
    use uuid::Uuid;

    fn shared_config() -> CacheConfig {
        CacheConfig {
            backend: CacheBackendKind::Shared,
            ..CacheConfig::default()
        }
    }

    #[test]
    fn test_folder_cache_uuid_lookup() {
        let cache = FolderCache::open(&"acct".to_string(), None, None);
        let uuid = Uuid::new_v4();
        cache
            .put(&SharedItem::new(ItemData::new_folder(5, uuid, "Inbox")))
            .unwrap();

        assert_eq!(cache.get(5).unwrap().unwrap().id(), 5);
        assert_eq!(cache.get_by_uuid(&uuid.to_string()).unwrap().unwrap().id(), 5);

        cache.remove(5).unwrap();
        assert!(cache.get(5).unwrap().is_none());
        assert!(cache.get_by_uuid(&uuid.to_string()).unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_tag_lookup_is_case_insensitive() {
        let cache = TagCache::open(&"acct".to_string(), None, None);
        cache
            .put(&SharedItem::new(ItemData::new_tag(3, "Urgent")))
            .unwrap();

        assert_eq!(cache.get_by_name("URGENT").unwrap().unwrap().id(), 3);
        assert_eq!(cache.get_by_name("urgent").unwrap().unwrap().id(), 3);
    }

    #[test]
    fn test_shared_item_cache_writes_through_without_binding() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let cache = ItemCache::open(&"acct".to_string(), Some(&store), None);

        let item = SharedItem::new(ItemData::new(7, crate::item::ItemType::Message));
        item.set_subject(Some("hello".to_string())).unwrap();
        cache.put(&item).unwrap();

        assert_eq!(
            store.get_field("mbox:acct:item:7", "subject").unwrap(),
            Some("hello".to_string())
        );
        // Items never attach; later mutation stays local to the live object
        assert!(!item.is_attached());
        item.set_subject(Some("changed".to_string())).unwrap();
        assert_eq!(
            store.get_field("mbox:acct:item:7", "subject").unwrap(),
            Some("hello".to_string())
        );
    }

    #[test]
    fn test_shared_item_cache_reads_through_on_miss() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let writer = ItemCache::open(&"acct".to_string(), Some(&store), None);
        let item = SharedItem::new(ItemData::new(7, crate::item::ItemType::Message));
        item.set_subject(Some("hello".to_string())).unwrap();
        writer.put(&item).unwrap();

        let reader = ItemCache::open(&"acct".to_string(), Some(&store), None);
        let seen = reader.get(7).unwrap().unwrap();
        assert_eq!(seen.data().subject, Some("hello".to_string()));

        reader.remove(7).unwrap();
        assert!(reader.get(7).unwrap().is_none());
        // A cold cache confirms the authoritative copy is gone
        let fresh = ItemCache::open(&"acct".to_string(), Some(&store), None);
        assert!(fresh.get(7).unwrap().is_none());
    }

    #[test]
    fn test_open_shared_without_store_is_config_error() {
        let result = MailboxCaches::open("acct".to_string(), &shared_config(), None);
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[test]
    fn test_local_backend_ignores_store() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let caches =
            MailboxCaches::open("acct".to_string(), &CacheConfig::default(), Some(store.clone()))
                .unwrap();
        caches
            .folders()
            .put(&SharedItem::new(ItemData::new_folder(
                1,
                Uuid::new_v4(),
                "Inbox",
            )))
            .unwrap();

        // Local profile never touches the store
        assert!(!store.exists("mbox:acct:folder:1").unwrap());
    }

    #[test]
    fn test_per_thread_item_views() {
        let caches =
            MailboxCaches::open("acct".to_string(), &CacheConfig::default(), None).unwrap();
        let view = caches.items(false);
        view.put(&SharedItem::new(ItemData::new(1, crate::item::ItemType::Message)))
            .unwrap();

        // The same thread sees its own view again
        assert!(Arc::ptr_eq(&view, &caches.items(false)));

        // Transactional and plain views are distinct
        let txn_view = caches.items(true);
        assert!(!Arc::ptr_eq(&view, &txn_view));
        assert!(txn_view.get(1).unwrap().is_none());

        caches.flush();
        assert!(caches.items(false).get(1).unwrap().is_none());
    }

    #[test]
    fn test_max_entries_bounds_the_folder_cache() {
        let config = CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        };
        let caches = MailboxCaches::open("acct".to_string(), &config, None).unwrap();
        for id in 1..=3 {
            caches
                .folders()
                .put(&SharedItem::new(ItemData::new_folder(
                    id,
                    Uuid::new_v4(),
                    format!("Folder {id}"),
                )))
                .unwrap();
        }

        assert_eq!(caches.folders().len(), 2);
        assert!(caches.folders().get(1).unwrap().is_none());
        assert!(caches.folders().get(3).unwrap().is_some());
    }

    #[test]
    fn test_snapshot_delegation() {
        let caches =
            MailboxCaches::open("acct".to_string(), &CacheConfig::default(), None).unwrap();
        assert!(caches.get_tags_and_folders().unwrap().is_none());

        let folders = vec![ItemData::new_folder(2, Uuid::new_v4(), "Inbox")];
        let tags = vec![ItemData::new_tag(64, "todo")];
        caches.cache_tags_and_folders(&folders, &tags).unwrap();

        let snapshot = caches.get_tags_and_folders().unwrap().unwrap();
        assert_eq!(snapshot.folders, folders);
        assert_eq!(snapshot.tags, tags);

        caches.clear_snapshot().unwrap();
        assert!(caches.get_tags_and_folders().unwrap().is_none());
    }
}
