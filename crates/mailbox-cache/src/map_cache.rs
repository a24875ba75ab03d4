/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Generic id / secondary-key map cache engine
//!
//! Maintains an id -> value map in recency order plus a secondary-key -> id
//! map. The codec hooks let the same put/get/remove/values logic serve either
//! a pure in-memory cache (identity codec) or a serialize-on-write cache
//! (field codec). A capacity-bounded cache evicts its least recently used
//! entries under insert pressure; `trim(n)` shrinks on demand either way.
//! Lookups return not-found on miss without throwing; enumeration silently
//! drops entries that fail to reconstruct rather than aborting.

use crate::{
    error::{CacheError, Result},
    item::ItemData,
    shared_state::SharedItem,
};
use ahash::AHashMap;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::atomic::{AtomicU64, Ordering},
};
use tracing::warn;

/// Conversion between a live item and its cached representation.
pub trait CacheCodec: Send + Sync {
    type Stored: Send;

    fn to_cache_value(&self, item: &SharedItem) -> Result<Self::Stored>;

    fn from_cache_value(&self, stored: &Self::Stored) -> Result<SharedItem>;
}

/// Identity hooks: the cache holds the live object itself.
pub struct IdentityCodec;

impl CacheCodec for IdentityCodec {
    type Stored = SharedItem;

    fn to_cache_value(&self, item: &SharedItem) -> Result<SharedItem> {
        Ok(item.clone())
    }

    fn from_cache_value(&self, stored: &SharedItem) -> Result<SharedItem> {
        Ok(stored.clone())
    }
}

/// Serialize-on-write hooks: the cache holds the flattened fields, isolating
/// cached state from later mutation of the live object.
pub struct FieldCodec;

#[derive(Serialize, Deserialize)]
struct StoredFields {
    id: u32,
    fields: HashMap<String, String>,
}

impl CacheCodec for FieldCodec {
    type Stored = String;

    fn to_cache_value(&self, item: &SharedItem) -> Result<String> {
        let stored = StoredFields {
            id: item.id(),
            fields: item.data().to_fields().to_raw().into_iter().collect(),
        };
        serde_json::to_string(&stored).map_err(|err| CacheError::Decode(err.to_string()))
    }

    fn from_cache_value(&self, stored: &String) -> Result<SharedItem> {
        let stored: StoredFields =
            serde_json::from_str(stored).map_err(|err| CacheError::Decode(err.to_string()))?;
        let fields = crate::item::FieldMap::from_raw(&stored.fields.into_iter().collect());
        Ok(SharedItem::new(ItemData::from_fields(stored.id, &fields)))
    }
}

/// Hit/miss/eviction counters, exposed as a point-in-time snapshot.
#[derive(Debug, Default)]
struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Entry<S> {
    secondary_key: Option<String>,
    stored: S,
}

struct MapInner<S> {
    by_id: LruCache<u32, Entry<S>>,
    by_key: AHashMap<String, u32>,
}

/// Generic map cache over a codec and a secondary-key extractor.
pub struct MapItemCache<C: CacheCodec> {
    codec: C,
    secondary_key: fn(&SharedItem) -> Option<String>,
    capacity: Option<NonZeroUsize>,
    inner: Mutex<MapInner<C::Stored>>,
    metrics: CacheMetrics,
}

impl<C: CacheCodec> MapItemCache<C> {
    /// Unbounded cache; entries leave only via `remove`, `clear` or `trim`.
    pub fn new(codec: C, secondary_key: fn(&SharedItem) -> Option<String>) -> Self {
        Self::build(codec, secondary_key, None)
    }

    /// Bounded cache; inserting beyond `capacity` evicts the least recently
    /// used entries.
    pub fn with_capacity(
        codec: C,
        secondary_key: fn(&SharedItem) -> Option<String>,
        capacity: NonZeroUsize,
    ) -> Self {
        Self::build(codec, secondary_key, Some(capacity))
    }

    fn build(
        codec: C,
        secondary_key: fn(&SharedItem) -> Option<String>,
        capacity: Option<NonZeroUsize>,
    ) -> Self {
        Self {
            codec,
            secondary_key,
            capacity,
            inner: Mutex::new(MapInner {
                by_id: LruCache::unbounded(),
                by_key: AHashMap::new(),
            }),
            metrics: CacheMetrics::default(),
        }
    }

    /// Inserts or replaces the entry for the item's id, keeping the
    /// secondary-key map consistent with it. At capacity, inserting a new id
    /// first evicts the least recently used entry.
    pub fn put(&self, item: &SharedItem) -> Result<()> {
        let stored = self.codec.to_cache_value(item)?;
        let secondary_key = (self.secondary_key)(item);
        let id = item.id();

        let mut inner = self.inner.lock();
        if let Some(capacity) = self.capacity {
            if !inner.by_id.contains(&id) {
                while inner.by_id.len() >= capacity.get() {
                    match inner.by_id.pop_lru() {
                        Some((_, entry)) => {
                            if let Some(key) = entry.secondary_key {
                                inner.by_key.remove(&key);
                            }
                            self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
                        }
                        None => break,
                    }
                }
            }
        }
        if let Some(old) = inner.by_id.put(
            id,
            Entry {
                secondary_key: secondary_key.clone(),
                stored,
            },
        ) {
            if let Some(old_key) = old.secondary_key {
                if Some(&old_key) != secondary_key.as_ref()
                    && inner.by_key.get(&old_key) == Some(&id)
                {
                    inner.by_key.remove(&old_key);
                }
            }
        }
        if let Some(key) = secondary_key {
            inner.by_key.insert(key, id);
        }
        Ok(())
    }

    pub fn get(&self, id: u32) -> Option<SharedItem> {
        let mut inner = self.inner.lock();
        let item = self.lookup(&mut inner, id);
        self.count(item.is_some());
        item
    }

    pub fn get_by_key(&self, key: &str) -> Option<SharedItem> {
        let mut inner = self.inner.lock();
        let item = match inner.by_key.get(key).copied() {
            Some(id) => {
                let item = self.lookup(&mut inner, id);
                if item.is_none() {
                    inner.by_key.remove(key);
                }
                item
            }
            None => None,
        };
        self.count(item.is_some());
        item
    }

    /// Removes the entry from both maps as one logical step.
    pub fn remove(&self, id: u32) -> Option<SharedItem> {
        let mut inner = self.inner.lock();
        let entry = inner.by_id.pop(&id)?;
        if let Some(key) = &entry.secondary_key {
            if inner.by_key.get(key) == Some(&id) {
                inner.by_key.remove(key);
            }
        }
        self.codec.from_cache_value(&entry.stored).ok()
    }

    /// Enumerates all entries, dropping and purging any that fail to
    /// reconstruct.
    pub fn values(&self) -> Vec<SharedItem> {
        let mut inner = self.inner.lock();
        let mut items = Vec::with_capacity(inner.by_id.len());
        let mut corrupt = Vec::new();
        for (id, entry) in inner.by_id.iter() {
            match self.codec.from_cache_value(&entry.stored) {
                Ok(item) => items.push(item),
                Err(err) => {
                    warn!(id = *id, error = %err, "Dropping cache entry that failed to reconstruct");
                    corrupt.push(*id);
                }
            }
        }
        for id in corrupt {
            if let Some(entry) = inner.by_id.pop(&id) {
                if let Some(key) = entry.secondary_key {
                    inner.by_key.remove(&key);
                }
            }
        }
        items
    }

    pub fn ids(&self) -> Vec<u32> {
        self.inner.lock().by_id.iter().map(|(id, _)| *id).collect()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.inner.lock().by_id.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.by_id.clear();
        inner.by_key.clear();
    }

    /// Evicts everything beyond the `keep` most recently used entries.
    pub fn trim(&self, keep: usize) {
        let mut inner = self.inner.lock();
        while inner.by_id.len() > keep {
            if let Some((_, entry)) = inner.by_id.pop_lru() {
                if let Some(key) = entry.secondary_key {
                    inner.by_key.remove(&key);
                }
                self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            evictions: self.metrics.evictions.load(Ordering::Relaxed),
        }
    }

    fn lookup(&self, inner: &mut MapInner<C::Stored>, id: u32) -> Option<SharedItem> {
        let entry = inner.by_id.get(&id)?;
        match self.codec.from_cache_value(&entry.stored) {
            Ok(item) => Some(item),
            Err(err) => {
                warn!(id = id, error = %err, "Purging cache entry that failed to reconstruct");
                if let Some(entry) = inner.by_id.pop(&id) {
                    if let Some(key) = entry.secondary_key {
                        inner.by_key.remove(&key);
                    }
                }
                None
            }
        }
    }

    fn count(&self, hit: bool) {
        if hit {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Secondary key of folders and generic items: the stable UUID.
pub fn uuid_key(item: &SharedItem) -> Option<String> {
    item.uuid().map(|uuid| uuid.to_string())
}

/// Secondary key of tags: the case-insensitive name.
pub fn name_key(item: &SharedItem) -> Option<String> {
    item.name().map(|name| name.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemType;
    use uuid::Uuid;

    fn folder(id: u32, uuid: Uuid, name: &str) -> SharedItem {
        SharedItem::new(ItemData::new_folder(id, uuid, name))
    }

    #[test]
    fn test_put_get_and_secondary_key() {
        let cache = MapItemCache::new(IdentityCodec, uuid_key);
        let uuid = Uuid::new_v4();
        cache.put(&folder(5, uuid, "Inbox")).unwrap();

        assert_eq!(cache.get(5).unwrap().id(), 5);
        assert_eq!(cache.get_by_key(&uuid.to_string()).unwrap().id(), 5);
        assert!(cache.get(6).is_none());
        assert!(cache.get_by_key("missing").is_none());
    }

    #[test]
    fn test_replacing_put_does_not_duplicate() {
        let cache = MapItemCache::new(IdentityCodec, name_key);
        cache
            .put(&SharedItem::new(ItemData::new_tag(3, "Todo")))
            .unwrap();
        cache
            .put(&SharedItem::new(ItemData::new_tag(3, "Done")))
            .unwrap();

        assert_eq!(cache.len(), 1);
        // The stale secondary key was dropped with the old entry
        assert!(cache.get_by_key("todo").is_none());
        assert_eq!(cache.get_by_key("done").unwrap().id(), 3);
    }

    #[test]
    fn test_remove_clears_both_maps() {
        let cache = MapItemCache::new(IdentityCodec, uuid_key);
        let uuid = Uuid::new_v4();
        cache.put(&folder(5, uuid, "Inbox")).unwrap();

        assert!(cache.remove(5).is_some());
        assert!(cache.get(5).is_none());
        assert!(cache.get_by_key(&uuid.to_string()).is_none());
        assert!(cache.is_empty());
        assert!(cache.remove(5).is_none());
    }

    #[test]
    fn test_trim_keeps_most_recently_used() {
        let cache = MapItemCache::new(IdentityCodec, uuid_key);
        for id in 1..=4 {
            cache.put(&folder(id, Uuid::new_v4(), "f")).unwrap();
        }
        // Touch 1 so 2 becomes the eviction candidate
        cache.get(1);
        cache.trim(3);

        assert_eq!(cache.len(), 3);
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_insert_pressure_evicts_least_recently_used() {
        let cache = MapItemCache::with_capacity(
            IdentityCodec,
            uuid_key,
            NonZeroUsize::new(2).unwrap(),
        );
        let evicted_uuid = Uuid::new_v4();
        cache.put(&folder(1, Uuid::new_v4(), "one")).unwrap();
        cache.put(&folder(2, evicted_uuid, "two")).unwrap();
        // Touch 1 so 2 is the eviction candidate
        cache.get(1);

        cache.put(&folder(3, Uuid::new_v4(), "three")).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
        // The evicted entry's secondary key was dropped with it
        assert!(cache.get_by_key(&evicted_uuid.to_string()).is_none());
        assert_eq!(cache.stats().evictions, 1);

        // Replacing a resident id does not evict
        cache.put(&folder(3, Uuid::new_v4(), "renamed")).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_field_codec_round_trip() {
        let cache = MapItemCache::new(FieldCodec, uuid_key);
        let uuid = Uuid::new_v4();
        let item = folder(7, uuid, "Archive");
        cache.put(&item).unwrap();

        let cached = cache.get(7).unwrap();
        assert_eq!(cached.data(), item.data());

        // Serialize-on-write isolates the cached copy from later mutation
        item.set_name(Some("Renamed".to_string())).unwrap();
        assert_eq!(cache.get(7).unwrap().name(), Some("Archive".to_string()));
    }

    #[test]
    fn test_values_drops_corrupt_entries() {
        let cache = MapItemCache::new(FieldCodec, uuid_key);
        cache.put(&folder(1, Uuid::new_v4(), "ok")).unwrap();
        // Inject a corrupt stored value directly
        cache.inner.lock().by_id.put(
            2,
            Entry {
                secondary_key: None,
                stored: "not json".to_string(),
            },
        );

        let values = cache.values();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].id(), 1);
        // The corrupt entry was purged, not just skipped
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_stats_count_hits_and_misses() {
        let cache = MapItemCache::new(IdentityCodec, uuid_key);
        cache
            .put(&SharedItem::new(ItemData::new(1, ItemType::Message)))
            .unwrap();
        cache.get(1);
        cache.get(2);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
