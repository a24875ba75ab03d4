/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Registry of derived per-mailbox caches
//!
//! Holds weak handles to lazily computed caches so that targeted invalidation
//! is possible without the registry keeping any cache alive. Rows whose cache
//! has been dropped are pruned opportunistically on every `invalidate` call,
//! so code paths that register-but-forget do not leak registry entries
//! forever; `unregister` is the explicit teardown path.

use ahash::AHashMap;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock, Weak};
use tracing::debug;

/// Kind of the identity a derived cache is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Item,
    Mailbox,
}

/// Composite registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CachedObjectKey {
    pub kind: ObjectKind,
    pub id: u64,
}

impl CachedObjectKey {
    pub fn item(id: u64) -> Self {
        Self {
            kind: ObjectKind::Item,
            id,
        }
    }

    pub fn mailbox(id: u64) -> Self {
        Self {
            kind: ObjectKind::Mailbox,
            id,
        }
    }
}

/// A cache the registry can clear without knowing its type.
pub trait ClearableCache: Send + Sync {
    fn clear_cache(&self);
}

/// Weak-reference registry of derived caches.
#[derive(Default)]
pub struct CachedObjectRegistry {
    entries: Mutex<AHashMap<CachedObjectKey, Weak<dyn ClearableCache>>>,
}

impl CachedObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry instance.
    pub fn global() -> &'static Self {
        static REGISTRY: OnceLock<CachedObjectRegistry> = OnceLock::new();
        REGISTRY.get_or_init(CachedObjectRegistry::new)
    }

    /// Registers a weakly-held handle to a derived cache. The registry never
    /// keeps the cache alive.
    pub fn add_object<T: ClearableCache + 'static>(&self, key: CachedObjectKey, cache: &Arc<T>) {
        self.entries
            .lock()
            .insert(key, Arc::downgrade(cache) as Weak<dyn ClearableCache>);
    }

    /// Clears the referenced cache and removes the row. Invalidating an
    /// absent key, or the same key twice, is a no-op.
    pub fn invalidate(&self, key: &CachedObjectKey) {
        self.remove_dead_entries();
        let cache = self.entries.lock().remove(key);
        if let Some(cache) = cache.as_ref().and_then(Weak::upgrade) {
            debug!(?key, "Invalidating derived cache");
            cache.clear_cache();
        }
    }

    /// Explicit teardown of a registration without clearing the cache.
    pub fn unregister(&self, key: &CachedObjectKey) {
        self.entries.lock().remove(key);
    }

    /// Best-effort prune of rows whose cache has been dropped.
    pub fn remove_dead_entries(&self) {
        self.entries
            .lock()
            .retain(|_, cache| cache.strong_count() > 0);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
