/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Cross-account watch cache
//!
//! Caches which `(account, item)` pairs a given account is watching. When the
//! watching account's mailbox is hosted on this process, watch state is
//! persisted through the local store; when it is hosted elsewhere, mutations
//! are forwarded as asynchronous inter-process notifications and the initial
//! state is loaded with a synchronous cross-process request. A bounded LRU of
//! per-account watch sets caps memory growth across many accounts.

use crate::{
    config::WatchConfig,
    error::{CacheError, Result},
    item::AccountId,
};
use ahash::AHashSet;
use lru::LruCache;
use parking_lot::Mutex;
use shared_store::Store;
use std::{num::NonZeroUsize, sync::Arc};
use tracing::{debug, warn};

/// One watched item: the account that owns it and the item's id there.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchKey {
    pub account: AccountId,
    pub item_id: u32,
}

impl WatchKey {
    pub fn new(account: impl Into<AccountId>, item_id: u32) -> Self {
        Self {
            account: account.into(),
            item_id,
        }
    }

    fn encode(&self) -> String {
        // Account ids are UUID strings and never contain '/'
        format!("{}/{}", self.account, self.item_id)
    }

    fn decode(member: &str) -> Option<Self> {
        let (account, item_id) = member.rsplit_once('/')?;
        Some(Self {
            account: account.to_string(),
            item_id: item_id.parse().ok()?,
        })
    }
}

/// Watch state of one watching account.
pub trait WatchCache: Send + Sync {
    fn watch(&self, key: WatchKey) -> Result<()>;

    fn unwatch(&self, key: &WatchKey) -> Result<()>;

    fn is_watching(&self, key: &WatchKey) -> Result<bool>;

    fn watches(&self) -> Result<AHashSet<WatchKey>>;
}

/// Locates the process hosting an account's mailbox.
pub trait MailboxRouter: Send + Sync {
    fn is_local(&self, account: &AccountId) -> bool;
}

/// Inter-process messaging boundary for the remote watch path.
pub trait ClusterNotifier: Send + Sync {
    /// Fire-and-forget watch/unwatch notification to the hosting process.
    fn send_watch(&self, target: &AccountId, key: &WatchKey, added: bool) -> Result<()>;

    /// Synchronous request for the hosting process's current watch state.
    fn fetch_watches(&self, target: &AccountId) -> Result<Vec<WatchKey>>;
}

/// Watch cache of an account hosted on this process, persisted through the
/// local store.
pub struct LocalWatchCache {
    account: AccountId,
    store: Arc<dyn Store>,
    cached: Mutex<Option<AHashSet<WatchKey>>>,
}

impl LocalWatchCache {
    pub fn new(account: AccountId, store: Arc<dyn Store>) -> Self {
        Self {
            account,
            store,
            cached: Mutex::new(None),
        }
    }

    fn store_key(&self) -> String {
        format!("watch:{}", self.account)
    }

    fn load<'a>(
        &self,
        cached: &'a mut Option<AHashSet<WatchKey>>,
    ) -> Result<&'a mut AHashSet<WatchKey>> {
        match cached {
            Some(set) => Ok(set),
            None => {
                let members = self.store.set_members(&self.store_key())?;
                let mut set = AHashSet::with_capacity(members.len());
                for member in members {
                    match WatchKey::decode(&member) {
                        Some(key) => {
                            set.insert(key);
                        }
                        None => warn!(
                            account = self.account.as_str(),
                            member = member.as_str(),
                            "Ignoring unparsable watch entry"
                        ),
                    }
                }
                Ok(cached.insert(set))
            }
        }
    }
}

impl WatchCache for LocalWatchCache {
    fn watch(&self, key: WatchKey) -> Result<()> {
        let mut cached = self.cached.lock();
        if self.load(&mut cached)?.insert(key.clone()) {
            self.store.set_add(&self.store_key(), &key.encode())?;
        }
        Ok(())
    }

    fn unwatch(&self, key: &WatchKey) -> Result<()> {
        let mut cached = self.cached.lock();
        if self.load(&mut cached)?.remove(key) {
            self.store.set_remove(&self.store_key(), &key.encode())?;
        }
        Ok(())
    }

    fn is_watching(&self, key: &WatchKey) -> Result<bool> {
        let mut cached = self.cached.lock();
        Ok(self.load(&mut cached)?.contains(key))
    }

    fn watches(&self) -> Result<AHashSet<WatchKey>> {
        let mut cached = self.cached.lock();
        Ok(self.load(&mut cached)?.clone())
    }
}

/// Watch cache of an account hosted on another process.
pub struct RemoteWatchCache {
    account: AccountId,
    notifier: Arc<dyn ClusterNotifier>,
    cached: Mutex<AHashSet<WatchKey>>,
}

impl RemoteWatchCache {
    /// Loads the initial state from the hosting process.
    pub fn open(account: AccountId, notifier: Arc<dyn ClusterNotifier>) -> Result<Self> {
        let initial = notifier.fetch_watches(&account)?;
        debug!(
            account = account.as_str(),
            watches = initial.len(),
            "Loaded remote watch state"
        );
        Ok(Self {
            account,
            notifier,
            cached: Mutex::new(initial.into_iter().collect()),
        })
    }
}

impl WatchCache for RemoteWatchCache {
    fn watch(&self, key: WatchKey) -> Result<()> {
        if self.cached.lock().insert(key.clone()) {
            self.notifier.send_watch(&self.account, &key, true)?;
        }
        Ok(())
    }

    fn unwatch(&self, key: &WatchKey) -> Result<()> {
        if self.cached.lock().remove(key) {
            self.notifier.send_watch(&self.account, key, false)?;
        }
        Ok(())
    }

    fn is_watching(&self, key: &WatchKey) -> Result<bool> {
        Ok(self.cached.lock().contains(key))
    }

    fn watches(&self) -> Result<AHashSet<WatchKey>> {
        Ok(self.cached.lock().clone())
    }
}

/// Process-level cache of per-account watch caches, bounded by LRU.
pub struct WatchCacheManager {
    router: Arc<dyn MailboxRouter>,
    notifier: Arc<dyn ClusterNotifier>,
    store: Arc<dyn Store>,
    caches: Mutex<LruCache<AccountId, Arc<dyn WatchCache>>>,
}

impl WatchCacheManager {
    pub fn new(
        router: Arc<dyn MailboxRouter>,
        notifier: Arc<dyn ClusterNotifier>,
        store: Arc<dyn Store>,
        max_accounts: usize,
    ) -> Result<Self> {
        let capacity = NonZeroUsize::new(max_accounts)
            .ok_or_else(|| CacheError::Config("watch cache capacity must be non-zero".into()))?;
        Ok(Self {
            router,
            notifier,
            store,
            caches: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Opens the manager with the configured per-account bound.
    pub fn from_config(
        router: Arc<dyn MailboxRouter>,
        notifier: Arc<dyn ClusterNotifier>,
        store: Arc<dyn Store>,
        config: &WatchConfig,
    ) -> Result<Self> {
        Self::new(router, notifier, store, config.max_accounts)
    }

    /// Returns the watch cache of `account`, resolving to the local or
    /// remote implementation depending on where the account is hosted.
    pub fn get(&self, account: &AccountId) -> Result<Arc<dyn WatchCache>> {
        let mut caches = self.caches.lock();
        if let Some(cache) = caches.get(account) {
            return Ok(cache.clone());
        }
        let cache: Arc<dyn WatchCache> = if self.router.is_local(account) {
            Arc::new(LocalWatchCache::new(account.clone(), self.store.clone()))
        } else {
            Arc::new(RemoteWatchCache::open(
                account.clone(),
                self.notifier.clone(),
            )?)
        };
        caches.put(account.clone(), cache.clone());
        Ok(cache)
    }

    pub fn cached_accounts(&self) -> usize {
        self.caches.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_store::MemoryStore;

    struct LocalOnlyRouter;

    impl MailboxRouter for LocalOnlyRouter {
        fn is_local(&self, _account: &AccountId) -> bool {
            true
        }
    }

    struct RemoteOnlyRouter;

    impl MailboxRouter for RemoteOnlyRouter {
        fn is_local(&self, _account: &AccountId) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(AccountId, WatchKey, bool)>>,
        initial: Mutex<Vec<WatchKey>>,
    }

    impl ClusterNotifier for RecordingNotifier {
        fn send_watch(&self, target: &AccountId, key: &WatchKey, added: bool) -> Result<()> {
            self.sent.lock().push((target.clone(), key.clone(), added));
            Ok(())
        }

        fn fetch_watches(&self, _target: &AccountId) -> Result<Vec<WatchKey>> {
            Ok(self.initial.lock().clone())
        }
    }

    #[test]
    fn test_local_watch_persists_through_store() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let cache = LocalWatchCache::new("alice".to_string(), store.clone());
        let key = WatchKey::new("bob", 12);

        cache.watch(key.clone()).unwrap();
        assert!(cache.is_watching(&key).unwrap());

        // A fresh cache instance sees the persisted state
        let reloaded = LocalWatchCache::new("alice".to_string(), store.clone());
        assert!(reloaded.is_watching(&key).unwrap());

        reloaded.unwatch(&key).unwrap();
        let again = LocalWatchCache::new("alice".to_string(), store);
        assert!(!again.is_watching(&key).unwrap());
    }

    #[test]
    fn test_remote_watch_forwards_notifications() {
        let notifier = Arc::new(RecordingNotifier::default());
        notifier.initial.lock().push(WatchKey::new("carol", 3));

        let cache = RemoteWatchCache::open("alice".to_string(), notifier.clone()).unwrap();
        // Initial state came from the synchronous fetch
        assert!(cache.is_watching(&WatchKey::new("carol", 3)).unwrap());

        let key = WatchKey::new("bob", 12);
        cache.watch(key.clone()).unwrap();
        cache.unwatch(&key).unwrap();
        // Re-unwatching an absent key sends nothing
        cache.unwatch(&key).unwrap();

        let sent = notifier.sent.lock();
        assert_eq!(
            *sent,
            vec![
                ("alice".to_string(), key.clone(), true),
                ("alice".to_string(), key, false),
            ]
        );
    }

    #[test]
    fn test_manager_resolves_by_mailbox_location() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let manager = WatchCacheManager::new(
            Arc::new(RemoteOnlyRouter),
            notifier.clone(),
            store,
            8,
        )
        .unwrap();
        let cache = manager.get(&"alice".to_string()).unwrap();
        cache.watch(WatchKey::new("bob", 1)).unwrap();

        // Mutation was forwarded, proving the remote path was selected
        assert_eq!(notifier.sent.lock().len(), 1);
        // Repeated lookups share the instance
        let again = manager.get(&"alice".to_string()).unwrap();
        assert!(Arc::ptr_eq(&cache, &again));
    }

    #[test]
    fn test_manager_bounds_account_count() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let manager = WatchCacheManager::new(
            Arc::new(LocalOnlyRouter),
            Arc::new(RecordingNotifier::default()),
            store,
            2,
        )
        .unwrap();

        for account in ["a", "b", "c"] {
            manager.get(&account.to_string()).unwrap();
        }
        assert_eq!(manager.cached_accounts(), 2);
    }

    #[test]
    fn test_manager_from_config_applies_account_bound() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let config = WatchConfig { max_accounts: 2 };
        let manager = WatchCacheManager::from_config(
            Arc::new(LocalOnlyRouter),
            Arc::new(RecordingNotifier::default()),
            store.clone(),
            &config,
        )
        .unwrap();

        for account in ["a", "b", "c"] {
            manager.get(&account.to_string()).unwrap();
        }
        assert_eq!(manager.cached_accounts(), 2);

        // A zero bound is rejected as a configuration error
        let result = WatchCacheManager::from_config(
            Arc::new(LocalOnlyRouter),
            Arc::new(RecordingNotifier::default()),
            store,
            &WatchConfig { max_accounts: 0 },
        );
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[test]
    fn test_watch_key_encoding_round_trip() {
        let key = WatchKey::new("9d2f4c1e", 4711);
        assert_eq!(WatchKey::decode(&key.encode()), Some(key));
        assert_eq!(WatchKey::decode("garbage"), None);
    }
}
