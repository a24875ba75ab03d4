/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Per-thread, transaction-aware caches
//!
//! A `ThreadLocalCache` binds one value to each calling thread, computed on
//! first access, in one of two independent pools selected by whether the
//! caller is inside a transaction. Each pool has its own idle expiry; the
//! outside-transaction pool additionally has a global entry cap (the
//! inside-transaction pool is bounded by transaction duration instead).
//!
//! A process-wide manager holds weak references to every created pool and
//! drives a single periodic background sweep across all of them, so idle
//! expiry applies even to low-traffic pools that lazy expiry never visits.
//! The manager is started on first pool registration and needs no teardown;
//! process exit reclaims it.

use ahash::AHashMap;
use parking_lot::Mutex;
use std::{
    sync::{
        Arc, OnceLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
    thread::ThreadId,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

/// Interval of the process-wide background sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Expiry policy for the two pools of a thread-local cache.
#[derive(Debug, Clone)]
pub struct ThreadCachePolicy {
    /// Idle expiry of entries created inside a transaction.
    pub in_transaction_idle: Duration,
    /// Idle expiry of entries created outside a transaction.
    pub out_transaction_idle: Duration,
    /// Entry cap of the outside-transaction pool, across all threads.
    pub out_transaction_max_entries: usize,
}

impl Default for ThreadCachePolicy {
    fn default() -> Self {
        Self {
            in_transaction_idle: Duration::from_secs(300),
            out_transaction_idle: Duration::from_secs(120),
            out_transaction_max_entries: 500,
        }
    }
}

struct PoolEntry<T> {
    value: Arc<T>,
    last_access: Instant,
}

struct Pool<T> {
    entries: Mutex<AHashMap<ThreadId, PoolEntry<T>>>,
    idle: Duration,
    max_entries: Option<usize>,
}

impl<T> Pool<T> {
    fn new(idle: Duration, max_entries: Option<usize>) -> Self {
        Self {
            entries: Mutex::new(AHashMap::new()),
            idle,
            max_entries,
        }
    }

    fn get(&self, supplier: impl FnOnce() -> T) -> Arc<T> {
        let thread = std::thread::current().id();
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(&thread) {
            // Lazy expiry on access
            if now.duration_since(entry.last_access) < self.idle {
                entry.last_access = now;
                return entry.value.clone();
            }
            entries.remove(&thread);
        }

        if let Some(max) = self.max_entries {
            while entries.len() >= max {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_access)
                    .map(|(thread, _)| *thread);
                match oldest {
                    Some(thread) => {
                        entries.remove(&thread);
                    }
                    None => break,
                }
            }
        }

        let value = Arc::new(supplier());
        entries.insert(
            thread,
            PoolEntry {
                value: value.clone(),
                last_access: now,
            },
        );
        value
    }

    fn remove(&self) -> Option<Arc<T>> {
        self.entries
            .lock()
            .remove(&std::thread::current().id())
            .map(|entry| entry.value)
    }

    fn sweep(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.last_access) < self.idle);
        before - entries.len()
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Thread-bound value cache with independent in/out-of-transaction pools.
pub struct ThreadLocalCache<T: Send + Sync + 'static> {
    name: String,
    in_txn: Pool<T>,
    out_txn: Pool<T>,
}

impl<T: Send + Sync + 'static> ThreadLocalCache<T> {
    /// Creates the cache and registers it with the process-wide sweep.
    pub fn new(name: impl Into<String>, policy: &ThreadCachePolicy) -> Arc<Self> {
        let cache = Self::unregistered(name, policy);
        let weak: Weak<dyn Sweepable> = Arc::downgrade(&cache) as Weak<dyn Sweepable>;
        ThreadLocalCacheManager::global().register(weak);
        cache
    }

    fn unregistered(name: impl Into<String>, policy: &ThreadCachePolicy) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            in_txn: Pool::new(policy.in_transaction_idle, None),
            out_txn: Pool::new(
                policy.out_transaction_idle,
                Some(policy.out_transaction_max_entries),
            ),
        })
    }

    /// Returns the calling thread's value from the selected pool, computing
    /// it on first access.
    pub fn get(&self, in_transaction: bool, supplier: impl FnOnce() -> T) -> Arc<T> {
        self.pool(in_transaction).get(supplier)
    }

    /// Evicts the calling thread's entry from the selected pool.
    pub fn remove(&self, in_transaction: bool) -> Option<Arc<T>> {
        self.pool(in_transaction).remove()
    }

    /// Evicts the calling thread's entries from both pools.
    pub fn flush_thread(&self) {
        self.in_txn.remove();
        self.out_txn.remove();
    }

    pub fn entries(&self, in_transaction: bool) -> usize {
        self.pool(in_transaction).len()
    }

    fn pool(&self, in_transaction: bool) -> &Pool<T> {
        if in_transaction { &self.in_txn } else { &self.out_txn }
    }
}

/// A pool the background sweeper can visit without knowing its value type.
pub(crate) trait Sweepable: Send + Sync {
    fn sweep(&self, now: Instant);
}

impl<T: Send + Sync + 'static> Sweepable for ThreadLocalCache<T> {
    fn sweep(&self, now: Instant) {
        let expired = self.in_txn.sweep(now) + self.out_txn.sweep(now);
        if expired > 0 {
            debug!(
                cache = self.name.as_str(),
                expired = expired,
                "Expired idle thread-cache entries"
            );
        }
    }
}

/// Process-wide registry of thread-local caches and their periodic sweeper.
pub struct ThreadLocalCacheManager {
    pools: Mutex<Vec<Weak<dyn Sweepable>>>,
    sweeper_started: AtomicBool,
}

impl ThreadLocalCacheManager {
    pub fn global() -> &'static Self {
        static MANAGER: OnceLock<ThreadLocalCacheManager> = OnceLock::new();
        MANAGER.get_or_init(|| ThreadLocalCacheManager {
            pools: Mutex::new(Vec::new()),
            sweeper_started: AtomicBool::new(false),
        })
    }

    fn register(&self, pool: Weak<dyn Sweepable>) {
        self.pools.lock().push(pool);
        self.start_sweeper();
    }

    /// Sweeps every live pool, dropping registrations whose cache is gone.
    pub fn sweep_all(&self) {
        let now = Instant::now();
        self.pools.lock().retain(|weak| match weak.upgrade() {
            Some(pool) => {
                pool.sweep(now);
                true
            }
            None => false,
        });
    }

    pub fn pool_count(&self) -> usize {
        self.pools.lock().len()
    }

    fn start_sweeper(&self) {
        if self
            .sweeper_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let spawned = std::thread::Builder::new()
            .name("thread-cache-sweeper".to_string())
            .spawn(|| {
                loop {
                    std::thread::sleep(SWEEP_INTERVAL);
                    ThreadLocalCacheManager::global().sweep_all();
                }
            });
        if let Err(err) = spawned {
            warn!(error = %err, "Failed to start thread-cache sweeper");
            self.sweeper_started.store(false, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(idle_ms: u64, max: usize) -> ThreadCachePolicy {
        ThreadCachePolicy {
            in_transaction_idle: Duration::from_millis(idle_ms),
            out_transaction_idle: Duration::from_millis(idle_ms),
            out_transaction_max_entries: max,
        }
    }

    #[test]
    fn test_first_access_computes_then_caches() {
        let cache = ThreadLocalCache::new("t", &ThreadCachePolicy::default());
        let first = cache.get(false, || 41);
        let second = cache.get(false, || 42);
        assert_eq!(*first, 41);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_pools_are_independent() {
        let cache = ThreadLocalCache::new("t", &ThreadCachePolicy::default());
        let inside = cache.get(true, || "txn");
        let outside = cache.get(false, || "plain");
        assert_eq!(*inside, "txn");
        assert_eq!(*outside, "plain");

        cache.remove(true);
        assert_eq!(cache.entries(true), 0);
        assert_eq!(cache.entries(false), 1);
    }

    #[test]
    fn test_idle_expiry_recomputes() {
        let cache = ThreadLocalCache::new("t", &policy(30, 10));
        let first = cache.get(false, || 1);
        assert_eq!(*cache.get(false, || 2), 1);

        std::thread::sleep(Duration::from_millis(50));
        let recomputed = cache.get(false, || 2);
        assert_eq!(*recomputed, 2);
        assert!(!Arc::ptr_eq(&first, &recomputed));
    }

    #[test]
    fn test_background_sweep_expires_idle_entries() {
        let cache = ThreadLocalCache::new("t", &policy(30, 10));
        cache.get(false, || 1);
        assert_eq!(cache.entries(false), 1);

        std::thread::sleep(Duration::from_millis(50));
        ThreadLocalCacheManager::global().sweep_all();
        assert_eq!(cache.entries(false), 0);
    }

    #[test]
    fn test_out_of_transaction_pool_is_capped() {
        let cache = ThreadLocalCache::new("t", &policy(60_000, 2));
        for _ in 0..3 {
            let cache = cache.clone();
            std::thread::spawn(move || {
                cache.get(false, || 0);
            })
            .join()
            .unwrap();
        }
        assert!(cache.entries(false) <= 2);
    }

    #[test]
    fn test_per_thread_isolation() {
        let cache = ThreadLocalCache::new("t", &ThreadCachePolicy::default());
        cache.get(false, || "main");

        let cache2 = cache.clone();
        let other = std::thread::spawn(move || *cache2.get(false, || "worker"))
            .join()
            .unwrap();
        assert_eq!(other, "worker");
        assert_eq!(*cache.get(false, || "x"), "main");
    }

    #[test]
    fn test_manager_drops_dead_pools() {
        let manager = ThreadLocalCacheManager {
            pools: Mutex::new(Vec::new()),
            sweeper_started: AtomicBool::new(true),
        };
        let cache =
            ThreadLocalCache::<u32>::unregistered("short-lived", &ThreadCachePolicy::default());
        manager
            .pools
            .lock()
            .push(Arc::downgrade(&cache) as Weak<dyn Sweepable>);

        manager.sweep_all();
        assert_eq!(manager.pool_count(), 1);

        drop(cache);
        manager.sweep_all();
        assert_eq!(manager.pool_count(), 0);
    }
}
