/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Cache subsystem configuration
//!
//! All sections default to the single-process profile: local-only entity
//! caches, shared snapshots off. Deployments that run multiple mailbox
//! processes switch `backend` to `shared` and point the store at their
//! coordination backend.

use crate::thread_cache::ThreadCachePolicy;
use serde::{Deserialize, Serialize};
use std::{num::NonZeroUsize, time::Duration};

/// Selects where folder, tag, and item caches keep their authoritative state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// Process-local maps only.
    #[default]
    Local,
    /// Local maps backed by the distributed field-map store.
    Shared,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    /// Entry cap of each per-mailbox cache map; under insert pressure the
    /// least recently used entries are evicted. 0 disables the bound.
    pub max_entries: usize,
    pub snapshot: SnapshotConfig,
    pub thread_cache: ThreadCacheConfig,
    pub watch: WatchConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            max_entries: 8192,
            snapshot: SnapshotConfig::default(),
            thread_cache: ThreadCacheConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

impl CacheConfig {
    /// The per-cache entry bound, or `None` when disabled.
    pub fn capacity(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.max_entries)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Enables the distributed folder/tag snapshot blob.
    pub shared_enabled: bool,
    /// Expiry of the snapshot blob, in seconds. `None` means no expiry.
    pub ttl_secs: Option<u64>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            shared_enabled: false,
            ttl_secs: Some(86400),
        }
    }
}

impl SnapshotConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadCacheConfig {
    /// Idle expiry of in-transaction entries, in seconds.
    pub in_transaction_idle_secs: u64,
    /// Idle expiry of out-of-transaction entries, in seconds.
    pub out_transaction_idle_secs: u64,
    /// Cap of the out-of-transaction pool, across all threads.
    pub out_transaction_max_entries: usize,
}

impl Default for ThreadCacheConfig {
    fn default() -> Self {
        let policy = ThreadCachePolicy::default();
        Self {
            in_transaction_idle_secs: policy.in_transaction_idle.as_secs(),
            out_transaction_idle_secs: policy.out_transaction_idle.as_secs(),
            out_transaction_max_entries: policy.out_transaction_max_entries,
        }
    }
}

impl ThreadCacheConfig {
    pub fn to_policy(&self) -> ThreadCachePolicy {
        ThreadCachePolicy {
            in_transaction_idle: Duration::from_secs(self.in_transaction_idle_secs),
            out_transaction_idle: Duration::from_secs(self.out_transaction_idle_secs),
            out_transaction_max_entries: self.out_transaction_max_entries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Upper bound of per-account watch caches kept in memory.
    pub max_accounts: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { max_accounts: 1024 }
    }
}
