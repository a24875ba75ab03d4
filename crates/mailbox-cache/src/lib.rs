/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! # Mailbox Object Cache
//!
//! Caching and shared-state layer for mailbox entities (folders, tags,
//! messages) with support for:
//!
//! - Local in-process caches or distributed caches backed by a field-map store
//! - Write-through shared state: attached objects push mutations to the store
//! - Read-repair reconciliation against an authoritative live-id index
//! - Per-thread, transaction-aware item cache views with idle expiry
//! - Folder/tag snapshot blobs for fast mailbox bootstrap
//! - Cross-account watch tracking, local or forwarded to the hosting process
//!
//! The whole layer is synchronous: every operation completes on the calling
//! thread, and the only background activity is a single idle-entry sweeper.

pub mod cache;
pub mod config;
pub mod error;
pub mod item;
pub mod map_cache;
pub mod registry;
pub mod shared_cache;
pub mod shared_state;
pub mod snapshot;
pub mod thread_cache;
pub mod watch;

pub use cache::{FolderCache, ItemCache, MailboxCaches, TagCache};
pub use config::{CacheBackendKind, CacheConfig, SnapshotConfig, ThreadCacheConfig, WatchConfig};
pub use error::{CacheError, Result};
pub use item::{AccountId, FieldMap, ItemData, ItemField, ItemType};
pub use map_cache::{CacheCodec, CacheStats, FieldCodec, IdentityCodec, MapItemCache};
pub use registry::{CachedObjectKey, CachedObjectRegistry, ClearableCache, ObjectKind};
pub use shared_cache::SharedStateCache;
pub use shared_state::{SharedItem, SharedState, SharedStateAccessor, StoreAccessor};
pub use snapshot::{FolderTagSnapshot, FolderTagSnapshotCache};
pub use thread_cache::{ThreadCachePolicy, ThreadLocalCache, ThreadLocalCacheManager};
pub use watch::{ClusterNotifier, MailboxRouter, WatchCache, WatchCacheManager, WatchKey};
