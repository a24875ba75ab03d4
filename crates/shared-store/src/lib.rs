/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! # Shared-State Store
//!
//! Distributed backing store for mailbox shared state. Exposes the three
//! abstractions the cache layer is built on:
//!
//! - a keyed per-entity field-map store (existence check, read-all, per-field
//!   read/write, delete)
//! - a keyed blob store with optional expiry
//! - a keyed set store for tracking live ids cheaply
//!
//! No wire protocol is mandated; any backend offering point-in-time consistent
//! single-key operations suffices. The in-memory backend doubles as the
//! reference semantics and the test double. The Redis backend is gated behind
//! the `redis` cargo feature.
//!
//! All operations are synchronous and run on the caller's thread: calls into a
//! remote backend may block on I/O, the in-memory backend blocks only on
//! in-process locking.

pub mod backend;
pub mod error;

pub use backend::memory::MemoryStore;
#[cfg(feature = "redis")]
pub use backend::redis::RedisStore;
pub use error::{Result, StoreError};

use ahash::{AHashMap, AHashSet};
use std::time::Duration;

/// Flat key -> value representation of an entity's fields, as stored.
pub type RawFields = AHashMap<String, String>;

/// Keyed per-entity field-map store.
pub trait FieldMapStore: Send + Sync {
    /// Returns whether a field map exists for `key`.
    fn exists(&self, key: &str) -> Result<bool>;

    /// Reads every field of the map at `key`, or `None` if the map does not
    /// exist.
    fn get_all(&self, key: &str) -> Result<Option<RawFields>>;

    /// Reads a single field.
    fn get_field(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Writes a single field, creating the map if needed.
    fn set_field(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Writes several fields at once, creating the map if needed.
    fn set_fields(&self, key: &str, fields: &RawFields) -> Result<()>;

    /// Removes a single field from the map.
    fn delete_field(&self, key: &str, field: &str) -> Result<()>;

    /// Deletes the entire map.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Keyed blob store with optional expiry.
pub trait BlobStore: Send + Sync {
    fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn set_blob(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    fn delete_blob(&self, key: &str) -> Result<()>;
}

/// Keyed set store.
pub trait SetStore: Send + Sync {
    fn set_add(&self, key: &str, member: &str) -> Result<()>;

    fn set_remove(&self, key: &str, member: &str) -> Result<()>;

    fn set_members(&self, key: &str) -> Result<AHashSet<String>>;

    fn set_contains(&self, key: &str, member: &str) -> Result<bool>;
}

/// Umbrella trait implemented by every complete store backend.
pub trait Store: FieldMapStore + BlobStore + SetStore {}

impl<T: FieldMapStore + BlobStore + SetStore> Store for T {}
