/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Folder/tag snapshot cache
//!
//! Single-blob cache of a mailbox's full folder and tag set, used to
//! bootstrap a mailbox without enumerating entities one by one. The local
//! backend is a single in-process slot; the distributed backend stores one
//! versioned blob per mailbox and is guarded by a configuration flag: when
//! disabled it always reports a miss and never writes. The version marker
//! turns a future incompatible encoding into a miss instead of a mis-parse.

use crate::{
    error::Result,
    item::{AccountId, FieldMap, ItemData},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shared_store::Store;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{debug, warn};

const SNAPSHOT_VERSION: u32 = 1;

/// Decoded folder/tag snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FolderTagSnapshot {
    pub folders: Vec<ItemData>,
    pub tags: Vec<ItemData>,
}

/// Snapshot accessors of one mailbox.
pub trait FolderTagSnapshotCache: Send + Sync {
    /// Returns the last cached snapshot, or `None` if nothing is cached.
    fn get_tags_and_folders(&self) -> Result<Option<FolderTagSnapshot>>;

    /// Serializes the full current set, replacing any prior snapshot.
    fn cache_tags_and_folders(&self, folders: &[ItemData], tags: &[ItemData]) -> Result<()>;

    /// Drops the cached snapshot.
    fn clear(&self) -> Result<()>;
}

/// Process-local single-slot snapshot holder.
#[derive(Default)]
pub struct LocalFolderTagCache {
    slot: Mutex<Option<FolderTagSnapshot>>,
}

impl LocalFolderTagCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FolderTagSnapshotCache for LocalFolderTagCache {
    fn get_tags_and_folders(&self) -> Result<Option<FolderTagSnapshot>> {
        Ok(self.slot.lock().clone())
    }

    fn cache_tags_and_folders(&self, folders: &[ItemData], tags: &[ItemData]) -> Result<()> {
        *self.slot.lock() = Some(FolderTagSnapshot {
            folders: folders.to_vec(),
            tags: tags.to_vec(),
        });
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.lock() = None;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: u32,
    folders: Vec<SnapshotEntry>,
    tags: Vec<SnapshotEntry>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    id: u32,
    fields: HashMap<String, String>,
}

impl SnapshotEntry {
    fn encode(item: &ItemData) -> Self {
        Self {
            id: item.id,
            fields: item.to_fields().to_raw().into_iter().collect(),
        }
    }

    fn decode(&self) -> ItemData {
        ItemData::from_fields(self.id, &FieldMap::from_raw(&self.fields.clone().into_iter().collect()))
    }
}

/// Distributed single-key snapshot blob, guarded by a feature flag.
pub struct SharedFolderTagCache {
    store: Arc<dyn Store>,
    key: String,
    enabled: bool,
    ttl: Option<Duration>,
}

impl SharedFolderTagCache {
    pub fn new(
        store: Arc<dyn Store>,
        account: &AccountId,
        enabled: bool,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            store,
            key: format!("mbox:{account}:foldertag"),
            enabled,
            ttl,
        }
    }
}

impl FolderTagSnapshotCache for SharedFolderTagCache {
    fn get_tags_and_folders(&self) -> Result<Option<FolderTagSnapshot>> {
        if !self.enabled {
            return Ok(None);
        }
        let Some(blob) = self.store.get_blob(&self.key)? else {
            return Ok(None);
        };
        let envelope: SnapshotEnvelope = match serde_json::from_slice(&blob) {
            Ok(envelope) => envelope,
            Err(err) => {
                // Corruption falls back to re-fetching from the domain layer
                warn!(key = self.key.as_str(), error = %err, "Discarding undecodable folder/tag snapshot");
                return Ok(None);
            }
        };
        if envelope.version != SNAPSHOT_VERSION {
            debug!(
                key = self.key.as_str(),
                version = envelope.version,
                "Ignoring folder/tag snapshot with unsupported version"
            );
            return Ok(None);
        }
        Ok(Some(FolderTagSnapshot {
            folders: envelope.folders.iter().map(SnapshotEntry::decode).collect(),
            tags: envelope.tags.iter().map(SnapshotEntry::decode).collect(),
        }))
    }

    fn cache_tags_and_folders(&self, folders: &[ItemData], tags: &[ItemData]) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let envelope = SnapshotEnvelope {
            version: SNAPSHOT_VERSION,
            folders: folders.iter().map(SnapshotEntry::encode).collect(),
            tags: tags.iter().map(SnapshotEntry::encode).collect(),
        };
        let blob = serde_json::to_vec(&envelope)
            .map_err(|err| crate::error::CacheError::Decode(err.to_string()))?;
        self.store.set_blob(&self.key, &blob, self.ttl)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.enabled {
            self.store.delete_blob(&self.key)?;
        }
        Ok(())
    }
}
