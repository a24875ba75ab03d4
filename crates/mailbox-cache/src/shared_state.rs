/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Shared-state binding protocol
//!
//! A live item is either unattached (pure in-memory fields) or attached to
//! exactly one backing accessor. While attached, every field mutation is
//! written through synchronously to the backing field map; `attach` performs
//! the one-time full push of current state, `detach` severs the binding and
//! marks the old accessor stale. A write attempted through a stale handle is
//! a no-op, never a resurrection of deleted state; an accessor whose backing
//! map was deleted fails closed on every subsequent operation.

use crate::{
    error::{CacheError, Result},
    item::{FieldMap, ItemData, ItemField, ItemType},
};
use parking_lot::RwLock;
use shared_store::Store;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::debug;
use uuid::Uuid;

/// Binding protocol between a live object and a backing field store.
pub trait SharedState {
    /// Binds the object to a backing store and pushes its full current state.
    /// Any previous binding is severed and marked stale first.
    fn attach(&self, accessor: Arc<dyn SharedStateAccessor>) -> Result<()>;

    /// Severs the binding. Further mutations stay local; the old accessor
    /// becomes stale.
    fn detach(&self);

    fn is_attached(&self) -> bool;
}

/// Handle to one entity's backing field map.
pub trait SharedStateAccessor: Send + Sync + fmt::Debug {
    fn get(&self, field: ItemField) -> Result<Option<String>>;

    fn set(&self, field: ItemField, value: &str) -> Result<()>;

    /// Removes a field from the backing map (the field reverted to its
    /// default).
    fn unset(&self, field: ItemField) -> Result<()>;

    /// One-shot push of several fields, used by the attach-time sync.
    fn set_many(&self, fields: &FieldMap) -> Result<()>;

    /// Removes the backing map entirely. Subsequent `get`/`set` on this
    /// accessor fail closed; nothing ever recreates the map through it.
    fn delete(&self) -> Result<()>;

    /// Marks the handle stale: subsequent writes are no-ops.
    fn mark_stale(&self);

    /// The backing store key, for diagnostics.
    fn key(&self) -> &str;
}

/// Mutation-path state of a live item: either purely local fields or a handle
/// to the remote authoritative field map.
enum Binding {
    Unattached,
    Attached(Arc<dyn SharedStateAccessor>),
}

struct ItemState {
    data: ItemData,
    binding: Binding,
}

/// A live, concurrently shareable mailbox item.
///
/// Cloning is cheap and shares the same underlying state; mutators on any
/// clone write through to the backing store while the item is attached.
#[derive(Clone)]
pub struct SharedItem {
    inner: Arc<SharedItemInner>,
}

struct SharedItemInner {
    id: u32,
    item_type: ItemType,
    state: RwLock<ItemState>,
}

impl SharedItem {
    pub fn new(data: ItemData) -> Self {
        Self {
            inner: Arc::new(SharedItemInner {
                id: data.id,
                item_type: data.item_type,
                state: RwLock::new(ItemState {
                    data,
                    binding: Binding::Unattached,
                }),
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn item_type(&self) -> ItemType {
        self.inner.item_type
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.inner.state.read().data.uuid
    }

    pub fn name(&self) -> Option<String> {
        self.inner.state.read().data.name.clone()
    }

    pub fn flags(&self) -> u32 {
        self.inner.state.read().data.flags
    }

    pub fn size(&self) -> u64 {
        self.inner.state.read().data.size
    }

    pub fn unread_count(&self) -> u32 {
        self.inner.state.read().data.unread_count
    }

    /// Snapshot of the item's current fields.
    pub fn data(&self) -> ItemData {
        self.inner.state.read().data.clone()
    }

    /// Binds to an accessor over an already-populated backing map without
    /// pushing state, used when the item was just reconstructed from that
    /// very map.
    pub(crate) fn bind_existing(&self, accessor: Arc<dyn SharedStateAccessor>) {
        let mut state = self.inner.state.write();
        if let Binding::Attached(old) = &state.binding {
            old.mark_stale();
        }
        state.binding = Binding::Attached(accessor);
    }

    /// Applies a field mutation locally and, while attached, writes it
    /// through. `encoded` is the field's wire value, `None` when the new
    /// value is the field's default.
    fn update(
        &self,
        field: ItemField,
        encoded: Option<String>,
        apply: impl FnOnce(&mut ItemData),
    ) -> Result<()> {
        let mut state = self.inner.state.write();
        apply(&mut state.data);
        if let Binding::Attached(accessor) = &state.binding {
            match &encoded {
                Some(value) => accessor.set(field, value)?,
                None => accessor.unset(field)?,
            }
        }
        Ok(())
    }

    pub fn set_name(&self, name: Option<String>) -> Result<()> {
        self.update(ItemField::Name, name.clone(), |data| data.name = name)
    }

    pub fn set_subject(&self, subject: Option<String>) -> Result<()> {
        self.update(ItemField::Subject, subject.clone(), |data| {
            data.subject = subject
        })
    }

    pub fn set_tags(&self, tags: Vec<String>) -> Result<()> {
        self.update(ItemField::Tags, enc_list(&tags), |data| data.tags = tags)
    }

    pub fn set_smart_folders(&self, smart_folders: Vec<String>) -> Result<()> {
        self.update(ItemField::SmartFolders, enc_list(&smart_folders), |data| {
            data.smart_folders = smart_folders
        })
    }

    pub fn set_flags(&self, flags: u32) -> Result<()> {
        self.update(ItemField::Flags, enc_num(flags as u64), |data| {
            data.flags = flags
        })
    }

    pub fn set_parent_id(&self, parent_id: u32) -> Result<()> {
        self.update(ItemField::ParentId, enc_num(parent_id as u64), |data| {
            data.parent_id = parent_id
        })
    }

    pub fn set_folder_id(&self, folder_id: u32) -> Result<()> {
        self.update(ItemField::FolderId, enc_num(folder_id as u64), |data| {
            data.folder_id = folder_id
        })
    }

    pub fn set_imap_id(&self, imap_id: u32) -> Result<()> {
        self.update(ItemField::ImapId, enc_num(imap_id as u64), |data| {
            data.imap_id = imap_id
        })
    }

    pub fn set_index_id(&self, index_id: u32) -> Result<()> {
        self.update(ItemField::IndexId, enc_num(index_id as u64), |data| {
            data.index_id = index_id
        })
    }

    pub fn set_size(&self, size: u64) -> Result<()> {
        self.update(ItemField::Size, enc_num(size), |data| data.size = size)
    }

    pub fn set_unread_count(&self, unread_count: u32) -> Result<()> {
        self.update(
            ItemField::UnreadCount,
            enc_num(unread_count as u64),
            |data| data.unread_count = unread_count,
        )
    }

    pub fn set_date(&self, date: u64) -> Result<()> {
        self.update(ItemField::Date, enc_num(date), |data| data.date = date)
    }

    pub fn set_date_changed(&self, date_changed: u64) -> Result<()> {
        self.update(ItemField::DateChanged, enc_num(date_changed), |data| {
            data.date_changed = date_changed
        })
    }

    pub fn set_mod_metadata(&self, mod_metadata: u32) -> Result<()> {
        self.update(
            ItemField::ModMetadata,
            enc_num(mod_metadata as u64),
            |data| data.mod_metadata = mod_metadata,
        )
    }

    pub fn set_mod_content(&self, mod_content: u32) -> Result<()> {
        self.update(ItemField::ModContent, enc_num(mod_content as u64), |data| {
            data.mod_content = mod_content
        })
    }

    pub fn set_metadata(&self, metadata: Option<String>) -> Result<()> {
        self.update(ItemField::Metadata, metadata.clone(), |data| {
            data.metadata = metadata
        })
    }

    pub fn set_prev_folders(&self, prev_folders: Option<String>) -> Result<()> {
        self.update(ItemField::PrevFolders, prev_folders.clone(), |data| {
            data.prev_folders = prev_folders
        })
    }

    pub fn set_locator(&self, locator: Option<String>) -> Result<()> {
        self.update(ItemField::Locator, locator.clone(), |data| {
            data.locator = locator
        })
    }

    pub fn set_blob_digest(&self, blob_digest: Option<String>) -> Result<()> {
        self.update(ItemField::BlobDigest, blob_digest.clone(), |data| {
            data.blob_digest = blob_digest
        })
    }
}

impl SharedState for SharedItem {
    fn attach(&self, accessor: Arc<dyn SharedStateAccessor>) -> Result<()> {
        let mut state = self.inner.state.write();
        if let Binding::Attached(old) = &state.binding {
            old.mark_stale();
        }
        // One-time full push of current state
        accessor.set_many(&state.data.to_fields())?;
        state.binding = Binding::Attached(accessor);
        Ok(())
    }

    fn detach(&self) {
        let mut state = self.inner.state.write();
        if let Binding::Attached(accessor) = &state.binding {
            accessor.mark_stale();
        }
        state.binding = Binding::Unattached;
    }

    fn is_attached(&self) -> bool {
        matches!(self.inner.state.read().binding, Binding::Attached(_))
    }
}

impl fmt::Debug for SharedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedItem")
            .field("id", &self.inner.id)
            .field("type", &self.inner.item_type)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Accessor bound to one field map in the shared-state store.
pub struct StoreAccessor {
    store: Arc<dyn Store>,
    key: String,
    stale: AtomicBool,
    deleted: AtomicBool,
}

impl StoreAccessor {
    pub fn new(store: Arc<dyn Store>, key: String) -> Self {
        Self {
            store,
            key,
            stale: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
        }
    }

    fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Returns whether the write may proceed. Deleted handles fail closed,
    /// stale handles swallow the write.
    fn check_writable(&self) -> Result<bool> {
        if self.is_deleted() {
            return Err(CacheError::StaleHandle(self.key.clone()));
        }
        if self.is_stale() {
            debug!(key = self.key.as_str(), "Ignoring write through stale shared-state handle");
            return Ok(false);
        }
        Ok(true)
    }
}

impl SharedStateAccessor for StoreAccessor {
    fn get(&self, field: ItemField) -> Result<Option<String>> {
        if self.is_deleted() || self.is_stale() {
            return Err(CacheError::StaleHandle(self.key.clone()));
        }
        Ok(self.store.get_field(&self.key, field.as_str())?)
    }

    fn set(&self, field: ItemField, value: &str) -> Result<()> {
        if self.check_writable()? {
            self.store.set_field(&self.key, field.as_str(), value)?;
        }
        Ok(())
    }

    fn unset(&self, field: ItemField) -> Result<()> {
        if self.check_writable()? {
            self.store.delete_field(&self.key, field.as_str())?;
        }
        Ok(())
    }

    fn set_many(&self, fields: &FieldMap) -> Result<()> {
        if self.check_writable()? {
            self.store.set_fields(&self.key, &fields.to_raw())?;
        }
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        self.deleted.store(true, Ordering::Release);
        Ok(self.store.delete(&self.key)?)
    }

    fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for StoreAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreAccessor")
            .field("key", &self.key)
            .field("stale", &self.is_stale())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}

fn enc_num(value: u64) -> Option<String> {
    (value != 0).then(|| value.to_string())
}

fn enc_list(values: &[String]) -> Option<String> {
    (!values.is_empty()).then(|| values.join("\n"))
}
