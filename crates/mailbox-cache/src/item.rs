/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Mailbox item data model
//!
//! An item is a mailbox entity identified by a mailbox-scoped integer id and
//! an optional globally-stable UUID. The cache never owns the authoritative
//! copy, only a materialized view of it. The field map is the fixed, total
//! mapping between an item's typed attributes and the flat key -> value
//! representation used as the wire contract with the shared-state store:
//! encoding then decoding a field map reproduces every field exactly, with
//! documented defaults for absent fields (numerics decode to 0, lists to
//! empty, optional strings to `None`).

use ahash::AHashMap;
use shared_store::RawFields;
use tracing::trace;
use uuid::Uuid;

/// Opaque account identifier (a UUID string in practice).
pub type AccountId = String;

/// Mailbox item types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ItemType {
    #[default]
    Unknown = 0,
    Folder = 1,
    SearchFolder = 2,
    Tag = 3,
    Conversation = 4,
    Message = 5,
    Contact = 6,
    Appointment = 7,
    Document = 8,
    Task = 9,
}

impl ItemType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Folder,
            2 => Self::SearchFolder,
            3 => Self::Tag,
            4 => Self::Conversation,
            5 => Self::Message,
            6 => Self::Contact,
            7 => Self::Appointment,
            8 => Self::Document,
            9 => Self::Task,
            _ => Self::Unknown,
        }
    }
}

/// The fixed set of field-map keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemField {
    Type,
    Name,
    Uuid,
    Subject,
    Tags,
    SmartFolders,
    Flags,
    ParentId,
    FolderId,
    ImapId,
    IndexId,
    Size,
    UnreadCount,
    Date,
    DateChanged,
    ModMetadata,
    ModContent,
    Metadata,
    PrevFolders,
    Locator,
    BlobDigest,
}

impl ItemField {
    pub const ALL: [ItemField; 21] = [
        ItemField::Type,
        ItemField::Name,
        ItemField::Uuid,
        ItemField::Subject,
        ItemField::Tags,
        ItemField::SmartFolders,
        ItemField::Flags,
        ItemField::ParentId,
        ItemField::FolderId,
        ItemField::ImapId,
        ItemField::IndexId,
        ItemField::Size,
        ItemField::UnreadCount,
        ItemField::Date,
        ItemField::DateChanged,
        ItemField::ModMetadata,
        ItemField::ModContent,
        ItemField::Metadata,
        ItemField::PrevFolders,
        ItemField::Locator,
        ItemField::BlobDigest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ItemField::Type => "type",
            ItemField::Name => "name",
            ItemField::Uuid => "uuid",
            ItemField::Subject => "subject",
            ItemField::Tags => "tags",
            ItemField::SmartFolders => "smartFolders",
            ItemField::Flags => "flags",
            ItemField::ParentId => "parentId",
            ItemField::FolderId => "folderId",
            ItemField::ImapId => "imapId",
            ItemField::IndexId => "indexId",
            ItemField::Size => "size",
            ItemField::UnreadCount => "unreadCount",
            ItemField::Date => "date",
            ItemField::DateChanged => "dateChanged",
            ItemField::ModMetadata => "modMetadata",
            ItemField::ModContent => "modContent",
            ItemField::Metadata => "metadata",
            ItemField::PrevFolders => "prevFolders",
            ItemField::Locator => "locator",
            ItemField::BlobDigest => "blobDigest",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == name)
    }
}

/// List fields are newline-joined: item and folder names may contain commas
/// but never newlines.
const LIST_SEPARATOR: char = '\n';

/// Typed view over the flat field representation of an item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    entries: AHashMap<ItemField, String>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: ItemField) -> Option<&str> {
        self.entries.get(&field).map(String::as_str)
    }

    pub fn set(&mut self, field: ItemField, value: impl Into<String>) {
        self.entries.insert(field, value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Numeric field; absent or malformed decodes to 0.
    pub fn get_u32(&self, field: ItemField) -> u32 {
        self.get(field)
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }

    pub fn get_u64(&self, field: ItemField) -> u64 {
        self.get(field)
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }

    /// List field; absent decodes to empty, never null.
    pub fn get_list(&self, field: ItemField) -> Vec<String> {
        match self.get(field) {
            Some(value) if !value.is_empty() => value
                .split(LIST_SEPARATOR)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn set_list(&mut self, field: ItemField, values: &[String]) {
        if !values.is_empty() {
            self.set(field, values.join("\n"));
        }
    }

    pub fn get_uuid(&self, field: ItemField) -> Option<Uuid> {
        self.get(field).and_then(|value| Uuid::parse_str(value).ok())
    }

    /// Decodes the raw store representation, ignoring unknown keys.
    pub fn from_raw(raw: &RawFields) -> Self {
        let mut fields = Self::new();
        for (key, value) in raw {
            match ItemField::parse(key) {
                Some(field) => fields.set(field, value.clone()),
                None => trace!(key = key.as_str(), "Ignoring unknown field-map key"),
            }
        }
        fields
    }

    pub fn to_raw(&self) -> RawFields {
        self.entries
            .iter()
            .map(|(field, value)| (field.as_str().to_string(), value.clone()))
            .collect()
    }
}

/// Flat, owned representation of a mailbox item's mutable fields.
///
/// Folders are items whose aggregate counters (`size`, `unread_count`) are
/// meaningful; tags are items looked up by case-insensitive name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemData {
    pub id: u32,
    pub item_type: ItemType,
    pub uuid: Option<Uuid>,
    pub name: Option<String>,
    pub subject: Option<String>,
    pub tags: Vec<String>,
    pub smart_folders: Vec<String>,
    pub flags: u32,
    pub parent_id: u32,
    pub folder_id: u32,
    pub imap_id: u32,
    pub index_id: u32,
    pub size: u64,
    pub unread_count: u32,
    pub date: u64,
    pub date_changed: u64,
    pub mod_metadata: u32,
    pub mod_content: u32,
    pub metadata: Option<String>,
    pub prev_folders: Option<String>,
    pub locator: Option<String>,
    pub blob_digest: Option<String>,
}

impl ItemData {
    pub fn new(id: u32, item_type: ItemType) -> Self {
        Self {
            id,
            item_type,
            ..Default::default()
        }
    }

    pub fn new_folder(id: u32, uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            item_type: ItemType::Folder,
            uuid: Some(uuid),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn new_tag(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            item_type: ItemType::Tag,
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Flattens the item into its field-map representation. Fields holding
    /// their documented default (zero numerics, empty lists, absent strings)
    /// are not emitted.
    pub fn to_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.set(ItemField::Type, self.item_type.as_u8().to_string());
        if let Some(uuid) = self.uuid {
            fields.set(ItemField::Uuid, uuid.to_string());
        }
        if let Some(name) = &self.name {
            fields.set(ItemField::Name, name.clone());
        }
        if let Some(subject) = &self.subject {
            fields.set(ItemField::Subject, subject.clone());
        }
        fields.set_list(ItemField::Tags, &self.tags);
        fields.set_list(ItemField::SmartFolders, &self.smart_folders);
        for (field, value) in [
            (ItemField::Flags, self.flags as u64),
            (ItemField::ParentId, self.parent_id as u64),
            (ItemField::FolderId, self.folder_id as u64),
            (ItemField::ImapId, self.imap_id as u64),
            (ItemField::IndexId, self.index_id as u64),
            (ItemField::Size, self.size),
            (ItemField::UnreadCount, self.unread_count as u64),
            (ItemField::Date, self.date),
            (ItemField::DateChanged, self.date_changed),
            (ItemField::ModMetadata, self.mod_metadata as u64),
            (ItemField::ModContent, self.mod_content as u64),
        ] {
            if value != 0 {
                fields.set(field, value.to_string());
            }
        }
        if let Some(metadata) = &self.metadata {
            fields.set(ItemField::Metadata, metadata.clone());
        }
        if let Some(prev_folders) = &self.prev_folders {
            fields.set(ItemField::PrevFolders, prev_folders.clone());
        }
        if let Some(locator) = &self.locator {
            fields.set(ItemField::Locator, locator.clone());
        }
        if let Some(blob_digest) = &self.blob_digest {
            fields.set(ItemField::BlobDigest, blob_digest.clone());
        }
        fields
    }

    /// Reconstructs an item from its field-map representation. Total: every
    /// absent field takes its documented default.
    pub fn from_fields(id: u32, fields: &FieldMap) -> Self {
        Self {
            id,
            item_type: ItemType::from_u8(fields.get_u32(ItemField::Type) as u8),
            uuid: fields.get_uuid(ItemField::Uuid),
            name: fields.get(ItemField::Name).map(str::to_string),
            subject: fields.get(ItemField::Subject).map(str::to_string),
            tags: fields.get_list(ItemField::Tags),
            smart_folders: fields.get_list(ItemField::SmartFolders),
            flags: fields.get_u32(ItemField::Flags),
            parent_id: fields.get_u32(ItemField::ParentId),
            folder_id: fields.get_u32(ItemField::FolderId),
            imap_id: fields.get_u32(ItemField::ImapId),
            index_id: fields.get_u32(ItemField::IndexId),
            size: fields.get_u64(ItemField::Size),
            unread_count: fields.get_u32(ItemField::UnreadCount),
            date: fields.get_u64(ItemField::Date),
            date_changed: fields.get_u64(ItemField::DateChanged),
            mod_metadata: fields.get_u32(ItemField::ModMetadata),
            mod_content: fields.get_u32(ItemField::ModContent),
            metadata: fields.get(ItemField::Metadata).map(str::to_string),
            prev_folders: fields.get(ItemField::PrevFolders).map(str::to_string),
            locator: fields.get(ItemField::Locator).map(str::to_string),
            blob_digest: fields.get(ItemField::BlobDigest).map(str::to_string),
        }
    }
}
