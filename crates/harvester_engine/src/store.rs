//! Keyed blob stores for raw and translated items.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use harvester_core::{ItemIdentity, ItemKind};
use thiserror::Error;

use crate::persist::{AtomicFileWriter, PersistError};

/// What a stored blob is, for which kind of item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceType {
    pub item_kind: ItemKind,
    pub name: &'static str,
    pub extension: Option<&'static str>,
}

impl ResourceType {
    pub const RAW_OBJECT: ResourceType = ResourceType::new(ItemKind::Object, "raw", Some("xml"));
    pub const RAW_RELATIONSHIP: ResourceType =
        ResourceType::new(ItemKind::Relationship, "raw", Some("xml"));
    pub const RAW_RELATIONSHIP_TYPE: ResourceType =
        ResourceType::new(ItemKind::RelationshipType, "raw", Some("xml"));
    pub const RAW_GROUP: ResourceType = ResourceType::new(ItemKind::Group, "raw", Some("xml"));
    /// Explicit user members of one group.
    pub const RAW_GROUP_MEMBERSHIP: ResourceType =
        ResourceType::new(ItemKind::Group, "membership", Some("xml"));
    /// Photo bytes come in several image formats, so no extension.
    pub const RAW_USER_PHOTO: ResourceType = ResourceType::new(ItemKind::Object, "photo", None);

    pub const TRANSLATED_OBJECT: ResourceType =
        ResourceType::new(ItemKind::Object, "translated", Some("rdf"));
    pub const TRANSLATED_RELATIONSHIP: ResourceType =
        ResourceType::new(ItemKind::Relationship, "translated", Some("rdf"));
    pub const TRANSLATED_GROUP: ResourceType =
        ResourceType::new(ItemKind::Group, "translated", Some("rdf"));

    pub const fn new(item_kind: ItemKind, name: &'static str, extension: Option<&'static str>) -> Self {
        Self {
            item_kind,
            name,
            extension,
        }
    }

    pub fn raw_for(kind: ItemKind) -> ResourceType {
        match kind {
            ItemKind::Object => Self::RAW_OBJECT,
            ItemKind::Relationship => Self::RAW_RELATIONSHIP,
            ItemKind::RelationshipType => Self::RAW_RELATIONSHIP_TYPE,
            ItemKind::Group => Self::RAW_GROUP,
        }
    }

    /// Relationship types have no translated form.
    pub fn translated_for(kind: ItemKind) -> Option<ResourceType> {
        match kind {
            ItemKind::Object => Some(Self::TRANSLATED_OBJECT),
            ItemKind::Relationship => Some(Self::TRANSLATED_RELATIONSHIP),
            ItemKind::Group => Some(Self::TRANSLATED_GROUP),
            ItemKind::RelationshipType => None,
        }
    }

    pub fn accepts(&self, identity: &ItemIdentity) -> bool {
        identity.kind() == self.item_kind
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.item_kind.name())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resource type {resource} cannot hold item {identity}")]
    WrongItemKind {
        identity: ItemIdentity,
        resource: ResourceType,
    },
    #[error("no stored {resource} for {identity}")]
    NotFound {
        identity: ItemIdentity,
        resource: ResourceType,
    },
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound { .. } => true,
            StoreError::Io(err) => err.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Handle to one stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredItem {
    pub identity: ItemIdentity,
    pub resource: ResourceType,
    /// Backing file, for file stores.
    pub path: Option<PathBuf>,
}

pub trait ItemStore: Send + Sync {
    fn store_item(
        &self,
        identity: &ItemIdentity,
        resource: ResourceType,
        data: &[u8],
    ) -> Result<StoredItem, StoreError>;

    fn open(&self, item: &StoredItem) -> Result<Box<dyn Read + Send>, StoreError>;

    /// Removes a stored blob. `Ok(false)` when there was nothing to remove.
    fn delete_item(&self, identity: &ItemIdentity, resource: ResourceType) -> Result<bool, StoreError>;
}

/// Stores each blob as `<root>/<resource>/<descriptor>/<id>.<ext>`.
#[derive(Debug, Clone)]
pub struct FileItemStore {
    root: PathBuf,
}

impl FileItemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn item_path(&self, identity: &ItemIdentity, resource: ResourceType) -> PathBuf {
        self.item_dir(identity, resource)
            .join(file_name(identity, resource))
    }

    fn item_dir(&self, identity: &ItemIdentity, resource: ResourceType) -> PathBuf {
        self.root.join(resource.name).join(identity.descriptor())
    }
}

fn file_name(identity: &ItemIdentity, resource: ResourceType) -> String {
    match resource.extension {
        Some(ext) => format!("{}.{ext}", identity.id()),
        None => identity.id().to_string(),
    }
}

fn check_kind(identity: &ItemIdentity, resource: ResourceType) -> Result<(), StoreError> {
    if resource.accepts(identity) {
        Ok(())
    } else {
        Err(StoreError::WrongItemKind {
            identity: *identity,
            resource,
        })
    }
}

impl ItemStore for FileItemStore {
    fn store_item(
        &self,
        identity: &ItemIdentity,
        resource: ResourceType,
        data: &[u8],
    ) -> Result<StoredItem, StoreError> {
        check_kind(identity, resource)?;
        let writer = AtomicFileWriter::new(self.item_dir(identity, resource));
        let path = writer.write(&file_name(identity, resource), data)?;
        Ok(StoredItem {
            identity: *identity,
            resource,
            path: Some(path),
        })
    }

    fn open(&self, item: &StoredItem) -> Result<Box<dyn Read + Send>, StoreError> {
        let path = item
            .path
            .clone()
            .unwrap_or_else(|| self.item_path(&item.identity, item.resource));
        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound {
                identity: item.identity,
                resource: item.resource,
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn delete_item(&self, identity: &ItemIdentity, resource: ResourceType) -> Result<bool, StoreError> {
        match fs::remove_file(self.item_path(identity, resource)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory store, mainly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryItemStore {
    items: Mutex<HashMap<(ItemIdentity, ResourceType), Vec<u8>>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &ItemIdentity, resource: ResourceType) -> Option<Vec<u8>> {
        self.lock().get(&(*identity, resource)).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Identities stored under `resource`, sorted.
    pub fn identities(&self, resource: ResourceType) -> Vec<ItemIdentity> {
        let mut ids: Vec<_> = self
            .lock()
            .keys()
            .filter(|(_, r)| *r == resource)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(ItemIdentity, ResourceType), Vec<u8>>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ItemStore for MemoryItemStore {
    fn store_item(
        &self,
        identity: &ItemIdentity,
        resource: ResourceType,
        data: &[u8],
    ) -> Result<StoredItem, StoreError> {
        check_kind(identity, resource)?;
        self.lock().insert((*identity, resource), data.to_vec());
        Ok(StoredItem {
            identity: *identity,
            resource,
            path: None,
        })
    }

    fn open(&self, item: &StoredItem) -> Result<Box<dyn Read + Send>, StoreError> {
        self.get(&item.identity, item.resource)
            .map(|data| Box::new(Cursor::new(data)) as Box<dyn Read + Send>)
            .ok_or(StoreError::NotFound {
                identity: item.identity,
                resource: item.resource,
            })
    }

    fn delete_item(&self, identity: &ItemIdentity, resource: ResourceType) -> Result<bool, StoreError> {
        Ok(self.lock().remove(&(*identity, resource)).is_some())
    }
}
