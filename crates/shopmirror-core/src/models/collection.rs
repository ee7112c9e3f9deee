//! Collection registry and per-collection shape descriptors

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::db::{StoreDescriptor, StoreSet};
use crate::error::{Error, Result};

/// Id assigned to the record of a singleton collection.
pub const SINGLETON_ID: &str = "main";

/// Reserved store holding one [`SyncTimestamp`](super::SyncTimestamp) per collection.
pub const SYNC_METADATA_STORE: &str = "syncMetadata";

/// How a collection is laid out at the remote source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Shape {
    /// `{id -> record}`
    Flat,
    /// Records nested under at most `depth` grouping levels
    /// (e.g. year / month / day) before `{id -> record}`.
    Hierarchical { depth: usize },
    /// The remote node itself is the record, stored under [`SINGLETON_ID`].
    Singleton,
}

/// A synchronized collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionSpec {
    /// Collection name; also the local store name
    pub name: String,
    /// Remote path, defaults to `name`
    #[serde(default)]
    pub path: Option<String>,
    /// Remote shape
    pub shape: Shape,
    /// Whether consumers attach the realtime mirror
    #[serde(default)]
    pub realtime: bool,
}

impl CollectionSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, shape: Shape) -> Self {
        Self {
            name: name.into(),
            path: None,
            shape,
            realtime: false,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub const fn realtime(mut self) -> Self {
        self.realtime = true;
        self
    }

    /// Path of the collection node at the remote source.
    pub fn remote_path(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.name)
    }
}

/// The fixed set of collections kept in sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRegistry {
    collections: Vec<CollectionSpec>,
}

impl CollectionRegistry {
    /// Build a registry, rejecting duplicate, empty or reserved names.
    pub fn new(collections: Vec<CollectionSpec>) -> Result<Self> {
        let mut seen = HashSet::new();
        for spec in &collections {
            let name = spec.name.trim();
            if name.is_empty() {
                return Err(Error::Config("collection name must not be empty".into()));
            }
            if name != spec.name || name.contains('/') {
                return Err(Error::Config(format!(
                    "collection name '{}' must not contain '/' or surrounding whitespace",
                    spec.name
                )));
            }
            if name == SYNC_METADATA_STORE {
                return Err(Error::Config(format!(
                    "collection name '{SYNC_METADATA_STORE}' is reserved"
                )));
            }
            if !seen.insert(name) {
                return Err(Error::Config(format!("duplicate collection '{name}'")));
            }
        }
        Ok(Self { collections })
    }

    /// The dashboard's known collections.
    pub fn defaults() -> Self {
        Self {
            collections: default_collections(),
        }
    }

    pub fn get(&self, name: &str) -> Result<&CollectionSpec> {
        self.collections
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| Error::UnknownCollection(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollectionSpec> {
        self.collections.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.collections.iter().map(|spec| spec.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Store layout for the local store: one keyed store per collection plus
    /// the reserved sync metadata store.
    pub fn store_set(&self, version: u32) -> StoreSet {
        let mut stores = self
            .collections
            .iter()
            .map(|spec| StoreDescriptor::keyed(spec.name.clone(), "id"))
            .collect::<Vec<_>>();
        stores.push(StoreDescriptor::keyed(SYNC_METADATA_STORE, "collection"));
        StoreSet::new(version, stores)
    }
}

impl Default for CollectionRegistry {
    fn default() -> Self {
        Self::defaults()
    }
}

pub(crate) fn default_collections() -> Vec<CollectionSpec> {
    vec![
        CollectionSpec::new("orders", Shape::Hierarchical { depth: 3 }).realtime(),
        CollectionSpec::new("customers", Shape::Flat).realtime(),
        CollectionSpec::new("users", Shape::Flat).realtime(),
        CollectionSpec::new("shippingZones", Shape::Flat),
        CollectionSpec::new("commissions", Shape::Flat),
        CollectionSpec::new("reports", Shape::Flat),
        CollectionSpec::new("appSettings", Shape::Singleton).realtime(),
        CollectionSpec::new("receiptSettings", Shape::Singleton),
    ]
}
