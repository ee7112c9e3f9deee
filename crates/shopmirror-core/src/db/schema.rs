//! Named store layout fixed at open time

/// A named store inside the local database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDescriptor {
    pub name: String,
    /// Field of each value used as its key; `None` means callers pass keys explicitly.
    pub key_path: Option<String>,
}

impl StoreDescriptor {
    pub fn keyed(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: Some(key_path.into()),
        }
    }

    pub fn unkeyed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: None,
        }
    }
}

/// Versioned set of stores.
///
/// Raising `version` makes the next open create any missing stores; existing
/// stores and their data are left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSet {
    version: u32,
    stores: Vec<StoreDescriptor>,
}

impl StoreSet {
    pub const fn new(version: u32, stores: Vec<StoreDescriptor>) -> Self {
        Self { version, stores }
    }

    pub const fn version(&self) -> u32 {
        self.version
    }

    pub fn descriptor(&self, name: &str) -> Option<&StoreDescriptor> {
        self.stores.iter().find(|store| store.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoreDescriptor> {
        self.stores.iter()
    }
}
