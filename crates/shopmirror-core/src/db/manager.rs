//! Lazily opened, process-wide local store handle

use std::path::PathBuf;

use tokio::sync::OnceCell;

use crate::error::{Error, Result};

use super::connection::Database;
use super::schema::StoreSet;
use super::store::LocalStore;

/// Where the local store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    Memory,
}

/// Owns the single [`LocalStore`] handle and opens it on first use.
///
/// An open failure is cached: every later call reports the same
/// [`Error::StoreUnavailable`] without retrying.
pub struct StoreManager {
    location: StoreLocation,
    stores: StoreSet,
    cell: OnceCell<std::result::Result<LocalStore, String>>,
}

impl StoreManager {
    pub fn new(location: StoreLocation, stores: StoreSet) -> Self {
        Self {
            location,
            stores,
            cell: OnceCell::new(),
        }
    }

    pub fn in_memory(stores: StoreSet) -> Self {
        Self::new(StoreLocation::Memory, stores)
    }

    pub const fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Return the open store, opening it first if needed.
    pub async fn open_or_get(&self) -> Result<LocalStore> {
        let outcome = self
            .cell
            .get_or_init(|| async {
                match self.open().await {
                    Ok(store) => Ok(store),
                    Err(error) => {
                        tracing::error!("Failed to open local store: {error}");
                        Err(error.to_string())
                    }
                }
            })
            .await;

        match outcome {
            Ok(store) => Ok(store.clone()),
            Err(message) => Err(Error::StoreUnavailable(message.clone())),
        }
    }

    async fn open(&self) -> Result<LocalStore> {
        let database = match &self.location {
            StoreLocation::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                tracing::info!("Opening local store at {}", path.display());
                Database::open(path, self.stores.clone()).await?
            }
            StoreLocation::Memory => {
                tracing::info!("Opening in-memory local store");
                Database::open_in_memory(self.stores.clone()).await?
            }
        };
        Ok(LocalStore::new(database))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StoreDescriptor;
    use serde_json::json;
    use tempfile::tempdir;

    fn stores() -> StoreSet {
        StoreSet::new(1, vec![StoreDescriptor::keyed("orders", "id")])
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_or_get_returns_shared_handle() {
        let manager = StoreManager::in_memory(stores());
        let first = manager.open_or_get().await.unwrap();
        first.put("orders", &json!({"id": "o1"})).await.unwrap();

        let second = manager.open_or_get().await.unwrap();
        assert!(second.get("orders", "o1").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_failure_is_cached() {
        let tmp = tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let manager = StoreManager::new(
            StoreLocation::File(blocker.join("nested").join("cache.db")),
            stores(),
        );

        let first = manager.open_or_get().await;
        assert!(matches!(first, Err(Error::StoreUnavailable(_))));

        // Removing the obstacle does not trigger a second open attempt.
        std::fs::remove_file(&blocker).unwrap();
        let second = manager.open_or_get().await;
        assert!(matches!(second, Err(Error::StoreUnavailable(_))));
    }
}
