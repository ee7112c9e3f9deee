//! Keyed per-store record access over the local database

use std::collections::BTreeSet;
use std::sync::Arc;

use libsql::Connection;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::{Record, SyncTimestamp, SYNC_METADATA_STORE};

use super::connection::Database;
use super::schema::{StoreDescriptor, StoreSet};

/// Deletions, upserts and an optional sync stamp committed as one transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub deletes: Vec<String>,
    pub puts: Vec<Value>,
    pub stamp: Option<SyncTimestamp>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.puts.is_empty() && self.stamp.is_none()
    }
}

enum Write {
    Upsert {
        store: String,
        key: String,
        value: String,
    },
    Delete {
        store: String,
        key: String,
    },
}

/// Shared handle to the local persistent store.
///
/// Cloning is cheap; every clone talks to the same connection. Concurrent
/// writers are serialized by the connection lock and each write call is a
/// single transaction.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    stores: Arc<StoreSet>,
}

impl LocalStore {
    pub fn new(db: Database) -> Self {
        let stores = Arc::new(db.stores().clone());
        Self {
            db: Arc::new(Mutex::new(db)),
            stores,
        }
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory(stores: StoreSet) -> Result<Self> {
        Ok(Self::new(Database::open_in_memory(stores).await?))
    }

    pub fn store_set(&self) -> &StoreSet {
        &self.stores
    }

    fn descriptor(&self, store: &str) -> Result<&StoreDescriptor> {
        self.stores
            .descriptor(store)
            .ok_or_else(|| Error::UnknownStore(store.to_string()))
    }

    fn key_of(descriptor: &StoreDescriptor, value: &Value) -> Result<String> {
        let Some(key_path) = descriptor.key_path.as_deref() else {
            return Err(Error::InvalidInput(format!(
                "store '{}' has no key path; use put_with_key",
                descriptor.name
            )));
        };
        value
            .get(key_path)
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "value for store '{}' is missing string key '{key_path}'",
                    descriptor.name
                ))
            })
    }

    fn upsert(descriptor: &StoreDescriptor, value: &Value) -> Result<Write> {
        Ok(Write::Upsert {
            store: descriptor.name.clone(),
            key: Self::key_of(descriptor, value)?,
            value: serde_json::to_string(value)?,
        })
    }

    /// Get one value by key.
    pub async fn get(&self, store: &str, key: &str) -> Result<Option<Value>> {
        self.descriptor(store)?;
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT value FROM records WHERE store = ? AND key = ?",
                [store, key],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let raw: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    /// All values in a store, ordered by key.
    pub async fn get_all(&self, store: &str) -> Result<Vec<Value>> {
        self.descriptor(store)?;
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT value FROM records WHERE store = ? ORDER BY key",
                [store],
            )
            .await?;

        let mut values = Vec::new();
        while let Some(row) = rows.next().await? {
            let raw: String = row.get(0)?;
            values.push(serde_json::from_str(&raw)?);
        }
        Ok(values)
    }

    /// All keys in a store.
    pub async fn get_all_keys(&self, store: &str) -> Result<BTreeSet<String>> {
        self.descriptor(store)?;
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query("SELECT key FROM records WHERE store = ?", [store])
            .await?;

        let mut keys = BTreeSet::new();
        while let Some(row) = rows.next().await? {
            keys.insert(row.get::<String>(0)?);
        }
        Ok(keys)
    }

    /// Upsert a value keyed by the store's key path.
    pub async fn put(&self, store: &str, value: &Value) -> Result<()> {
        let write = Self::upsert(self.descriptor(store)?, value)?;
        let db = self.db.lock().await;
        execute(db.connection(), &write).await
    }

    /// Upsert a value under an explicit key.
    pub async fn put_with_key(&self, store: &str, key: &str, value: &Value) -> Result<()> {
        self.descriptor(store)?;
        let write = Write::Upsert {
            store: store.to_string(),
            key: key.to_string(),
            value: serde_json::to_string(value)?,
        };
        let db = self.db.lock().await;
        execute(db.connection(), &write).await
    }

    /// Upsert many values in one transaction, skipping `null` entries.
    ///
    /// Every value is validated before the transaction starts, so a bad entry
    /// leaves the store untouched.
    pub async fn bulk_put(&self, store: &str, values: &[Value]) -> Result<usize> {
        let descriptor = self.descriptor(store)?;
        let writes = values
            .iter()
            .filter(|value| !value.is_null())
            .map(|value| Self::upsert(descriptor, value))
            .collect::<Result<Vec<_>>>()?;

        let db = self.db.lock().await;
        run_in_transaction(db.connection(), &writes).await?;
        Ok(writes.len())
    }

    /// Delete one key; deleting a missing key is not an error.
    pub async fn delete(&self, store: &str, key: &str) -> Result<()> {
        self.descriptor(store)?;
        let write = Write::Delete {
            store: store.to_string(),
            key: key.to_string(),
        };
        let db = self.db.lock().await;
        execute(db.connection(), &write).await
    }

    /// Remove every value from a store.
    pub async fn clear(&self, store: &str) -> Result<()> {
        self.descriptor(store)?;
        let db = self.db.lock().await;
        db.connection()
            .execute("DELETE FROM records WHERE store = ?", [store])
            .await?;
        Ok(())
    }

    /// Commit deletions, upserts and an optional sync stamp atomically.
    pub async fn apply_batch(&self, store: &str, batch: WriteBatch) -> Result<()> {
        let descriptor = self.descriptor(store)?;

        let mut writes = batch
            .deletes
            .into_iter()
            .map(|key| Write::Delete {
                store: store.to_string(),
                key,
            })
            .collect::<Vec<_>>();
        for value in batch.puts.iter().filter(|value| !value.is_null()) {
            writes.push(Self::upsert(descriptor, value)?);
        }
        if let Some(stamp) = batch.stamp {
            let metadata = self.descriptor(SYNC_METADATA_STORE)?;
            writes.push(Self::upsert(metadata, &serde_json::to_value(stamp)?)?);
        }

        let db = self.db.lock().await;
        run_in_transaction(db.connection(), &writes).await
    }

    /// All values of a store that parse as [`Record`]s.
    pub async fn records(&self, store: &str) -> Result<Vec<Record>> {
        let values = self.get_all(store).await?;
        let total = values.len();
        let records = values
            .into_iter()
            .filter_map(Record::from_value)
            .collect::<Vec<_>>();
        if records.len() != total {
            tracing::debug!(
                "Skipped {} stored values without a string id in '{store}'",
                total - records.len()
            );
        }
        Ok(records)
    }

    /// One record by id.
    pub async fn record(&self, store: &str, id: &str) -> Result<Option<Record>> {
        Ok(self.get(store, id).await?.and_then(Record::from_value))
    }

    /// Stored sync timestamp for a collection.
    pub async fn sync_timestamp(&self, collection: &str) -> Result<Option<SyncTimestamp>> {
        let Some(value) = self.get(SYNC_METADATA_STORE, collection).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(stamp) => Ok(Some(stamp)),
            Err(error) => {
                tracing::warn!("Ignoring malformed sync timestamp for '{collection}': {error}");
                Ok(None)
            }
        }
    }

    pub async fn set_sync_timestamp(&self, stamp: &SyncTimestamp) -> Result<()> {
        self.put(SYNC_METADATA_STORE, &serde_json::to_value(stamp)?)
            .await
    }

    /// Every stored sync timestamp.
    pub async fn sync_timestamps(&self) -> Result<Vec<SyncTimestamp>> {
        Ok(self
            .get_all(SYNC_METADATA_STORE)
            .await?
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect())
    }
}

async fn execute(conn: &Connection, write: &Write) -> Result<()> {
    match write {
        Write::Upsert { store, key, value } => {
            conn.execute(
                "INSERT OR REPLACE INTO records (store, key, value) VALUES (?, ?, ?)",
                [store.as_str(), key.as_str(), value.as_str()],
            )
            .await?;
        }
        Write::Delete { store, key } => {
            conn.execute(
                "DELETE FROM records WHERE store = ? AND key = ?",
                [store.as_str(), key.as_str()],
            )
            .await?;
        }
    }
    Ok(())
}

async fn run_in_transaction(conn: &Connection, writes: &[Write]) -> Result<()> {
    if writes.is_empty() {
        return Ok(());
    }

    conn.execute("BEGIN TRANSACTION", ()).await?;

    for write in writes {
        if let Err(e) = execute(conn, write).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e);
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StoreDescriptor;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn setup() -> LocalStore {
        let stores = StoreSet::new(
            1,
            vec![
                StoreDescriptor::keyed("orders", "id"),
                StoreDescriptor::keyed("users", "id"),
                StoreDescriptor::unkeyed("blobs"),
                StoreDescriptor::keyed(SYNC_METADATA_STORE, "collection"),
            ],
        );
        LocalStore::open_in_memory(stores).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn put_and_get_by_key_path() {
        let store = setup().await;
        store
            .put("orders", &json!({"id": "o1", "total": 100}))
            .await
            .unwrap();

        let value = store.get("orders", "o1").await.unwrap();
        assert_eq!(value, Some(json!({"id": "o1", "total": 100})));
        assert_eq!(store.get("orders", "o2").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn put_overwrites_existing_key() {
        let store = setup().await;
        store.put("orders", &json!({"id": "o1", "total": 1})).await.unwrap();
        store.put("orders", &json!({"id": "o1", "total": 2})).await.unwrap();

        let all = store.get_all("orders").await.unwrap();
        assert_eq!(all, vec![json!({"id": "o1", "total": 2})]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn put_requires_key_path_or_explicit_key() {
        let store = setup().await;
        assert!(matches!(
            store.put("blobs", &json!({"id": "b1"})).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            store.put("orders", &json!({"total": 5})).await,
            Err(Error::InvalidInput(_))
        ));

        store
            .put_with_key("blobs", "b1", &json!([1, 2, 3]))
            .await
            .unwrap();
        assert_eq!(
            store.get("blobs", "b1").await.unwrap(),
            Some(json!([1, 2, 3]))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_store_is_rejected() {
        let store = setup().await;
        assert!(matches!(
            store.get_all("invoices").await,
            Err(Error::UnknownStore(name)) if name == "invoices"
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bulk_put_skips_nulls() {
        let store = setup().await;
        let written = store
            .bulk_put(
                "orders",
                &[json!({"id": "o1"}), Value::Null, json!({"id": "o2"})],
            )
            .await
            .unwrap();
        assert_eq!(written, 2);

        let keys = store.get_all_keys("orders").await.unwrap();
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec!["o1".to_string(), "o2".to_string()]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bulk_put_is_all_or_nothing() {
        let store = setup().await;
        let result = store
            .bulk_put("orders", &[json!({"id": "o1"}), json!({"total": 3})])
            .await;
        assert!(result.is_err());
        assert!(store.get_all("orders").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_and_clear_are_scoped_to_one_store() {
        let store = setup().await;
        store.bulk_put("orders", &[json!({"id": "x"}), json!({"id": "y"})]).await.unwrap();
        store.put("users", &json!({"id": "x"})).await.unwrap();

        store.delete("orders", "x").await.unwrap();
        assert_eq!(store.get("users", "x").await.unwrap(), Some(json!({"id": "x"})));
        assert_eq!(store.get("orders", "x").await.unwrap(), None);

        store.clear("orders").await.unwrap();
        assert!(store.get_all("orders").await.unwrap().is_empty());
        assert_eq!(store.get_all("users").await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn apply_batch_writes_records_and_stamp_together() {
        let store = setup().await;
        store.bulk_put("orders", &[json!({"id": "old"})]).await.unwrap();

        store
            .apply_batch(
                "orders",
                WriteBatch {
                    deletes: vec!["old".to_string()],
                    puts: vec![json!({"id": "new", "total": 9})],
                    stamp: Some(SyncTimestamp::new("orders", 1234)),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            store.get_all("orders").await.unwrap(),
            vec![json!({"id": "new", "total": 9})]
        );
        assert_eq!(
            store.sync_timestamp("orders").await.unwrap(),
            Some(SyncTimestamp::new("orders", 1234))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn apply_batch_rejects_invalid_puts_before_writing() {
        let store = setup().await;
        store.bulk_put("orders", &[json!({"id": "keep"})]).await.unwrap();

        let result = store
            .apply_batch(
                "orders",
                WriteBatch {
                    deletes: vec!["keep".to_string()],
                    puts: vec![json!({"no_id": true})],
                    stamp: Some(SyncTimestamp::new("orders", 1)),
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(store.get_all_keys("orders").await.unwrap().len(), 1);
        assert_eq!(store.sync_timestamp("orders").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn records_skip_values_without_ids() {
        let store = setup().await;
        store.put("orders", &json!({"id": "o1", "total": 4})).await.unwrap();
        store.put_with_key("blobs", "b", &json!("text")).await.unwrap();

        let records = store.records("orders").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "o1");
        assert!(store.records("blobs").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_timestamps_roundtrip() {
        let store = setup().await;
        assert_eq!(store.sync_timestamp("orders").await.unwrap(), None);

        store
            .set_sync_timestamp(&SyncTimestamp::new("orders", 10))
            .await
            .unwrap();
        store
            .set_sync_timestamp(&SyncTimestamp::new("users", 20))
            .await
            .unwrap();

        let mut stamps = store.sync_timestamps().await.unwrap();
        stamps.sort_by(|a, b| a.collection.cmp(&b.collection));
        assert_eq!(
            stamps,
            vec![
                SyncTimestamp::new("orders", 10),
                SyncTimestamp::new("users", 20)
            ]
        );
    }
}
