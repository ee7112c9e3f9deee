//! Database connection management

use crate::error::Result;
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;

use super::migrations;
use super::schema::StoreSet;

/// Database wrapper for the libSQL connection backing the local store
pub struct Database {
    // Owns the connection's underlying handle.
    _db: LibSqlDatabase,
    conn: Connection,
    stores: StoreSet,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations and store-set upgrades automatically.
    pub async fn open(path: impl AsRef<Path>, stores: StoreSet) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        Self::initialize(db, stores).await
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory(stores: StoreSet) -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::initialize(db, stores).await
    }

    async fn initialize(db: LibSqlDatabase, stores: StoreSet) -> Result<Self> {
        let conn = db.connect()?;
        let database = Self {
            _db: db,
            conn,
            stores,
        };
        database.configure().await?;
        database.migrate().await?;
        migrations::ensure_store_set(&database.conn, &database.stores).await?;
        Ok(database)
    }

    /// Configure `SQLite` for optimal performance
    async fn configure(&self) -> Result<()> {
        // WAL is unavailable for in-memory databases
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        self.conn
            .execute("PRAGMA cache_size = 10000;", ())
            .await
            .ok();
        Ok(())
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn).await
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Store layout this database was opened with
    pub const fn stores(&self) -> &StoreSet {
        &self.stores
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StoreDescriptor;
    use tempfile::tempdir;

    fn stores(version: u32, names: &[&str]) -> StoreSet {
        StoreSet::new(
            version,
            names
                .iter()
                .map(|name| StoreDescriptor::keyed(*name, "id"))
                .collect(),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_in_memory() {
        let db = Database::open_in_memory(stores(1, &["orders"])).await.unwrap();
        assert_eq!(db.stores().version(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reopening_file_with_new_store_keeps_existing_rows() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("cache.db");

        {
            let db = Database::open(&path, stores(1, &["orders"])).await.unwrap();
            db.connection()
                .execute(
                    "INSERT INTO records (store, key, value) VALUES ('orders', 'o1', '{\"id\":\"o1\"}')",
                    (),
                )
                .await
                .unwrap();
        }

        let db = Database::open(&path, stores(2, &["orders", "users"]))
            .await
            .unwrap();
        let mut rows = db
            .connection()
            .query("SELECT key FROM records WHERE store = 'orders'", ())
            .await
            .unwrap();
        let key: String = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(key, "o1");
    }
}
