//! Database migrations and store-set upgrades

use std::collections::HashMap;

use crate::error::{Error, Result};
use libsql::Connection;

use super::schema::StoreSet;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

const STORE_SET_VERSION_KEY: &str = "store_set_version";

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    // Check if schema_version table exists
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Migration to version 1: store registry and keyed records
async fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    let statements = [
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Named stores; empty key_path means explicit keys
        "CREATE TABLE IF NOT EXISTS stores (
            name TEXT PRIMARY KEY,
            key_path TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL
        )",
        // Records, one JSON document per (store, key)
        "CREATE TABLE IF NOT EXISTS records (
            store TEXT NOT NULL REFERENCES stores(name) ON DELETE CASCADE,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (store, key)
        )",
        "CREATE TABLE IF NOT EXISTS store_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        // Record migration version
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}

/// Read the store-set version recorded by the last upgrade (0 when none).
async fn persisted_store_set_version(conn: &Connection) -> Result<u32> {
    let mut rows = conn
        .query(
            "SELECT value FROM store_meta WHERE key = ?",
            [STORE_SET_VERSION_KEY],
        )
        .await?;

    let Some(row) = rows.next().await? else {
        return Ok(0);
    };
    let raw: String = row.get(0)?;
    raw.parse()
        .map_err(|_| Error::Database(format!("invalid store set version '{raw}'")))
}

/// Registered stores and their key paths.
pub async fn registered_stores(conn: &Connection) -> Result<HashMap<String, String>> {
    let mut rows = conn.query("SELECT name, key_path FROM stores", ()).await?;
    let mut stores = HashMap::new();
    while let Some(row) = rows.next().await? {
        stores.insert(row.get::<String>(0)?, row.get::<String>(1)?);
    }
    Ok(stores)
}

/// Bring the registered stores up to `set`.
///
/// A newer set version runs a one-time pass creating missing stores; existing
/// stores keep their data. Opening with an older version is rejected, and an
/// equal version must already contain every requested store.
pub async fn ensure_store_set(conn: &Connection, set: &StoreSet) -> Result<()> {
    let persisted = persisted_store_set_version(conn).await?;

    if set.version() < persisted {
        return Err(Error::VersionDowngrade {
            requested: set.version(),
            persisted,
        });
    }

    if set.version() > persisted {
        upgrade_store_set(conn, set, persisted).await?;
    }

    let registered = registered_stores(conn).await?;
    for descriptor in set.iter() {
        match registered.get(&descriptor.name) {
            None => {
                return Err(Error::Database(format!(
                    "store '{}' is not registered at version {}; bump the store set version",
                    descriptor.name,
                    set.version()
                )));
            }
            Some(key_path) if key_path != descriptor.key_path.as_deref().unwrap_or_default() => {
                tracing::warn!(
                    "Store '{}' was created with key path '{}' but '{}' was requested",
                    descriptor.name,
                    key_path,
                    descriptor.key_path.as_deref().unwrap_or_default()
                );
            }
            Some(_) => {}
        }
    }

    Ok(())
}

async fn upgrade_store_set(conn: &Connection, set: &StoreSet, from: u32) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for descriptor in set.iter() {
        let key_path = descriptor.key_path.as_deref().unwrap_or_default();
        if let Err(e) = conn
            .execute(
                "INSERT OR IGNORE INTO stores (name, key_path, created_at)
                 VALUES (?, ?, CAST(strftime('%s','now') AS INTEGER) * 1000)",
                [descriptor.name.as_str(), key_path],
            )
            .await
        {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    let version = set.version().to_string();
    if let Err(e) = conn
        .execute(
            "INSERT OR REPLACE INTO store_meta (key, value) VALUES (?, ?)",
            [STORE_SET_VERSION_KEY, version.as_str()],
        )
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Upgraded store set from version {from} to {}", set.version());
    Ok(())
}
