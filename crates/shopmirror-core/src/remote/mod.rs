//! Remote source collaborator: the hierarchical realtime database

mod memory;
mod realtime_db;
mod sse;
pub mod tree;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};

use crate::error::Result;

pub use memory::MemoryRemote;
pub use realtime_db::RealtimeDbClient;

/// Full values at a subscribed path, one item per remote change.
///
/// `Ok(None)` means the path is currently empty. An `Err` item reports a
/// transient problem; the stream may keep delivering afterwards.
pub type SnapshotStream = BoxStream<'static, Result<Option<Value>>>;

/// Path-addressable hierarchical key-value store.
///
/// Reads and subscriptions always carry the whole value at a path, never a
/// diff.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// One-shot read of the whole subtree at `path`.
    async fn fetch(&self, path: &str) -> Result<Option<Value>>;

    /// Subscribe to value changes of the subtree at `path`.
    async fn subscribe(&self, path: &str) -> Result<SnapshotStream>;

    /// Replace the value at `path`.
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// Merge `fields` into the value at `path`.
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()>;

    /// Delete the value at `path`.
    async fn remove(&self, path: &str) -> Result<()>;
}
