//! shopmirror-core - Offline-first cache of a realtime shop database
//!
//! Mirrors a hierarchical realtime database into a local libSQL store and
//! serves live read-through views of it. Two paths keep the store fresh:
//! periodic timestamp-gated pulls and per-collection realtime subscriptions.
//! Both publish to a [`SyncEventBus`] that cache queries listen on.

pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod normalize;
pub mod remote;
pub mod sync;
pub mod util;

pub use cache::{CollectionQuery, DocumentQuery, Query, QueryState};
pub use config::MirrorConfig;
pub use context::SyncContext;
pub use error::{Error, Result};
pub use events::{SyncEvent, SyncEventBus, SyncTarget};
pub use models::{CollectionRegistry, CollectionSpec, Record, Shape};
pub use remote::{MemoryRemote, RealtimeDbClient, RemoteSource};
