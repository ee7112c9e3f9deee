//! Data models for shopmirror

mod collection;
mod record;
mod sync_timestamp;

pub use collection::{
    CollectionRegistry, CollectionSpec, Shape, SINGLETON_ID, SYNC_METADATA_STORE,
};
pub(crate) use collection::default_collections;
pub use record::Record;
pub use sync_timestamp::SyncTimestamp;
