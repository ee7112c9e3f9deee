//! Per-collection pull-sync bookkeeping

use serde::{Deserialize, Serialize};

/// When a collection was last pulled from the remote source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTimestamp {
    /// Collection name; the key in the sync metadata store
    pub collection: String,
    /// Epoch milliseconds
    pub timestamp: i64,
}

impl SyncTimestamp {
    pub fn new(collection: impl Into<String>, timestamp: i64) -> Self {
        Self {
            collection: collection.into(),
            timestamp,
        }
    }

    /// Milliseconds elapsed between this stamp and `now`.
    pub const fn age_millis(&self, now: i64) -> i64 {
        now.saturating_sub(self.timestamp)
    }

    /// Whether the stamp is younger than `interval_millis` at `now`.
    pub const fn is_fresh(&self, now: i64, interval_millis: i64) -> bool {
        self.age_millis(now) < interval_millis
    }
}
