//! Tombstone detection and upsert planning for one collection snapshot

use std::collections::{BTreeSet, HashSet};

use crate::db::WriteBatch;
use crate::models::Record;

/// Plan the writes that make a store hold exactly `remote`.
///
/// Local ids missing from the snapshot become deletions; every remote record
/// is upserted as-is (remote wins, no field merge).
pub fn reconcile(local_ids: &BTreeSet<String>, remote: Vec<Record>) -> WriteBatch {
    let remote_ids = remote
        .iter()
        .map(|record| record.id.as_str())
        .collect::<HashSet<_>>();
    let deletes = local_ids
        .iter()
        .filter(|id| !remote_ids.contains(id.as_str()))
        .cloned()
        .collect();

    WriteBatch {
        deletes,
        puts: remote.into_iter().map(Record::into_value).collect(),
        stamp: None,
    }
}
