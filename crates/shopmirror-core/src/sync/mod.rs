//! Pull and push synchronization between the remote source and the local store
//!
//! Both paths reconcile whole-collection snapshots the same way: upsert every
//! remote record and delete local ids the snapshot no longer contains.

mod pull;
mod push;
mod reconcile;
mod scheduler;

pub use pull::{CollectionStatus, PullOutcome, PullSyncEngine, SyncReport, DEFAULT_PULL_INTERVAL};
pub use push::{MirrorLease, MirroredRecords, RealtimeMirror, ResubscribePolicy};
pub use reconcile::reconcile;
pub use scheduler::{SchedulerHandle, SyncScheduler, DEFAULT_SWEEP_INTERVAL};
