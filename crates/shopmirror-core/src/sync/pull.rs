//! Timestamp-gated full-collection pulls

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;

use crate::db::LocalStore;
use crate::error::Result;
use crate::events::{SyncEvent, SyncEventBus};
use crate::models::{CollectionRegistry, SyncTimestamp};
use crate::normalize::normalize;
use crate::remote::RemoteSource;
use crate::util::unix_millis_now;

use super::reconcile::reconcile;

/// Minimum age of a sync timestamp before a non-forced pull reads the remote.
pub const DEFAULT_PULL_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// What a single `sync_collection` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// The stored timestamp is still fresh; the remote was not read.
    Throttled,
    /// The remote had no data; only the timestamp was refreshed.
    Empty,
    /// The snapshot was reconciled into the local store.
    Synced { upserted: usize, deleted: usize },
}

/// Per-collection results of a `sync_all` sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: Vec<String>,
    pub throttled: Vec<String>,
    pub empty: Vec<String>,
    /// Collection name and error message
    pub failed: Vec<(String, String)>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, collection: &str, outcome: Result<PullOutcome>) {
        let collection = collection.to_string();
        match outcome {
            Ok(PullOutcome::Synced { .. }) => self.synced.push(collection),
            Ok(PullOutcome::Throttled) => self.throttled.push(collection),
            Ok(PullOutcome::Empty) => self.empty.push(collection),
            Err(error) => self.failed.push((collection, error.to_string())),
        }
    }
}

/// Last pull of one collection, as reported by `sync_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionStatus {
    pub collection: String,
    /// Epoch milliseconds of the last successful pull
    pub last_synced: Option<i64>,
    /// Records currently cached
    pub records: usize,
    /// Whether a non-forced pull would read the remote now
    pub stale: bool,
}

/// Pulls whole collections from the remote source into the local store.
#[derive(Clone)]
pub struct PullSyncEngine {
    remote: Arc<dyn RemoteSource>,
    store: LocalStore,
    bus: SyncEventBus,
    registry: Arc<CollectionRegistry>,
    pull_interval: Duration,
}

impl PullSyncEngine {
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        store: LocalStore,
        bus: SyncEventBus,
        registry: Arc<CollectionRegistry>,
    ) -> Self {
        Self {
            remote,
            store,
            bus,
            registry,
            pull_interval: DEFAULT_PULL_INTERVAL,
        }
    }

    #[must_use]
    pub const fn with_pull_interval(mut self, pull_interval: Duration) -> Self {
        self.pull_interval = pull_interval;
        self
    }

    pub fn registry(&self) -> &CollectionRegistry {
        &self.registry
    }

    pub const fn pull_interval(&self) -> Duration {
        self.pull_interval
    }

    fn interval_millis(&self) -> i64 {
        i64::try_from(self.pull_interval.as_millis()).unwrap_or(i64::MAX)
    }

    /// Pull one collection unless its timestamp is fresh and `force` is off.
    ///
    /// A fetch failure is returned without touching the stored timestamp, so
    /// the next sweep retries. Tombstones only cover ids that were stored
    /// before the fetch started; a record pushed while the fetch was in flight
    /// is newer than the snapshot and survives it.
    pub async fn sync_collection(&self, name: &str, force: bool) -> Result<PullOutcome> {
        let spec = self.registry.get(name)?;

        if !force {
            if let Some(stamp) = self.store.sync_timestamp(name).await? {
                if stamp.is_fresh(unix_millis_now(), self.interval_millis()) {
                    tracing::debug!(
                        "Skipping pull of '{name}': last synced {} ms ago",
                        stamp.age_millis(unix_millis_now())
                    );
                    return Ok(PullOutcome::Throttled);
                }
            }
        }

        let known_before_fetch = self.store.get_all_keys(name).await?;
        let raw = self.remote.fetch(spec.remote_path()).await?;
        let stamp = SyncTimestamp::new(name, unix_millis_now());

        let outcome = if raw.is_none() {
            self.store.set_sync_timestamp(&stamp).await?;
            PullOutcome::Empty
        } else {
            let records = normalize(spec, raw);
            let local_ids = self
                .store
                .get_all_keys(name)
                .await?
                .intersection(&known_before_fetch)
                .cloned()
                .collect();
            let mut batch = reconcile(&local_ids, records);
            let upserted = batch.puts.len();
            let deleted = batch.deletes.len();
            batch.stamp = Some(stamp);
            self.store.apply_batch(name, batch).await?;
            PullOutcome::Synced { upserted, deleted }
        };

        tracing::info!("Pulled '{name}': {outcome:?}");
        self.bus.emit(&SyncEvent::synced(name));
        Ok(outcome)
    }

    /// Pull every registered collection concurrently.
    ///
    /// Failures are logged per collection and never stop siblings.
    /// `FullSyncComplete` is emitted once every pull has settled.
    pub async fn sync_all(&self, force: bool) -> SyncReport {
        let names = self.registry.names().collect::<Vec<_>>();
        let outcomes = join_all(names.iter().map(|name| async move {
            let outcome = self.sync_collection(name, force).await;
            if let Err(error) = &outcome {
                tracing::error!("Failed to sync '{name}': {error}");
            }
            outcome
        }))
        .await;

        let mut report = SyncReport::default();
        for (name, outcome) in names.iter().zip(outcomes) {
            report.record(name, outcome);
        }

        self.bus.emit(&SyncEvent::FullSyncComplete);
        report
    }

    /// Last pull time and cache size of every registered collection.
    pub async fn sync_status(&self) -> Result<Vec<CollectionStatus>> {
        let now = unix_millis_now();
        let mut statuses = Vec::with_capacity(self.registry.len());
        for name in self.registry.names() {
            let stamp = self.store.sync_timestamp(name).await?;
            let records = self.store.get_all_keys(name).await?.len();
            statuses.push(CollectionStatus {
                collection: name.to_string(),
                last_synced: stamp.as_ref().map(|stamp| stamp.timestamp),
                records,
                stale: stamp.is_none_or(|stamp| !stamp.is_fresh(now, self.interval_millis())),
            });
        }
        Ok(statuses)
    }
}
