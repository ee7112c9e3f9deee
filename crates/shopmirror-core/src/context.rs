//! Wiring of the local store, remote source, sync engines and cache queries

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use crate::cache::{CollectionQuery, DocumentQuery};
use crate::config::MirrorConfig;
use crate::db::{LocalStore, StoreManager};
use crate::error::Result;
use crate::events::SyncEventBus;
use crate::models::CollectionRegistry;
use crate::remote::RemoteSource;
use crate::sync::{
    CollectionStatus, PullOutcome, PullSyncEngine, RealtimeMirror, SchedulerHandle, SyncReport,
    SyncScheduler,
};

/// One mirrored database: everything consumers need to read and write it.
///
/// `start` begins periodic pull sweeps; queries can be created before or
/// after. Dropping the context stops the sweeps.
pub struct SyncContext {
    registry: Arc<CollectionRegistry>,
    remote: Arc<dyn RemoteSource>,
    store: LocalStore,
    bus: SyncEventBus,
    engine: PullSyncEngine,
    mirror: RealtimeMirror,
    sweep_interval: Duration,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl SyncContext {
    pub fn new(
        config: &MirrorConfig,
        remote: Arc<dyn RemoteSource>,
        store: LocalStore,
    ) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(config.registry()?);
        let bus = SyncEventBus::new();
        let engine = PullSyncEngine::new(
            Arc::clone(&remote),
            store.clone(),
            bus.clone(),
            Arc::clone(&registry),
        )
        .with_pull_interval(config.pull_interval());
        let mirror = RealtimeMirror::new(
            Arc::clone(&remote),
            store.clone(),
            bus.clone(),
            Arc::clone(&registry),
            config.resubscribe_policy(),
        );

        Ok(Self {
            registry,
            remote,
            store,
            bus,
            engine,
            mirror,
            sweep_interval: config.sweep_interval(),
            scheduler: Mutex::new(None),
        })
    }

    /// Open the configured local store and build a context on it.
    pub async fn open(config: &MirrorConfig, remote: Arc<dyn RemoteSource>) -> Result<Self> {
        config.validate()?;
        let stores = config.registry()?.store_set(config.store_version);
        let manager = StoreManager::new(config.store_location(), stores);
        let store = manager.open_or_get().await?;
        Self::new(config, remote, store)
    }

    fn scheduler(&self) -> MutexGuard<'_, Option<SchedulerHandle>> {
        self.scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start periodic sweeps; the first runs immediately. No-op when running.
    pub fn start(&self) {
        let mut scheduler = self.scheduler();
        if scheduler.as_ref().is_some_and(SchedulerHandle::is_running) {
            return;
        }
        tracing::info!(
            "Starting sync sweeps every {}s",
            self.sweep_interval.as_secs()
        );
        *scheduler = Some(SyncScheduler::spawn(
            self.engine.clone(),
            self.sweep_interval,
        ));
    }

    /// Stop periodic sweeps, waiting for an in-flight sweep to settle.
    pub async fn shutdown(&self) {
        let handle = self.scheduler().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
            tracing::info!("Stopped sync sweeps");
        }
    }

    pub fn is_running(&self) -> bool {
        self.scheduler()
            .as_ref()
            .is_some_and(SchedulerHandle::is_running)
    }

    pub fn registry(&self) -> &CollectionRegistry {
        &self.registry
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn bus(&self) -> &SyncEventBus {
        &self.bus
    }

    pub const fn engine(&self) -> &PullSyncEngine {
        &self.engine
    }

    pub const fn mirror(&self) -> &RealtimeMirror {
        &self.mirror
    }

    /// Live view of a collection; realtime collections attach the mirror.
    pub fn use_collection(&self, name: &str) -> Result<CollectionQuery> {
        let spec = self.registry.get(name)?;
        let lease = if spec.realtime {
            Some(self.mirror.attach(name)?)
        } else {
            None
        };
        Ok(CollectionQuery::collection(
            self.store.clone(),
            &self.bus,
            spec,
            lease,
        ))
    }

    /// Live view of one record; realtime collections attach the mirror.
    pub fn use_document(&self, name: &str, id: &str) -> Result<DocumentQuery> {
        let spec = self.registry.get(name)?;
        let lease = if spec.realtime {
            Some(self.mirror.attach(name)?)
        } else {
            None
        };
        Ok(DocumentQuery::document(
            self.store.clone(),
            &self.bus,
            spec,
            id,
            lease,
        ))
    }

    pub async fn sync_collection(&self, name: &str, force: bool) -> Result<PullOutcome> {
        self.engine.sync_collection(name, force).await
    }

    pub async fn sync_all(&self, force: bool) -> SyncReport {
        self.engine.sync_all(force).await
    }

    pub async fn sync_status(&self) -> Result<Vec<CollectionStatus>> {
        self.engine.sync_status().await
    }

    /// Remote path of record `id` in `collection`.
    pub fn record_path(&self, collection: &str, id: &str) -> Result<String> {
        let spec = self.registry.get(collection)?;
        Ok(format!(
            "{}/{id}",
            spec.remote_path().trim_end_matches('/')
        ))
    }

    /// Replace the value at `path` in the background. Failures are logged.
    pub fn set(&self, path: impl Into<String>, value: Value) -> JoinHandle<()> {
        let remote = Arc::clone(&self.remote);
        let path = path.into();
        tokio::spawn(async move {
            if let Err(error) = remote.set(&path, value).await {
                tracing::error!("Failed to set '{path}': {error}");
            }
        })
    }

    /// Merge `fields` into the value at `path` in the background. Failures
    /// are logged.
    pub fn update(&self, path: impl Into<String>, fields: Map<String, Value>) -> JoinHandle<()> {
        let remote = Arc::clone(&self.remote);
        let path = path.into();
        tokio::spawn(async move {
            if let Err(error) = remote.update(&path, fields).await {
                tracing::error!("Failed to update '{path}': {error}");
            }
        })
    }

    /// Delete the value at `path` in the background. Failures are logged.
    pub fn remove(&self, path: impl Into<String>) -> JoinHandle<()> {
        let remote = Arc::clone(&self.remote);
        let path = path.into();
        tokio::spawn(async move {
            if let Err(error) = remote.remove(&path).await {
                tracing::error!("Failed to remove '{path}': {error}");
            }
        })
    }
}
