//! Read-through cache queries over the local store
//!
//! A query reads the local store once when created, then again whenever the
//! bus reports a sync of its collection. Queries on realtime collections also
//! hold a mirror lease and re-read as soon as the mirror publishes. The store
//! is always the source; a pushed list only signals that it moved.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::events::{ListenerGuard, SyncEventBus, SyncEventKind};
use crate::models::{CollectionSpec, Record};
use crate::sync::{MirrorLease, MirroredRecords};

/// What a consumer renders: the cached data and whether the first read is
/// still pending.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub is_loading: bool,
}

impl<T> QueryState<T> {
    pub const fn loading() -> Self {
        Self {
            data: None,
            is_loading: true,
        }
    }

    pub const fn ready(data: Option<T>) -> Self {
        Self {
            data,
            is_loading: false,
        }
    }
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self::loading()
    }
}

/// Live view of a whole collection.
pub type CollectionQuery = Query<Vec<Record>>;

/// Live view of one record.
pub type DocumentQuery = Query<Record>;

#[async_trait]
trait QueryTarget: Send + Sync + 'static {
    type Data: Clone + Send + Sync + 'static;

    fn collection(&self) -> &str;

    async fn load(&self, store: &LocalStore) -> Result<Option<Self::Data>>;

    /// Data published when the very first read fails.
    fn fallback() -> Option<Self::Data>;
}

struct CollectionTarget {
    collection: String,
}

#[async_trait]
impl QueryTarget for CollectionTarget {
    type Data = Vec<Record>;

    fn collection(&self) -> &str {
        &self.collection
    }

    async fn load(&self, store: &LocalStore) -> Result<Option<Vec<Record>>> {
        Ok(Some(store.records(&self.collection).await?))
    }

    fn fallback() -> Option<Vec<Record>> {
        Some(Vec::new())
    }
}

struct DocumentTarget {
    collection: String,
    id: String,
}

#[async_trait]
impl QueryTarget for DocumentTarget {
    type Data = Record;

    fn collection(&self) -> &str {
        &self.collection
    }

    async fn load(&self, store: &LocalStore) -> Result<Option<Record>> {
        store.record(&self.collection, &self.id).await
    }

    fn fallback() -> Option<Record> {
        None
    }
}

/// A running read-through query. Dropping it stops the refresh task,
/// unregisters the bus listener and releases the mirror lease.
pub struct Query<T> {
    collection: String,
    state: watch::Receiver<QueryState<T>>,
    task: JoinHandle<()>,
    _listener: ListenerGuard,
    _lease: Option<MirrorLease>,
}

impl Query<Vec<Record>> {
    /// Query every record of `spec`'s collection.
    pub fn collection(
        store: LocalStore,
        bus: &SyncEventBus,
        spec: &CollectionSpec,
        lease: Option<MirrorLease>,
    ) -> Self {
        let target = CollectionTarget {
            collection: spec.name.clone(),
        };
        Self::spawn(target, store, bus, lease)
    }
}

impl Query<Record> {
    /// Query the record `id` of `spec`'s collection.
    pub fn document(
        store: LocalStore,
        bus: &SyncEventBus,
        spec: &CollectionSpec,
        id: impl Into<String>,
        lease: Option<MirrorLease>,
    ) -> Self {
        let target = DocumentTarget {
            collection: spec.name.clone(),
            id: id.into(),
        };
        Self::spawn(target, store, bus, lease)
    }
}

impl<T: Clone + Send + Sync + 'static> Query<T> {
    fn spawn<Q: QueryTarget<Data = T>>(
        target: Q,
        store: LocalStore,
        bus: &SyncEventBus,
        lease: Option<MirrorLease>,
    ) -> Self {
        let collection = target.collection().to_string();
        let (sender, state) = watch::channel(QueryState::loading());

        let refresh = Arc::new(Notify::new());
        let listener = {
            let refresh = Arc::clone(&refresh);
            let collection = collection.clone();
            bus.listen(SyncEventKind::Synced, move |event| {
                if event.concerns(&collection) {
                    refresh.notify_one();
                }
            })
        };
        // Lists published before this query existed are older than its
        // first read.
        let pushed = lease.as_ref().map(|lease| {
            let mut receiver = lease.subscribe();
            receiver.mark_unchanged();
            receiver
        });
        let task = tokio::spawn(drive(target, store, sender, refresh, pushed));

        Self {
            collection,
            state,
            task,
            _listener: listener,
            _lease: lease,
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn state(&self) -> QueryState<T> {
        self.state.borrow().clone()
    }

    pub fn data(&self) -> Option<T> {
        self.state.borrow().data.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    /// A receiver for state changes, for consumers that select over several.
    pub fn watch(&self) -> watch::Receiver<QueryState<T>> {
        self.state.clone()
    }

    /// Wait for the next state change; `false` once the query has stopped.
    pub async fn changed(&mut self) -> bool {
        self.state.changed().await.is_ok()
    }

    /// Wait until the state satisfies `predicate` and return it.
    pub async fn wait_until(
        &mut self,
        predicate: impl FnMut(&QueryState<T>) -> bool,
    ) -> Result<QueryState<T>> {
        let state = self.state.wait_for(predicate).await.map_err(|_| {
            Error::Subscription(format!("query on '{}' stopped", self.collection))
        })?;
        Ok(state.clone())
    }
}

impl<T> Drop for Query<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drive<Q: QueryTarget>(
    target: Q,
    store: LocalStore,
    sender: watch::Sender<QueryState<Q::Data>>,
    refresh: Arc<Notify>,
    mut pushed: Option<watch::Receiver<MirroredRecords>>,
) {
    reload(&target, &store, &sender).await;

    loop {
        tokio::select! {
            () = refresh.notified() => reload(&target, &store, &sender).await,
            published = next_pushed(pushed.as_mut()) => {
                if published {
                    reload(&target, &store, &sender).await;
                } else {
                    pushed = None;
                }
            }
        }
    }
}

/// Wait for the mirror to publish; `false` once the mirror is gone.
async fn next_pushed(receiver: Option<&mut watch::Receiver<MirroredRecords>>) -> bool {
    let Some(receiver) = receiver else {
        return std::future::pending().await;
    };
    receiver.changed().await.is_ok()
}

async fn reload<Q: QueryTarget>(
    target: &Q,
    store: &LocalStore,
    sender: &watch::Sender<QueryState<Q::Data>>,
) {
    match target.load(store).await {
        Ok(data) => {
            sender.send_replace(QueryState::ready(data));
        }
        Err(error) => {
            tracing::error!(
                "Failed to read '{}' from the local store: {error}",
                target.collection()
            );
            if sender.borrow().is_loading {
                sender.send_replace(QueryState::ready(Q::fallback()));
            }
        }
    }
}
