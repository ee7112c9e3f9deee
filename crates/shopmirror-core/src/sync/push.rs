//! Realtime mirror: subscription-driven reconciliation of single collections

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::db::LocalStore;
use crate::error::Result;
use crate::events::{SyncEvent, SyncEventBus};
use crate::models::{CollectionRegistry, CollectionSpec, Record};
use crate::normalize::normalize;
use crate::remote::RemoteSource;

use super::reconcile::reconcile;

/// Latest list published by a mirror; `None` until the first snapshot lands.
pub type MirroredRecords = Option<Vec<Record>>;

/// How a mirror resubscribes after its subscription fails or ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResubscribePolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failures that open the breaker
    pub breaker_threshold: u32,
    /// Pause while the breaker is open
    pub breaker_cooldown: Duration,
}

impl Default for ResubscribePolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            breaker_threshold: 5,
            breaker_cooldown: Duration::from_secs(300),
        }
    }
}

impl ResubscribePolicy {
    pub const fn breaker_open(&self, consecutive_failures: u32) -> bool {
        consecutive_failures >= self.breaker_threshold
    }

    /// Exponential delay without jitter, capped at `max_delay`.
    pub fn backoff(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1 << exponent)
            .min(self.max_delay)
    }

    /// Wait before the next subscribe attempt: the cooldown while the breaker
    /// is open, otherwise the backoff plus up to 20% random jitter.
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        if self.breaker_open(consecutive_failures) {
            return self.breaker_cooldown;
        }
        let backoff = self.backoff(consecutive_failures);
        let jitter_cap = u64::try_from(backoff.as_millis() / 5).unwrap_or(u64::MAX);
        let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
        backoff + Duration::from_millis(jitter)
    }
}

struct MirrorEntry {
    receiver: watch::Receiver<MirroredRecords>,
    task: JoinHandle<()>,
    leases: usize,
}

struct MirrorInner {
    remote: Arc<dyn RemoteSource>,
    store: LocalStore,
    bus: SyncEventBus,
    registry: Arc<CollectionRegistry>,
    policy: ResubscribePolicy,
    entries: Mutex<HashMap<String, MirrorEntry>>,
}

impl MirrorInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, MirrorEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, collection: &str) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(collection) else {
            return;
        };
        entry.leases = entry.leases.saturating_sub(1);
        if entry.leases == 0 {
            if let Some(entry) = entries.remove(collection) {
                entry.task.abort();
                tracing::debug!("Stopped realtime mirror for '{collection}'");
            }
        }
    }
}

impl Drop for MirrorInner {
    fn drop(&mut self) {
        for entry in self.entries().values() {
            entry.task.abort();
        }
    }
}

/// Keeps one remote subscription per collection alive while leased.
///
/// The first [`RealtimeMirror::attach`] for a collection spawns its mirror
/// task; dropping the last [`MirrorLease`] stops it. Snapshots of one
/// collection are reconciled one at a time, in delivery order.
#[derive(Clone)]
pub struct RealtimeMirror {
    inner: Arc<MirrorInner>,
}

impl RealtimeMirror {
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        store: LocalStore,
        bus: SyncEventBus,
        registry: Arc<CollectionRegistry>,
        policy: ResubscribePolicy,
    ) -> Self {
        Self {
            inner: Arc::new(MirrorInner {
                remote,
                store,
                bus,
                registry,
                policy,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Lease the mirror of `collection`, starting it if needed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach(&self, collection: &str) -> Result<MirrorLease> {
        let spec = self.inner.registry.get(collection)?.clone();
        let mut entries = self.inner.entries();
        let entry = entries.entry(spec.name.clone()).or_insert_with(|| {
            let (sender, receiver) = watch::channel(None);
            let worker = MirrorWorker {
                remote: Arc::clone(&self.inner.remote),
                store: self.inner.store.clone(),
                bus: self.inner.bus.clone(),
                policy: self.inner.policy,
                spec,
                sender,
            };
            tracing::debug!("Starting realtime mirror for '{collection}'");
            MirrorEntry {
                receiver,
                task: tokio::spawn(worker.run()),
                leases: 0,
            }
        });
        entry.leases += 1;

        Ok(MirrorLease {
            mirror: Arc::downgrade(&self.inner),
            collection: collection.to_string(),
            receiver: entry.receiver.clone(),
        })
    }

    /// Number of live leases on `collection`.
    pub fn lease_count(&self, collection: &str) -> usize {
        self.inner
            .entries()
            .get(collection)
            .map_or(0, |entry| entry.leases)
    }

    /// Collections with a running mirror.
    pub fn active_collections(&self) -> Vec<String> {
        let mut names = self.inner.entries().keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }
}

/// A consumer's hold on a collection mirror.
pub struct MirrorLease {
    mirror: Weak<MirrorInner>,
    collection: String,
    receiver: watch::Receiver<MirroredRecords>,
}

impl MirrorLease {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The most recently published list.
    pub fn latest(&self) -> MirroredRecords {
        self.receiver.borrow().clone()
    }

    /// A receiver for published lists, independent of this lease.
    pub fn subscribe(&self) -> watch::Receiver<MirroredRecords> {
        self.receiver.clone()
    }
}

impl Drop for MirrorLease {
    fn drop(&mut self) {
        if let Some(mirror) = self.mirror.upgrade() {
            mirror.release(&self.collection);
        }
    }
}

struct MirrorWorker {
    remote: Arc<dyn RemoteSource>,
    store: LocalStore,
    bus: SyncEventBus,
    policy: ResubscribePolicy,
    spec: CollectionSpec,
    sender: watch::Sender<MirroredRecords>,
}

impl MirrorWorker {
    async fn run(self) {
        let name = self.spec.name.as_str();
        let mut failures = 0_u32;

        loop {
            match self.remote.subscribe(self.spec.remote_path()).await {
                Ok(mut snapshots) => {
                    while let Some(snapshot) = snapshots.next().await {
                        match snapshot {
                            Ok(raw) => {
                                failures = 0;
                                if let Err(error) = self.apply(raw).await {
                                    tracing::error!(
                                        "Failed to apply realtime snapshot for '{name}': {error}"
                                    );
                                }
                            }
                            Err(error) => {
                                tracing::warn!("Realtime snapshot error for '{name}': {error}");
                            }
                        }
                    }
                    failures = failures.saturating_add(1);
                    tracing::warn!("Realtime subscription for '{name}' ended");
                }
                Err(error) => {
                    failures = failures.saturating_add(1);
                    tracing::warn!("Failed to subscribe to '{name}': {error}");
                }
            }

            let delay = self.policy.delay(failures);
            if self.policy.breaker_open(failures) {
                tracing::warn!(
                    "Realtime mirror for '{name}' paused for {}s after {failures} failures",
                    delay.as_secs()
                );
            } else {
                tracing::debug!("Resubscribing to '{name}' in {} ms", delay.as_millis());
            }
            tokio::time::sleep(delay).await;
        }
    }

    /// Reconcile one snapshot, then publish the stored list.
    async fn apply(&self, raw: Option<Value>) -> Result<()> {
        let name = self.spec.name.as_str();
        let records = normalize(&self.spec, raw);
        let local_ids = self.store.get_all_keys(name).await?;
        let batch = reconcile(&local_ids, records);
        if !batch.is_empty() {
            tracing::debug!(
                "Realtime '{name}': {} upserts, {} deletes",
                batch.puts.len(),
                batch.deletes.len()
            );
            self.store.apply_batch(name, batch).await?;
        }

        let stored = self.store.records(name).await?;
        self.sender.send_replace(Some(stored));
        self.bus.emit(&SyncEvent::synced(name));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SyncEventKind;
    use crate::models::Shape;
    use crate::remote::MemoryRemote;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        remote: Arc<MemoryRemote>,
        store: LocalStore,
        bus: SyncEventBus,
        mirror: RealtimeMirror,
    }

    async fn fixture(value: Value, policy: ResubscribePolicy) -> Fixture {
        let registry = Arc::new(
            CollectionRegistry::new(vec![
                CollectionSpec::new("orders", Shape::Hierarchical { depth: 3 }).realtime(),
                CollectionSpec::new("users", Shape::Flat).realtime(),
            ])
            .unwrap(),
        );
        let remote = Arc::new(MemoryRemote::with_value(value));
        let store = LocalStore::open_in_memory(registry.store_set(1))
            .await
            .unwrap();
        let bus = SyncEventBus::new();
        let mirror = RealtimeMirror::new(
            remote.clone(),
            store.clone(),
            bus.clone(),
            registry,
            policy,
        );
        Fixture {
            remote,
            store,
            bus,
            mirror,
        }
    }

    fn fast_policy() -> ResubscribePolicy {
        ResubscribePolicy {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            breaker_threshold: 100,
            breaker_cooldown: Duration::from_millis(50),
        }
    }

    async fn next_list(receiver: &mut watch::Receiver<MirroredRecords>) -> Vec<Record> {
        let list = tokio::time::timeout(
            Duration::from_secs(5),
            receiver.wait_for(Option::is_some),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        list.unwrap()
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records.iter().map(|record| record.id.as_str()).collect()
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = ResubscribePolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
        assert_eq!(policy.backoff(40), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_a_fifth() {
        let policy = ResubscribePolicy::default();
        for _ in 0..50 {
            let delay = policy.delay(3);
            assert!(delay >= Duration::from_secs(4));
            assert!(delay <= Duration::from_millis(4_800));
        }
    }

    #[test]
    fn breaker_opens_at_threshold() {
        let policy = ResubscribePolicy::default();
        assert!(!policy.breaker_open(4));
        assert!(policy.breaker_open(5));
        assert_eq!(policy.delay(5), Duration::from_secs(300));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn snapshots_reconcile_store_and_publish() {
        let fx = fixture(json!({"users": {"u1": {"name": "Ada"}}}), fast_policy()).await;
        fx.store
            .put("users", &json!({"id": "stale", "name": "Gone"}))
            .await
            .unwrap();

        let lease = fx.mirror.attach("users").unwrap();
        let mut receiver = lease.subscribe();
        assert_eq!(ids(&next_list(&mut receiver).await), vec!["u1"]);
        assert_eq!(
            fx.store.get_all_keys("users").await.unwrap(),
            ["u1".to_string()].into_iter().collect()
        );

        fx.remote
            .set("users/u2", json!({"name": "Grace"}))
            .await
            .unwrap();
        receiver.changed().await.unwrap();
        let list = receiver.borrow_and_update().clone().unwrap();
        assert_eq!(ids(&list), vec!["u1", "u2"]);

        fx.remote.remove("users").await.unwrap();
        receiver.changed().await.unwrap();
        assert_eq!(receiver.borrow_and_update().clone(), Some(Vec::new()));
        assert!(fx.store.get_all("users").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reapplying_a_snapshot_leaves_store_unchanged() {
        let fx = fixture(Value::Null, fast_policy()).await;
        let (sender, receiver) = watch::channel(None);
        let worker = MirrorWorker {
            remote: fx.remote.clone(),
            store: fx.store.clone(),
            bus: fx.bus.clone(),
            policy: fast_policy(),
            spec: CollectionSpec::new("users", Shape::Flat).realtime(),
            sender,
        };
        let snapshot = json!({"u1": {"name": "Ada"}, "u2": {"name": "Grace"}});

        worker.apply(Some(snapshot.clone())).await.unwrap();
        let first = fx.store.get_all("users").await.unwrap();
        worker.apply(Some(snapshot)).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(fx.store.get_all("users").await.unwrap(), first);
        let published = receiver.borrow().clone().unwrap();
        assert_eq!(ids(&published), vec!["u1", "u2"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn each_snapshot_emits_synced() {
        let fx = fixture(json!({"users": {"u1": {"name": "Ada"}}}), fast_policy()).await;
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        fx.bus.on(SyncEventKind::Synced, move |event| {
            if event.concerns("users") {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        let lease = fx.mirror.attach("users").unwrap();
        next_list(&mut lease.subscribe()).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while count.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn leases_share_one_subscription() {
        let fx = fixture(json!({"users": {"u1": {"name": "Ada"}}}), fast_policy()).await;

        let first = fx.mirror.attach("users").unwrap();
        let second = fx.mirror.attach("users").unwrap();
        assert_eq!(fx.mirror.lease_count("users"), 2);
        next_list(&mut second.subscribe()).await;
        assert_eq!(fx.remote.subscription_count("users"), 1);

        drop(first);
        assert_eq!(fx.mirror.active_collections(), vec!["users".to_string()]);
        drop(second);
        assert!(fx.mirror.active_collections().is_empty());
        assert_eq!(fx.mirror.lease_count("users"), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn last_lease_drop_closes_the_subscription() {
        let fx = fixture(json!({"users": {"u1": {"name": "Ada"}}}), fast_policy()).await;
        let lease = fx.mirror.attach("users").unwrap();
        next_list(&mut lease.subscribe()).await;
        assert_eq!(fx.remote.active_subscribers(), 1);

        drop(lease);
        tokio::time::timeout(Duration::from_secs(5), async {
            while fx.remote.active_subscribers() != 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_subscribe_is_retried() {
        let fx = fixture(json!({"users": {"u1": {"name": "Ada"}}}), fast_policy()).await;
        fx.remote.fail_subscriptions("users");

        let lease = fx.mirror.attach("users").unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(lease.latest(), None);

        fx.remote.restore_subscriptions("users");
        assert_eq!(ids(&next_list(&mut lease.subscribe()).await), vec!["u1"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn hierarchical_snapshot_is_normalized() {
        let fx = fixture(
            json!({"orders": {"2024": {"06": {"01": {
                "o1": {"createdAt": "2024-06-01T00:00:00Z", "total": 100}
            }}}}}),
            fast_policy(),
        )
        .await;

        let lease = fx.mirror.attach("orders").unwrap();
        let list = next_list(&mut lease.subscribe()).await;
        assert_eq!(
            list.into_iter().map(Record::into_value).collect::<Vec<_>>(),
            vec![json!({"id": "o1", "createdAt": "2024-06-01T00:00:00Z", "total": 100})]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_collection_cannot_be_attached() {
        let fx = fixture(Value::Null, fast_policy()).await;
        assert!(fx.mirror.attach("reports").is_err());
    }
}
