//! In-process remote source

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::watch;

use super::tree;
use super::{RemoteSource, SnapshotStream};
use crate::error::{Error, Result};
use crate::util::path_segments;

/// A realtime database held in memory.
///
/// Subscribers get the current value on attach and the new value after every
/// mutation that changes their path. Fetch counting and failure injection make
/// it the remote of choice for tests and offline runs.
pub struct MemoryRemote {
    tree: watch::Sender<Value>,
    fetches: Mutex<HashMap<String, usize>>,
    failing_fetches: Mutex<HashSet<String>>,
    failing_subscriptions: Mutex<HashSet<String>>,
    subscriptions: Mutex<HashMap<String, usize>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn path_key(path: &str) -> String {
    path_segments(path).join("/")
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::with_value(Value::Null)
    }

    pub fn with_value(value: Value) -> Self {
        let mut root = Value::Null;
        tree::set_at(&mut root, "/", value);
        let (tree, _) = watch::channel(root);
        Self {
            tree,
            fetches: Mutex::new(HashMap::new()),
            failing_fetches: Mutex::new(HashSet::new()),
            failing_subscriptions: Mutex::new(HashSet::new()),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Copy of the whole tree.
    pub fn snapshot(&self) -> Value {
        self.tree.borrow().clone()
    }

    /// Number of `fetch` calls made for `path`, failed ones included.
    pub fn fetch_count(&self, path: &str) -> usize {
        lock(&self.fetches)
            .get(&path_key(path))
            .copied()
            .unwrap_or_default()
    }

    /// Number of successful `subscribe` calls made for `path`.
    pub fn subscription_count(&self, path: &str) -> usize {
        lock(&self.subscriptions)
            .get(&path_key(path))
            .copied()
            .unwrap_or_default()
    }

    /// Number of live subscriber streams across all paths.
    pub fn active_subscribers(&self) -> usize {
        self.tree.receiver_count()
    }

    /// Make every `fetch` of `path` fail until [`Self::restore_fetches`].
    pub fn fail_fetches(&self, path: &str) {
        lock(&self.failing_fetches).insert(path_key(path));
    }

    pub fn restore_fetches(&self, path: &str) {
        lock(&self.failing_fetches).remove(&path_key(path));
    }

    /// Make every `subscribe` to `path` fail until [`Self::restore_subscriptions`].
    pub fn fail_subscriptions(&self, path: &str) {
        lock(&self.failing_subscriptions).insert(path_key(path));
    }

    pub fn restore_subscriptions(&self, path: &str) {
        lock(&self.failing_subscriptions).remove(&path_key(path));
    }

    fn mutate(&self, apply: impl FnOnce(&mut Value)) {
        self.tree.send_modify(apply);
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteSource for MemoryRemote {
    async fn fetch(&self, path: &str) -> Result<Option<Value>> {
        let key = path_key(path);
        *lock(&self.fetches).entry(key.clone()).or_default() += 1;

        if lock(&self.failing_fetches).contains(&key) {
            return Err(Error::Remote(format!("fetch of '{key}' failed")));
        }
        Ok(tree::value_at(&self.tree.borrow(), path).cloned())
    }

    async fn subscribe(&self, path: &str) -> Result<SnapshotStream> {
        let key = path_key(path);
        if lock(&self.failing_subscriptions).contains(&key) {
            return Err(Error::Subscription(format!("subscribe to '{key}' failed")));
        }
        *lock(&self.subscriptions).entry(key.clone()).or_default() += 1;

        let receiver = self.tree.subscribe();
        let stream = futures::stream::unfold(
            (receiver, None::<Option<Value>>),
            move |(mut receiver, last)| {
                let key = key.clone();
                async move {
                    loop {
                        if last.is_some() && receiver.changed().await.is_err() {
                            return None;
                        }
                        let current = tree::value_at(&receiver.borrow_and_update(), &key).cloned();
                        if last.as_ref() != Some(&current) {
                            return Some((Ok(current.clone()), (receiver, Some(current))));
                        }
                    }
                }
            },
        );
        Ok(stream.boxed())
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.mutate(|root| tree::set_at(root, path, value));
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        self.mutate(|root| tree::merge_at(root, path, fields));
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.mutate(|root| tree::set_at(root, path, Value::Null));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_reads_subtree_and_counts() {
        let remote = MemoryRemote::with_value(json!({"users": {"u1": {"name": "Ada"}}}));
        assert_eq!(
            remote.fetch("users").await.unwrap(),
            Some(json!({"u1": {"name": "Ada"}}))
        );
        assert_eq!(remote.fetch("/orders").await.unwrap(), None);
        assert_eq!(remote.fetch_count("/users/"), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_failure_injection() {
        let remote = MemoryRemote::new();
        remote.fail_fetches("orders");
        assert!(remote.fetch("orders").await.is_err());
        remote.restore_fetches("orders");
        assert!(remote.fetch("orders").await.is_ok());
        assert_eq!(remote.fetch_count("orders"), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscription_delivers_initial_and_changed_values() {
        let remote = MemoryRemote::new();
        let mut stream = remote.subscribe("users").await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), None);

        remote
            .set("users/u1", json!({"name": "Ada"}))
            .await
            .unwrap();
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            Some(json!({"u1": {"name": "Ada"}}))
        );

        remote.remove("users/u1").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscription_skips_unrelated_changes() {
        let remote = MemoryRemote::new();
        let mut stream = remote.subscribe("users").await.unwrap();
        stream.next().await.unwrap().unwrap();

        remote.set("orders/o1", json!({"total": 1})).await.unwrap();
        let Value::Object(fields) = json!({"name": "Grace"}) else {
            unreachable!()
        };
        remote.update("users/u2", fields).await.unwrap();

        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            Some(json!({"u2": {"name": "Grace"}}))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscribe_failure_injection() {
        let remote = MemoryRemote::new();
        remote.fail_subscriptions("users");
        assert!(matches!(
            remote.subscribe("users").await,
            Err(Error::Subscription(_))
        ));
        assert_eq!(remote.subscription_count("users"), 0);
    }
}
