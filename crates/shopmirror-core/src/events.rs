//! In-process sync notifications between writers and cached readers

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Which collection a `Synced` event refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SyncTarget {
    Collection(String),
    /// Every collection
    All,
}

/// Events published by the sync engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// New data for a collection (or all of them) is in the local store.
    Synced(SyncTarget),
    /// A full `sync_all` sweep settled.
    FullSyncComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncEventKind {
    Synced,
    FullSyncComplete,
}

impl SyncEvent {
    pub fn synced(collection: impl Into<String>) -> Self {
        Self::Synced(SyncTarget::Collection(collection.into()))
    }

    pub const fn kind(&self) -> SyncEventKind {
        match self {
            Self::Synced(_) => SyncEventKind::Synced,
            Self::FullSyncComplete => SyncEventKind::FullSyncComplete,
        }
    }

    /// Whether readers of `collection` should refresh for this event.
    pub fn concerns(&self, collection: &str) -> bool {
        match self {
            Self::Synced(SyncTarget::All) => true,
            Self::Synced(SyncTarget::Collection(name)) => name == collection,
            Self::FullSyncComplete => false,
        }
    }
}

type Handler = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, SyncEventKind, Handler)>>,
}

impl BusInner {
    fn listeners(&self) -> MutexGuard<'_, Vec<(ListenerId, SyncEventKind, Handler)>> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(listener, _, _)| *listener != id);
        listeners.len() != before
    }
}

/// Synchronous publish/subscribe channel for [`SyncEvent`]s.
///
/// Delivery happens on the emitting task. Each emit runs every handler that
/// was registered when it started exactly once; there is no replay for
/// handlers registered later. Clones share the same listeners.
#[derive(Clone, Default)]
pub struct SyncEventBus {
    inner: Arc<BusInner>,
}

impl SyncEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        &self,
        kind: SyncEventKind,
        handler: impl Fn(&SyncEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners().push((id, kind, Arc::new(handler)));
        id
    }

    /// Remove a listener; returns whether it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.remove(id)
    }

    /// Register a listener that is removed when the guard drops.
    pub fn listen(
        &self,
        kind: SyncEventKind,
        handler: impl Fn(&SyncEvent) + Send + Sync + 'static,
    ) -> ListenerGuard {
        ListenerGuard {
            bus: Arc::downgrade(&self.inner),
            id: self.on(kind, handler),
        }
    }

    pub fn emit(&self, event: &SyncEvent) {
        let kind = event.kind();
        let handlers = self
            .inner
            .listeners()
            .iter()
            .filter(|(_, listener_kind, _)| *listener_kind == kind)
            .map(|(_, _, handler)| Arc::clone(handler))
            .collect::<Vec<_>>();

        for handler in handlers {
            handler(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners().len()
    }
}

/// Keeps a bus listener registered until dropped.
pub struct ListenerGuard {
    bus: Weak<BusInner>,
    id: ListenerId,
}

impl ListenerGuard {
    pub const fn id(&self) -> ListenerId {
        self.id
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&SyncEvent) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        (count, move |_: &SyncEvent| {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn emit_reaches_matching_kind_once() {
        let bus = SyncEventBus::new();
        let (synced, on_synced) = counter();
        let (complete, on_complete) = counter();
        bus.on(SyncEventKind::Synced, on_synced);
        bus.on(SyncEventKind::FullSyncComplete, on_complete);

        bus.emit(&SyncEvent::synced("orders"));
        assert_eq!(synced.load(Ordering::SeqCst), 1);
        assert_eq!(complete.load(Ordering::SeqCst), 0);

        bus.emit(&SyncEvent::FullSyncComplete);
        assert_eq!(complete.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_stops_delivery() {
        let bus = SyncEventBus::new();
        let (count, handler) = counter();
        let id = bus.on(SyncEventKind::Synced, handler);

        assert!(bus.off(id));
        assert!(!bus.off(id));
        bus.emit(&SyncEvent::synced("users"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn late_listener_sees_no_replay() {
        let bus = SyncEventBus::new();
        bus.emit(&SyncEvent::synced("users"));

        let (count, handler) = counter();
        bus.on(SyncEventKind::Synced, handler);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn guard_unregisters_on_drop() {
        let bus = SyncEventBus::new();
        let (count, handler) = counter();
        let guard = bus.listen(SyncEventKind::Synced, handler);
        assert_eq!(bus.listener_count(), 1);

        drop(guard);
        assert_eq!(bus.listener_count(), 0);
        bus.emit(&SyncEvent::synced("users"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_may_register_during_emit() {
        let bus = SyncEventBus::new();
        let (count, handler) = counter();
        let handler = Arc::new(handler);
        let nested_bus = bus.clone();
        bus.on(SyncEventKind::Synced, move |_| {
            let handler = Arc::clone(&handler);
            nested_bus.on(SyncEventKind::Synced, move |event| handler(event));
        });

        bus.emit(&SyncEvent::synced("orders"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count(), 2);
    }

    #[test]
    fn concerns_matches_collection_or_all() {
        assert!(SyncEvent::synced("orders").concerns("orders"));
        assert!(!SyncEvent::synced("orders").concerns("users"));
        assert!(SyncEvent::Synced(SyncTarget::All).concerns("users"));
        assert!(!SyncEvent::FullSyncComplete.concerns("users"));
    }
}
