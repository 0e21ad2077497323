//! Change notification streams
//!
//! [`EventHub`] delivers events published for a key to every [`Watcher`]
//! subscribed to that key. A watcher is an infinite stream: `next()` only
//! returns `None` once the hub has been closed. Dropping a watcher
//! unsubscribes it, so every exit path of a consuming loop releases its
//! subscriptions.

use crate::domain::{RotationChange, Tag, TaskEvent};
use dashmap::DashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

struct HubInner<K, E>
where
    K: Eq + Hash,
{
    name: &'static str,
    subscribers: DashMap<K, Vec<(u64, mpsc::UnboundedSender<E>)>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// Keyed publish/subscribe hub
pub struct EventHub<K, E>
where
    K: Eq + Hash,
{
    inner: Arc<HubInner<K, E>>,
}

impl<K, E> Clone for EventHub<K, E>
where
    K: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<K, E> fmt::Debug for EventHub<K, E>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("name", &self.inner.name)
            .field("keys", &self.inner.subscribers.len())
            .finish()
    }
}

impl<K, E> EventHub<K, E>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    E: Clone + Send + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(HubInner {
                name,
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to events for `key`.
    ///
    /// Subscribing to a closed hub yields a watcher that ends immediately.
    pub fn subscribe(&self, key: K) -> Watcher<K, E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if !self.inner.closed.load(Ordering::Acquire) {
            self.inner.subscribers.entry(key.clone()).or_default().push((id, tx));
            trace!(hub = self.inner.name, key = ?key, subscriber = id, "Watcher subscribed");
        }
        Watcher { hub: Arc::clone(&self.inner), key, id, rx }
    }

    /// Deliver `event` to every subscriber of `key`, returning how many
    /// watchers received it.
    pub fn publish(&self, key: &K, event: E) -> usize {
        let mut delivered = 0;
        if let Some(mut subscribers) = self.inner.subscribers.get_mut(key) {
            subscribers.retain(|(_, tx)| {
                if tx.send(event.clone()).is_ok() {
                    delivered += 1;
                    true
                } else {
                    false
                }
            });
        }
        debug!(hub = self.inner.name, key = ?key, delivered, "Published change");
        delivered
    }

    /// Close the hub, ending every current and future watcher.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.subscribers.clear();
    }

    /// Number of live subscriptions for `key`.
    pub fn subscriber_count(&self, key: &K) -> usize {
        self.inner.subscribers.get(key).map(|s| s.len()).unwrap_or(0)
    }
}

/// A subscription to one key of an [`EventHub`]
pub struct Watcher<K, E>
where
    K: Eq + Hash,
{
    hub: Arc<HubInner<K, E>>,
    key: K,
    id: u64,
    rx: mpsc::UnboundedReceiver<E>,
}

impl<K, E> Watcher<K, E>
where
    K: Eq + Hash,
{
    /// Wait for the next event; `None` means the stream has closed.
    pub async fn next(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Take every event already queued without waiting.
    pub fn drain_pending(&mut self) -> Vec<E> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K, E> Drop for Watcher<K, E>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        let id = self.id;
        let now_empty = match self.hub.subscribers.get_mut(&self.key) {
            Some(mut subscribers) => {
                subscribers.retain(|(sub_id, _)| *sub_id != id);
                subscribers.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.hub.subscribers.remove_if(&self.key, |_, subscribers| subscribers.is_empty());
        }
        trace!(hub = self.hub.name, subscriber = id, "Watcher released");
    }
}

/// Key for scheduled-task notifications
pub type OwnerKey = (String, Tag);

/// The notification streams shared by the store, the services and the loops
#[derive(Debug, Clone)]
pub struct Notifier {
    /// Model config changed, keyed by model uuid
    pub model_config: EventHub<String, ()>,
    /// A migration task was scheduled, keyed by (model uuid, owner)
    pub tasks_scheduled: EventHub<OwnerKey, ()>,
    /// A migration task failed, keyed by model uuid
    pub tasks_failed: EventHub<String, TaskEvent>,
    /// A migration task completed, keyed by model uuid
    pub tasks_completed: EventHub<String, TaskEvent>,
    /// Backend token rotation schedule changed
    pub backend_rotation: EventHub<(), RotationChange>,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            model_config: EventHub::new("model-config"),
            tasks_scheduled: EventHub::new("migration-tasks-scheduled"),
            tasks_failed: EventHub::new("migration-tasks-failed"),
            tasks_completed: EventHub::new("migration-tasks-completed"),
            backend_rotation: EventHub::new("backend-rotation"),
        }
    }

    /// Close every stream; consuming loops observe closure and stop.
    pub fn close_all(&self) {
        self.model_config.close();
        self.tasks_scheduled.close();
        self.tasks_failed.close();
        self.tasks_completed.close();
        self.backend_rotation.close();
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
