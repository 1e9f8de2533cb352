//! Cache Events Module
//!
//! Observer registry for cache notifications. Listeners are plain callbacks
//! registered per event kind; async consumers can also take a broadcast
//! receiver.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::error::CacheError;
use crate::store::CacheValue;

const BROADCAST_CAPACITY: usize = 256;

// == Cache Event ==
/// A notification emitted by a manager or a store.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    Hit { key: String },
    Miss { key: String },
    Set { key: String, value: CacheValue },
    Delete { key: String },
    Evicted { key: String },
    Expire { key: String },
    Error { error: CacheError },
    Clear,
}

/// Discriminant of [`CacheEvent`], used to filter listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Hit,
    Miss,
    Set,
    Delete,
    Evicted,
    Expire,
    Error,
    Clear,
}

impl CacheEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CacheEvent::Hit { .. } => EventKind::Hit,
            CacheEvent::Miss { .. } => EventKind::Miss,
            CacheEvent::Set { .. } => EventKind::Set,
            CacheEvent::Delete { .. } => EventKind::Delete,
            CacheEvent::Evicted { .. } => EventKind::Evicted,
            CacheEvent::Expire { .. } => EventKind::Expire,
            CacheEvent::Error { .. } => EventKind::Error,
            CacheEvent::Clear => EventKind::Clear,
        }
    }

    /// Key the event refers to, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheEvent::Hit { key }
            | CacheEvent::Miss { key }
            | CacheEvent::Set { key, .. }
            | CacheEvent::Delete { key }
            | CacheEvent::Evicted { key }
            | CacheEvent::Expire { key } => Some(key),
            CacheEvent::Error { .. } | CacheEvent::Clear => None,
        }
    }
}

/// Handle returned by [`EventEmitter::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

struct Registration {
    id: ListenerId,
    kind: Option<EventKind>,
    listener: Listener,
}

struct EmitterInner {
    listeners: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<CacheEvent>,
}

// == Event Emitter ==
/// Shared listener registry. Clones refer to the same registry.
#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<EmitterInner>,
}

impl EventEmitter {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(EmitterInner {
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                sender,
            }),
        }
    }

    /// Registers a listener for one kind of event.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(listener))
    }

    /// Registers a listener for every event.
    pub fn on_any<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(listener))
    }

    fn register(&self, kind: Option<EventKind>, listener: Listener) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.write().push(Registration { id, kind, listener });
        id
    }

    /// Unregisters a listener. Returns false if the id was unknown.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|reg| reg.id != id);
        listeners.len() != before
    }

    // == Emit ==
    /// Delivers an event to matching listeners and broadcast subscribers.
    ///
    /// Listeners run synchronously on the caller's task. The registry lock is
    /// released before they run, so a listener may register or emit itself.
    pub fn emit(&self, event: &CacheEvent) {
        let kind = event.kind();
        let matching: Vec<Listener> = self
            .inner
            .listeners
            .read()
            .iter()
            .filter(|reg| reg.kind.map_or(true, |k| k == kind))
            .map(|reg| Arc::clone(&reg.listener))
            .collect();

        for listener in matching {
            listener(event);
        }

        // No receivers is the common case
        let _ = self.inner.sender.send(event.clone());
    }

    /// Receiver for every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.sender.subscribe()
    }

    // == Forwarding ==
    /// Re-emits every event of this emitter on `target`.
    ///
    /// Only a weak reference to `target` is held, so forwarding stops once
    /// every clone of `target` is dropped.
    pub fn forward_to(&self, target: &EventEmitter) -> ListenerId {
        self.forward_map(target, |event| Some(event.clone()))
    }

    /// Like [`forward_to`](Self::forward_to), rewriting or dropping events
    /// on the way. Events for which `map` returns None are not forwarded.
    pub fn forward_map<F>(&self, target: &EventEmitter, map: F) -> ListenerId
    where
        F: Fn(&CacheEvent) -> Option<CacheEvent> + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(&target.inner);
        self.on_any(move |event| {
            if let Some(inner) = weak.upgrade() {
                if let Some(mapped) = map(event) {
                    EventEmitter { inner }.emit(&mapped);
                }
            }
        })
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    pub fn clear_listeners(&self) {
        self.inner.listeners.write().clear();
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listener_count())
            .field("subscribers", &self.inner.sender.receiver_count())
            .finish()
    }
}
