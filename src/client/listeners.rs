//! Listener registration and dispatch for client-side events.

use crate::protocol::DomainEvent;
use crate::types::{DisconnectReason, FieldId, Timestamp};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Events surfaced to client listeners.
#[derive(Clone, Debug)]
pub enum ClientEvent {
    /// Session established (initial connect or successful reconnect),
    /// emitted after the desired topic set has been replayed.
    Connected,
    /// Session ended.
    Disconnected { reason: DisconnectReason },
    /// Automatic reconnection gave up.
    ReconnectExhausted,
    /// Broker acknowledged a field join.
    Subscribed { field_id: FieldId },
    /// Broker acknowledged a field leave.
    Unsubscribed { field_id: FieldId },
    /// Heartbeat reply.
    Pong { timestamp: Timestamp },
    /// A typed domain event.
    Domain(DomainEvent),
    /// A wire event that failed to parse into a typed domain event.
    Unparsed { event: String },
}

impl ClientEvent {
    /// Listener key this event dispatches under.
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Connected => EventKind::Connected,
            ClientEvent::Disconnected { .. } => EventKind::Disconnected,
            ClientEvent::ReconnectExhausted => EventKind::ReconnectExhausted,
            ClientEvent::Subscribed { .. } => EventKind::Subscribed,
            ClientEvent::Unsubscribed { .. } => EventKind::Unsubscribed,
            ClientEvent::Pong { .. } => EventKind::Pong,
            ClientEvent::Domain(event) => match event {
                DomainEvent::HealthUpdated { .. } => EventKind::HealthUpdated,
                DomainEvent::HealthAlert { .. } => EventKind::HealthAlert,
                DomainEvent::RecommendationCreated { .. } => EventKind::RecommendationCreated,
                DomainEvent::YieldPredictionReady { .. } => EventKind::YieldPredictionReady,
                DomainEvent::System { .. } => EventKind::System,
            },
            ClientEvent::Unparsed { .. } => EventKind::Unparsed,
        }
    }
}

/// Listener registration key, one per event name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    ReconnectExhausted,
    Subscribed,
    Unsubscribed,
    Pong,
    HealthUpdated,
    HealthAlert,
    RecommendationCreated,
    YieldPredictionReady,
    System,
    Unparsed,
}

/// Identifier for one registered listener.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

impl fmt::Debug for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerId({})", self.0)
    }
}

/// Listener callback. Invoked outside all client locks, so callbacks may call
/// back into the client (including `on`/`off`).
pub type Callback = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Listener table supporting multiple independent listeners per event.
///
/// Registration and removal are safe at any time, including from UI teardown
/// while a dispatch is in flight.
#[derive(Default)]
pub struct EventListeners {
    inner: RwLock<HashMap<EventKind, HashMap<ListenerId, Callback>>>,
    next_id: AtomicU64,
}

impl EventListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind.
    pub fn on(&self, kind: EventKind, callback: Callback) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.inner.write().entry(kind).or_default().insert(id, callback);
        id
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut inner = self.inner.write();
        let Some(listeners) = inner.get_mut(&kind) else {
            return false;
        };
        let removed = listeners.remove(&id).is_some();
        if listeners.is_empty() {
            inner.remove(&kind);
        }
        removed
    }

    /// Dispatch an event to every listener registered for its kind.
    pub fn emit(&self, event: &ClientEvent) {
        // Callbacks run outside the lock: they may register or remove
        // listeners themselves.
        let callbacks: Vec<Callback> = {
            let inner = self.inner.read();
            inner
                .get(&event.kind())
                .map(|listeners| listeners.values().cloned().collect())
                .unwrap_or_default()
        };
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner
            .read()
            .get(&kind)
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }
}
