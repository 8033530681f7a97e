//! Subscriber routes and topic fan-out.

use crate::protocol::ServerMessage;
use crate::types::{ConnectionId, TopicKey};
use crossbeam_channel::{Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Outbound route for one connection.
struct Route {
    sender: Sender<ServerMessage>,
    /// Topics this connection currently belongs to.
    topics: HashSet<TopicKey>,
}

impl Route {
    /// Try to send a message. Returns false if the route is dead
    /// (buffer full or transport gone).
    fn try_send(&self, message: ServerMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    routes: HashMap<ConnectionId, Route>,
    topics: HashMap<TopicKey, HashSet<ConnectionId>>,
}

impl RegistryInner {
    /// Remove a connection's route and every membership it holds.
    fn remove_connection(&mut self, id: ConnectionId) -> bool {
        let Some(route) = self.routes.remove(&id) else {
            return false;
        };
        for topic in &route.topics {
            if let Some(members) = self.topics.get_mut(topic) {
                members.remove(&id);
                if members.is_empty() {
                    self.topics.remove(topic);
                }
            }
        }
        true
    }
}

/// Concurrency-safe map of topic to subscriber set.
///
/// Join, leave, and publish may race from any number of threads; a single
/// lock over routes and memberships keeps each transition atomic per topic
/// (no lost updates, no duplicate delivery within one publish call).
pub struct TopicRegistry {
    inner: RwLock<RegistryInner>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Register a connection's outbound route. Must precede any join.
    pub fn register(&self, id: ConnectionId, sender: Sender<ServerMessage>) {
        let mut inner = self.inner.write();
        inner.routes.insert(
            id,
            Route {
                sender,
                topics: HashSet::new(),
            },
        );
    }

    /// Drop a connection's route and remove it from every topic.
    pub fn unregister(&self, id: ConnectionId) {
        self.inner.write().remove_connection(id);
    }

    /// Add a connection to a topic. Idempotent; returns false for an
    /// unregistered connection.
    pub fn join(&self, id: ConnectionId, topic: TopicKey) -> bool {
        let mut inner = self.inner.write();
        let Some(route) = inner.routes.get_mut(&id) else {
            return false;
        };
        route.topics.insert(topic.clone());
        inner.topics.entry(topic).or_default().insert(id);
        true
    }

    /// Remove a connection from a topic. Idempotent; empty topics are
    /// garbage-collected.
    pub fn leave(&self, id: ConnectionId, topic: &TopicKey) -> bool {
        let mut inner = self.inner.write();
        let Some(route) = inner.routes.get_mut(&id) else {
            return false;
        };
        route.topics.remove(topic);
        if let Some(members) = inner.topics.get_mut(topic) {
            members.remove(&id);
            if members.is_empty() {
                inner.topics.remove(topic);
            }
        }
        true
    }

    /// Deliver a message to every current subscriber of a topic.
    ///
    /// Publishing to an absent or empty topic is a defined no-op. Each
    /// delivery is independent: a dead subscriber is dropped from all topics
    /// and logged, never surfaced to the caller.
    pub fn publish(&self, topic: &TopicKey, message: ServerMessage) {
        let mut dead = Vec::new();
        {
            let inner = self.inner.read();
            let Some(members) = inner.topics.get(topic) else {
                debug!(%topic, "publish to topic with no subscribers");
                return;
            };
            for id in members {
                if let Some(route) = inner.routes.get(id) {
                    if !route.try_send(message.clone()) {
                        dead.push(*id);
                    }
                }
            }
        }
        self.drop_dead(dead);
    }

    /// Deliver a message to every registered connection.
    pub fn broadcast(&self, message: ServerMessage) {
        let mut dead = Vec::new();
        {
            let inner = self.inner.read();
            for (id, route) in inner.routes.iter() {
                if !route.try_send(message.clone()) {
                    dead.push(*id);
                }
            }
        }
        self.drop_dead(dead);
    }

    /// Send a message to a single connection.
    ///
    /// Returns false if the connection is unknown or its route is dead (the
    /// dead route is dropped here as well).
    pub fn send_to(&self, id: ConnectionId, message: ServerMessage) -> bool {
        let delivered = {
            let inner = self.inner.read();
            match inner.routes.get(&id) {
                Some(route) => route.try_send(message),
                None => return false,
            }
        };
        if !delivered {
            self.drop_dead(vec![id]);
        }
        delivered
    }

    /// Remove dead connections found during fan-out.
    fn drop_dead(&self, dead: Vec<ConnectionId>) {
        if dead.is_empty() {
            return;
        }
        let mut inner = self.inner.write();
        for id in dead {
            if inner.remove_connection(id) {
                warn!(connection = %id, "dropping unresponsive subscriber");
            }
        }
    }

    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.inner.read().routes.contains_key(&id)
    }

    pub fn connection_count(&self) -> usize {
        self.inner.read().routes.len()
    }

    pub fn topic_count(&self) -> usize {
        self.inner.read().topics.len()
    }

    pub fn subscriber_count(&self, topic: &TopicKey) -> usize {
        self.inner
            .read()
            .topics
            .get(topic)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    /// Topics a connection currently belongs to.
    pub fn topics_of(&self, id: ConnectionId) -> Option<HashSet<TopicKey>> {
        self.inner
            .read()
            .routes
            .get(&id)
            .map(|route| route.topics.clone())
    }
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EventEnvelope;
    use crate::types::FieldId;
    use crossbeam_channel::{bounded, Receiver};

    fn field_topic(id: &str) -> TopicKey {
        TopicKey::field(FieldId::from(id))
    }

    fn event_message(name: &str) -> ServerMessage {
        ServerMessage::Event {
            envelope: EventEnvelope {
                event: name.to_string(),
                data: serde_json::json!({}),
            },
        }
    }

    fn register(registry: &TopicRegistry, id: u64, buffer: usize) -> Receiver<ServerMessage> {
        let (tx, rx) = bounded(buffer);
        registry.register(ConnectionId(id), tx);
        rx
    }

    #[test]
    fn test_join_leave_membership() {
        let registry = TopicRegistry::new();
        let _rx = register(&registry, 1, 8);
        let topic = field_topic("F1");

        assert!(registry.join(ConnectionId(1), topic.clone()));
        assert_eq!(registry.subscriber_count(&topic), 1);

        // Idempotent join
        assert!(registry.join(ConnectionId(1), topic.clone()));
        assert_eq!(registry.subscriber_count(&topic), 1);

        assert!(registry.leave(ConnectionId(1), &topic));
        assert_eq!(registry.subscriber_count(&topic), 0);
    }

    #[test]
    fn test_empty_topics_are_collected() {
        let registry = TopicRegistry::new();
        let _rx = register(&registry, 1, 8);
        let topic = field_topic("F1");

        registry.join(ConnectionId(1), topic.clone());
        assert_eq!(registry.topic_count(), 1);

        registry.leave(ConnectionId(1), &topic);
        assert_eq!(registry.topic_count(), 0);
    }

    #[test]
    fn test_join_requires_registration() {
        let registry = TopicRegistry::new();
        assert!(!registry.join(ConnectionId(7), field_topic("F1")));
        assert_eq!(registry.topic_count(), 0);
    }

    #[test]
    fn test_publish_reaches_each_subscriber_once() {
        let registry = TopicRegistry::new();
        let rx1 = register(&registry, 1, 8);
        let rx2 = register(&registry, 2, 8);
        let topic = field_topic("F1");

        registry.join(ConnectionId(1), topic.clone());
        registry.join(ConnectionId(2), topic.clone());
        registry.publish(&topic, event_message("health_updated"));

        assert_eq!(rx1.len(), 1);
        assert_eq!(rx2.len(), 1);
    }

    #[test]
    fn test_publish_empty_topic_is_noop() {
        let registry = TopicRegistry::new();
        let rx = register(&registry, 1, 8);
        registry.join(ConnectionId(1), field_topic("F1"));

        registry.publish(&field_topic("F2"), event_message("health_updated"));
        assert!(rx.is_empty());
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn test_slow_subscriber_dropped_without_failing_others() {
        let registry = TopicRegistry::new();
        let slow_rx = register(&registry, 1, 1);
        let fast_rx = register(&registry, 2, 16);
        let topic = field_topic("F1");

        registry.join(ConnectionId(1), topic.clone());
        registry.join(ConnectionId(2), topic.clone());

        for _ in 0..5 {
            registry.publish(&topic, event_message("health_updated"));
        }

        // The slow connection filled its buffer and was removed everywhere.
        assert!(!registry.is_registered(ConnectionId(1)));
        assert_eq!(slow_rx.len(), 1);
        assert_eq!(fast_rx.len(), 5);
        assert_eq!(registry.subscriber_count(&topic), 1);
    }

    #[test]
    fn test_disconnected_receiver_dropped_on_send() {
        let registry = TopicRegistry::new();
        let rx = register(&registry, 1, 8);
        registry.join(ConnectionId(1), field_topic("F1"));
        drop(rx);

        registry.publish(&field_topic("F1"), event_message("health_updated"));
        assert!(!registry.is_registered(ConnectionId(1)));
        assert_eq!(registry.topic_count(), 0);
    }

    #[test]
    fn test_unregister_removes_all_memberships() {
        let registry = TopicRegistry::new();
        let _rx = register(&registry, 1, 8);
        registry.join(ConnectionId(1), field_topic("F1"));
        registry.join(ConnectionId(1), field_topic("F2"));

        registry.unregister(ConnectionId(1));
        assert_eq!(registry.topic_count(), 0);
        assert!(registry.topics_of(ConnectionId(1)).is_none());
    }

    #[test]
    fn test_broadcast_reaches_all_connections() {
        let registry = TopicRegistry::new();
        let rx1 = register(&registry, 1, 8);
        let rx2 = register(&registry, 2, 8);

        registry.broadcast(event_message("system"));
        assert_eq!(rx1.len(), 1);
        assert_eq!(rx2.len(), 1);
    }
}
