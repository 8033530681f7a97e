//! Gateway connection handling.

use crate::error::{RealtimeError, Result};
use crate::gateway::Authenticator;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::TopicRegistry;
use crate::types::{ConnectionId, DisconnectReason, Identity, Timestamp, TopicKey, UserId};
use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Gateway configuration.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Expected interval between client heartbeats.
    pub heartbeat_interval: Duration,

    /// Missed heartbeat intervals tolerated before a forced disconnect.
    pub missed_heartbeat_limit: u32,

    /// Outbound buffer per connection before the subscriber is dropped.
    pub outbound_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(25),
            missed_heartbeat_limit: 2,
            outbound_buffer: 1000,
        }
    }
}

/// Server-side connection state. Identity is fixed at handshake; only the
/// liveness clock moves.
struct Connection {
    identity: Identity,
    last_seen: Instant,
}

/// Accepts connections, authenticates them, and bridges inbound messages to
/// the topic registry.
pub struct Gateway {
    config: GatewayConfig,
    auth: Arc<dyn Authenticator>,
    registry: Arc<TopicRegistry>,
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    next_id: AtomicU64,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        auth: Arc<dyn Authenticator>,
        registry: Arc<TopicRegistry>,
    ) -> Self {
        Self {
            config,
            auth,
            registry,
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Authenticate a handshake and admit the connection.
    ///
    /// The credential is validated before any membership exists; a rejected
    /// connection never enters the registry. On success the connection is
    /// auto-joined to its personal `user:{id}` topic.
    pub fn connect(
        &self,
        credential: &str,
        outbound: Sender<ServerMessage>,
    ) -> Result<ConnectionId> {
        let identity = self.auth.authenticate(credential).map_err(|e| {
            warn!(error = %e, "handshake rejected");
            e
        })?;

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.registry.register(id, outbound);
        self.registry
            .join(id, TopicKey::user(identity.user_id.clone()));
        self.connections.write().insert(
            id,
            Connection {
                identity: identity.clone(),
                last_seen: Instant::now(),
            },
        );

        info!(connection = %id, user = %identity.user_id, email = %identity.email, "client connected");
        Ok(id)
    }

    /// Process one inbound message. Unknown connections are logged and
    /// ignored (their transport is already gone).
    pub fn handle_message(&self, id: ConnectionId, message: ClientMessage) {
        if !self.touch(id) {
            warn!(connection = %id, "message from unknown connection");
            return;
        }

        match message {
            ClientMessage::SubscribeField { field_id } => {
                let topic = TopicKey::field(field_id.clone());
                self.registry.join(id, topic.clone());
                debug!(connection = %id, %topic, "field subscribed");
                self.reply(id, ServerMessage::Subscribed { field_id });
            }
            ClientMessage::UnsubscribeField { field_id } => {
                let topic = TopicKey::field(field_id.clone());
                self.registry.leave(id, &topic);
                debug!(connection = %id, %topic, "field unsubscribed");
                self.reply(id, ServerMessage::Unsubscribed { field_id });
            }
            ClientMessage::Ping => {
                self.reply(
                    id,
                    ServerMessage::Pong {
                        timestamp: Timestamp::now(),
                    },
                );
            }
        }
    }

    /// Tear down a connection and release everything it held.
    ///
    /// Removal covers every topic the connection joined; other subscribers
    /// are not told about the departure.
    pub fn disconnect(&self, id: ConnectionId, reason: DisconnectReason) {
        let removed = self.connections.write().remove(&id);
        self.registry.unregister(id);
        if let Some(conn) = removed {
            info!(connection = %id, user = %conn.identity.user_id, ?reason, "client disconnected");
        }
    }

    /// Drop connections whose heartbeats stopped, and reap bookkeeping for
    /// connections the registry already dropped during fan-out.
    pub fn expire_idle(&self) {
        let deadline = self.config.heartbeat_interval * self.config.missed_heartbeat_limit;
        let now = Instant::now();

        let mut idle = Vec::new();
        let mut stale = Vec::new();
        {
            let connections = self.connections.read();
            for (id, conn) in connections.iter() {
                if !self.registry.is_registered(*id) {
                    stale.push(*id);
                } else if now.duration_since(conn.last_seen) > deadline {
                    idle.push(*id);
                }
            }
        }
        for id in stale {
            self.disconnect(id, DisconnectReason::TransportError);
        }
        for id in idle {
            self.disconnect(id, DisconnectReason::HeartbeatTimeout);
        }
    }

    /// Spawn a background thread running [`Gateway::expire_idle`] every
    /// heartbeat interval. The sweep stops when the handle is dropped.
    pub fn start_sweeper(self: Arc<Self>) -> SweeperHandle {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let gateway = Arc::clone(&self);
        let interval = gateway.config.heartbeat_interval;
        let thread = thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => gateway.expire_idle(),
            }
        });
        SweeperHandle {
            stop: stop_tx,
            thread: Some(thread),
        }
    }

    /// Identity bound to a connection at handshake time.
    pub fn identity(&self, id: ConnectionId) -> Result<Identity> {
        self.connections
            .read()
            .get(&id)
            .map(|conn| conn.identity.clone())
            .ok_or(RealtimeError::ConnectionNotFound(id))
    }

    /// Connections currently held by a user.
    pub fn connections_for(&self, user_id: &UserId) -> Vec<ConnectionId> {
        self.connections
            .read()
            .iter()
            .filter(|(_, conn)| &conn.identity.user_id == user_id)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Refresh the liveness clock. Returns false for unknown connections.
    fn touch(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.write();
        match connections.get_mut(&id) {
            Some(conn) => {
                conn.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Acknowledge back to one connection; a dead route triggers teardown.
    fn reply(&self, id: ConnectionId, message: ServerMessage) {
        if !self.registry.send_to(id, message) {
            self.disconnect(id, DisconnectReason::TransportError);
        }
    }
}

/// Drop guard for the heartbeat sweep thread.
pub struct SweeperHandle {
    stop: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::TokenDirectory;
    use crate::protocol::EventEnvelope;
    use crate::types::FieldId;
    use crossbeam_channel::Receiver;

    fn setup(config: GatewayConfig) -> (Arc<Gateway>, Arc<TopicRegistry>, Arc<TokenDirectory>) {
        let registry = Arc::new(TopicRegistry::new());
        let auth = Arc::new(TokenDirectory::new());
        auth.insert(
            "tok-1",
            Identity {
                user_id: UserId::from("u-1"),
                email: "grower@example.com".to_string(),
            },
        );
        let gateway = Arc::new(Gateway::new(config, auth.clone(), registry.clone()));
        (gateway, registry, auth)
    }

    fn admit(gateway: &Gateway) -> (ConnectionId, Receiver<ServerMessage>) {
        let (tx, rx) = bounded(64);
        let id = gateway.connect("tok-1", tx).unwrap();
        (id, rx)
    }

    #[test]
    fn test_connect_auto_joins_user_topic() {
        let (gateway, registry, _) = setup(GatewayConfig::default());
        let (id, _rx) = admit(&gateway);

        let user_topic = TopicKey::user(UserId::from("u-1"));
        assert_eq!(registry.subscriber_count(&user_topic), 1);
        assert_eq!(gateway.identity(id).unwrap().user_id, UserId::from("u-1"));
    }

    #[test]
    fn test_rejected_handshake_never_enters_registry() {
        let (gateway, registry, _) = setup(GatewayConfig::default());
        let (tx, _rx) = bounded(64);

        let result = gateway.connect("bad-token", tx);
        assert!(matches!(
            result,
            Err(RealtimeError::AuthenticationFailed(_))
        ));
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(gateway.connection_count(), 0);
    }

    #[test]
    fn test_subscribe_and_unsubscribe_acknowledged() {
        let (gateway, registry, _) = setup(GatewayConfig::default());
        let (id, rx) = admit(&gateway);
        let field = FieldId::from("F1");

        gateway.handle_message(
            id,
            ClientMessage::SubscribeField {
                field_id: field.clone(),
            },
        );
        assert_eq!(
            rx.recv().unwrap(),
            ServerMessage::Subscribed {
                field_id: field.clone()
            }
        );
        assert_eq!(
            registry.subscriber_count(&TopicKey::field(field.clone())),
            1
        );

        // Joining an already-joined topic is a no-op success.
        gateway.handle_message(
            id,
            ClientMessage::SubscribeField {
                field_id: field.clone(),
            },
        );
        assert_eq!(
            rx.recv().unwrap(),
            ServerMessage::Subscribed {
                field_id: field.clone()
            }
        );
        assert_eq!(
            registry.subscriber_count(&TopicKey::field(field.clone())),
            1
        );

        gateway.handle_message(
            id,
            ClientMessage::UnsubscribeField {
                field_id: field.clone(),
            },
        );
        assert_eq!(
            rx.recv().unwrap(),
            ServerMessage::Unsubscribed { field_id: field }
        );
        assert_eq!(
            registry.subscriber_count(&TopicKey::field(FieldId::from("F1"))),
            0
        );
    }

    #[test]
    fn test_ping_answered_with_pong() {
        let (gateway, _, _) = setup(GatewayConfig::default());
        let (id, rx) = admit(&gateway);

        gateway.handle_message(id, ClientMessage::Ping);
        assert!(matches!(
            rx.recv().unwrap(),
            ServerMessage::Pong { .. }
        ));
    }

    #[test]
    fn test_disconnect_releases_every_topic() {
        let (gateway, registry, _) = setup(GatewayConfig::default());
        let (id, _rx) = admit(&gateway);

        gateway.handle_message(
            id,
            ClientMessage::SubscribeField {
                field_id: FieldId::from("F1"),
            },
        );
        gateway.disconnect(id, DisconnectReason::VoluntaryClose);

        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.topic_count(), 0);
        assert!(gateway.identity(id).is_err());
    }

    #[test]
    fn test_idle_connection_expires() {
        let config = GatewayConfig {
            heartbeat_interval: Duration::from_millis(10),
            missed_heartbeat_limit: 1,
            ..Default::default()
        };
        let (gateway, registry, _) = setup(config);
        let (_id, _rx) = admit(&gateway);

        std::thread::sleep(Duration::from_millis(50));
        gateway.expire_idle();

        assert_eq!(gateway.connection_count(), 0);
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_heartbeat_keeps_connection_alive() {
        let config = GatewayConfig {
            heartbeat_interval: Duration::from_millis(20),
            missed_heartbeat_limit: 2,
            ..Default::default()
        };
        let (gateway, _, _) = setup(config);
        let (id, rx) = admit(&gateway);

        for _ in 0..4 {
            std::thread::sleep(Duration::from_millis(10));
            gateway.handle_message(id, ClientMessage::Ping);
            gateway.expire_idle();
        }

        assert_eq!(gateway.connection_count(), 1);
        assert_eq!(rx.iter().take(4).count(), 4);
    }

    #[test]
    fn test_sweeper_thread_expires_idle_connections() {
        let config = GatewayConfig {
            heartbeat_interval: Duration::from_millis(10),
            missed_heartbeat_limit: 1,
            ..Default::default()
        };
        let (gateway, _, _) = setup(config);
        let (_id, _rx) = admit(&gateway);

        let sweeper = gateway.clone().start_sweeper();
        for _ in 0..100 {
            if gateway.connection_count() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(gateway.connection_count(), 0);
        drop(sweeper);
    }

    #[test]
    fn test_expire_idle_reaps_registry_dropped_connections() {
        let (gateway, registry, _) = setup(GatewayConfig::default());
        let (id, rx) = admit(&gateway);
        drop(rx);

        // Fan-out discovers the dead transport and drops the route.
        registry.publish(
            &TopicKey::user(UserId::from("u-1")),
            ServerMessage::Event {
                envelope: EventEnvelope {
                    event: "system".to_string(),
                    data: serde_json::json!({ "message": "hello" }),
                },
            },
        );
        assert!(!registry.is_registered(id));
        assert_eq!(gateway.connection_count(), 1);

        gateway.expire_idle();
        assert_eq!(gateway.connection_count(), 0);
    }
}
