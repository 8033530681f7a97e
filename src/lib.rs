//! # Fieldcast
//!
//! Real-time notification delivery for a field monitoring platform:
//! a persistent-connection broker plus the client machinery that turns
//! fanned-out domain events into a bounded notification feed.
//!
//! ## Core Concepts
//!
//! - **Topics**: per-user (`user:{id}`) and per-field (`field:{id}`)
//!   channels, created lazily and collected when empty
//! - **Fan-out**: at-most-once, best-effort delivery to every current
//!   subscriber, each isolated from the others' failures
//! - **Resubscription**: the client replays its desired field set on every
//!   reconnect, so membership always converges after a drop
//! - **Reconciliation**: domain events become feed entries with read-state,
//!   capacity-bounded eviction, and critical-severity escalation
//!
//! ## Example
//!
//! ```ignore
//! use fieldcast::{
//!     ClientConfig, EventPublisher, Gateway, GatewayConfig, LocalDialer,
//!     NotificationFeed, RealtimeClient, TokenDirectory, TopicRegistry,
//! };
//!
//! let registry = Arc::new(TopicRegistry::new());
//! let gateway = Arc::new(Gateway::new(GatewayConfig::default(), auth, registry.clone()));
//! let publisher = EventPublisher::new(registry);
//!
//! let client = RealtimeClient::new(
//!     ClientConfig::default(),
//!     Arc::new(LocalDialer::new(gateway.clone())),
//! );
//! let feed = Arc::new(NotificationFeed::new());
//! feed.clone().attach(&client);
//!
//! client.connect("bearer-token")?;
//! client.join_field("field-1".into());
//!
//! publisher.emit_to_field("field-1".into(), &event)?;
//! ```

pub mod backoff;
pub mod client;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod publisher;
pub mod registry;
pub mod types;

// Re-exports
pub use backoff::reconnect_delay;
pub use client::{
    Callback, ClientConfig, ClientEvent, ConnectionState, Dialer, EscalationSink, EventKind,
    EventListeners, ListenerId, Notification, NotificationFeed, NotificationId, NotificationKind,
    RealtimeClient, Session,
};
pub use error::{RealtimeError, Result};
pub use gateway::local::LocalDialer;
pub use gateway::{Authenticator, Gateway, GatewayConfig, SweeperHandle, TokenDirectory};
pub use protocol::{
    ClientMessage, DomainEvent, EventEnvelope, FieldHealth, RecommendationSummary, ServerMessage,
};
pub use publisher::EventPublisher;
pub use registry::TopicRegistry;
pub use types::*;
