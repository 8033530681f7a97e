//! Typed publish surface for domain services.

use crate::error::Result;
use crate::protocol::{DomainEvent, ServerMessage};
use crate::registry::TopicRegistry;
use crate::types::{FieldId, TopicKey, UserId};
use std::sync::Arc;
use tracing::debug;

/// The only path domain services use to reach the registry.
///
/// Wrappers validate the event at the boundary, resolve a topic key, and hand
/// off to [`TopicRegistry::publish`]. Delivery is at-most-once and
/// best-effort: per-connection failures are handled inside the registry and
/// never surface here — only an invalid event errors.
///
/// Constructed once at startup and passed by reference to whichever services
/// publish; there is no process-wide instance.
pub struct EventPublisher {
    registry: Arc<TopicRegistry>,
}

impl EventPublisher {
    pub fn new(registry: Arc<TopicRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver an event to every connection a user currently holds.
    pub fn emit_to_user(&self, user_id: UserId, event: &DomainEvent) -> Result<()> {
        let message = self.encode(event)?;
        debug!(event = event.name(), user = %user_id, "emit to user");
        self.registry.publish(&TopicKey::user(user_id), message);
        Ok(())
    }

    /// Deliver an event to every subscriber of a field.
    pub fn emit_to_field(&self, field_id: FieldId, event: &DomainEvent) -> Result<()> {
        let message = self.encode(event)?;
        debug!(event = event.name(), field = %field_id, "emit to field");
        self.registry.publish(&TopicKey::field(field_id), message);
        Ok(())
    }

    /// Deliver an event to every connected client.
    pub fn broadcast(&self, event: &DomainEvent) -> Result<()> {
        let message = self.encode(event)?;
        debug!(event = event.name(), "broadcast");
        self.registry.broadcast(message);
        Ok(())
    }

    fn encode(&self, event: &DomainEvent) -> Result<ServerMessage> {
        event.validate()?;
        Ok(ServerMessage::Event {
            envelope: event.to_envelope()?,
        })
    }
}
