//! Wire protocol shared by the broker and both client surfaces.
//!
//! Domain events travel as name-plus-payload envelopes. The broker only ever
//! produces envelopes from validated [`DomainEvent`]s; clients re-validate on
//! receipt and fall back to a generic notification when a payload does not
//! parse, so a bad event can degrade but never crash the feed.

use crate::error::{RealtimeError, Result};
use crate::types::{FieldId, HealthStatus, Priority, Severity, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages a client sends to the broker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SubscribeField { field_id: FieldId },
    UnsubscribeField { field_id: FieldId },
    Ping,
}

/// Messages the broker sends to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Acknowledges a field join.
    Subscribed { field_id: FieldId },
    /// Acknowledges a field leave.
    Unsubscribed { field_id: FieldId },
    /// Heartbeat reply.
    Pong { timestamp: Timestamp },
    /// A fanned-out domain event.
    Event { envelope: EventEnvelope },
}

/// A domain event on the wire: event name plus loosely-typed payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    pub data: Value,
}

impl EventEnvelope {
    /// Decode back into a typed event.
    ///
    /// Fails on unknown event names or payloads missing required fields.
    pub fn decode(&self) -> Result<DomainEvent> {
        let value = serde_json::json!({ "event": self.event, "data": self.data });
        Ok(serde_json::from_value(value)?)
    }
}

/// Health summary attached to health updates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldHealth {
    /// 0-100 composite score.
    pub score: f32,
    pub status: HealthStatus,
}

/// One recommendation entry attached to recommendation events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecommendationSummary {
    pub priority: Priority,
}

/// Typed domain events fanned out to subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum DomainEvent {
    /// New health measurement for a field.
    HealthUpdated {
        field_id: FieldId,
        field_name: String,
        health: FieldHealth,
    },

    /// Health deteriorated or anomalies were detected.
    HealthAlert {
        field_id: FieldId,
        field_name: String,
        message: String,
        severity: Severity,
    },

    /// New recommendations require attention.
    RecommendationCreated {
        field_id: FieldId,
        field_name: String,
        message: String,
        recommendations: Vec<RecommendationSummary>,
    },

    /// A yield prediction finished computing.
    YieldPredictionReady {
        field_id: FieldId,
        field_name: String,
        message: String,
    },

    /// Broker or platform message.
    System {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        severity: Option<Severity>,
    },
}

impl DomainEvent {
    /// Wire name for this event.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::HealthUpdated { .. } => "health_updated",
            DomainEvent::HealthAlert { .. } => "health_alert",
            DomainEvent::RecommendationCreated { .. } => "recommendation_created",
            DomainEvent::YieldPredictionReady { .. } => "yield_prediction_ready",
            DomainEvent::System { .. } => "system",
        }
    }

    /// Severity carried by the event, if any.
    pub fn severity(&self) -> Option<Severity> {
        match self {
            DomainEvent::HealthAlert { severity, .. } => Some(*severity),
            DomainEvent::System { severity, .. } => *severity,
            _ => None,
        }
    }

    /// Check required fields before the event reaches the registry.
    ///
    /// The type system covers structure; this covers the value constraints
    /// the downstream templates rely on.
    pub fn validate(&self) -> Result<()> {
        let check_id = |id: &FieldId| {
            if id.0.is_empty() {
                Err(RealtimeError::InvalidEvent("empty field id".to_string()))
            } else {
                Ok(())
            }
        };
        let check_name = |name: &str| {
            if name.is_empty() {
                Err(RealtimeError::InvalidEvent("empty field name".to_string()))
            } else {
                Ok(())
            }
        };

        match self {
            DomainEvent::HealthUpdated {
                field_id,
                field_name,
                health,
            } => {
                check_id(field_id)?;
                check_name(field_name)?;
                if !(0.0..=100.0).contains(&health.score) {
                    return Err(RealtimeError::InvalidEvent(format!(
                        "health score out of range: {}",
                        health.score
                    )));
                }
                Ok(())
            }
            DomainEvent::HealthAlert {
                field_id,
                field_name,
                ..
            }
            | DomainEvent::RecommendationCreated {
                field_id,
                field_name,
                ..
            }
            | DomainEvent::YieldPredictionReady {
                field_id,
                field_name,
                ..
            } => {
                check_id(field_id)?;
                check_name(field_name)
            }
            DomainEvent::System { message, .. } => {
                if message.is_empty() {
                    Err(RealtimeError::InvalidEvent("empty system message".to_string()))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Encode into the wire envelope.
    pub fn to_envelope(&self) -> Result<EventEnvelope> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::from_value(value)?)
    }
}
