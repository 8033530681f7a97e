//! Core types shared by the broker and client sides.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of an authenticated user, as issued by the account system.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_string())
    }
}

/// Identifier of a monitored field, as issued by the field CRUD system.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldId(pub String);

impl fmt::Debug for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldId({})", self.0)
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FieldId {
    fn from(s: &str) -> Self {
        FieldId(s.to_string())
    }
}

/// Broker-assigned identifier for one transport connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity extracted from a verified credential at handshake time.
///
/// Set once when the connection is admitted; never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub email: String,
}

/// Topic category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopicKind {
    User,
    Field,
}

/// A named fan-out channel: every current subscriber receives events
/// published to it.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopicKey {
    User(UserId),
    Field(FieldId),
}

impl TopicKey {
    /// Personal topic for a user.
    pub fn user(id: UserId) -> Self {
        TopicKey::User(id)
    }

    /// Shared topic for a field.
    pub fn field(id: FieldId) -> Self {
        TopicKey::Field(id)
    }

    pub fn kind(&self) -> TopicKind {
        match self {
            TopicKey::User(_) => TopicKind::User,
            TopicKey::Field(_) => TopicKind::Field,
        }
    }
}

impl fmt::Debug for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TopicKey({})", self)
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicKey::User(id) => write!(f, "user:{}", id),
            TopicKey::Field(id) => write!(f, "field:{}", id),
        }
    }
}

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_millis() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Event severity as reported by the emitting domain service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Health score buckets reported with health updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthStatus {
    /// Bucket for a 0-100 health score.
    pub fn from_score(score: f32) -> Self {
        if score >= 80.0 {
            HealthStatus::Excellent
        } else if score >= 60.0 {
            HealthStatus::Good
        } else if score >= 40.0 {
            HealthStatus::Fair
        } else if score >= 20.0 {
            HealthStatus::Poor
        } else {
            HealthStatus::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Excellent => "excellent",
            HealthStatus::Good => "good",
            HealthStatus::Fair => "fair",
            HealthStatus::Poor => "poor",
            HealthStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Priority attached to recommendations and feed entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// Why a connection ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client closed the connection on purpose.
    VoluntaryClose,
    /// The transport failed or the outbound buffer overflowed.
    TransportError,
    /// Heartbeats stopped arriving.
    HeartbeatTimeout,
    /// The credential was rejected during a handshake.
    AuthenticationRejected,
}

impl DisconnectReason {
    /// True for the reasons that should trigger client-side recovery.
    pub fn is_unexpected(&self) -> bool {
        !matches!(self, DisconnectReason::VoluntaryClose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_key_display() {
        let user = TopicKey::user(UserId::from("u-17"));
        let field = TopicKey::field(FieldId::from("f-42"));
        assert_eq!(user.to_string(), "user:u-17");
        assert_eq!(field.to_string(), "field:f-42");
        assert_eq!(user.kind(), TopicKind::User);
        assert_eq!(field.kind(), TopicKind::Field);
    }

    #[test]
    fn test_health_status_buckets() {
        assert_eq!(HealthStatus::from_score(92.0), HealthStatus::Excellent);
        assert_eq!(HealthStatus::from_score(72.0), HealthStatus::Good);
        assert_eq!(HealthStatus::from_score(40.0), HealthStatus::Fair);
        assert_eq!(HealthStatus::from_score(25.0), HealthStatus::Poor);
        assert_eq!(HealthStatus::from_score(5.0), HealthStatus::Critical);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Warning < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_disconnect_reason_expectedness() {
        assert!(!DisconnectReason::VoluntaryClose.is_unexpected());
        assert!(DisconnectReason::TransportError.is_unexpected());
        assert!(DisconnectReason::HeartbeatTimeout.is_unexpected());
    }
}
