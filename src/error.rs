//! Error types for the realtime subsystem.

use crate::types::ConnectionId;
use thiserror::Error;

/// Main error type for broker and client operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    #[error("dial failed: {0}")]
    DialFailed(String),

    #[error("transport closed")]
    TransportClosed,

    #[error("client is not connected")]
    NotConnected,

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RealtimeError {
    fn from(e: serde_json::Error) -> Self {
        RealtimeError::Serialization(e.to_string())
    }
}

/// Result type for realtime operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;
