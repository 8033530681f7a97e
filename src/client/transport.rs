//! Client transport seam.

use crate::error::Result;
use crate::protocol::{ClientMessage, ServerMessage};
use crossbeam_channel::{Receiver, Sender};

/// An established transport session.
///
/// Dropping the outbound sender closes the session from the client side;
/// the inbound receiver disconnecting signals transport loss.
pub struct Session {
    pub outbound: Sender<ClientMessage>,
    pub inbound: Receiver<ServerMessage>,
}

/// Opens authenticated sessions toward the broker.
///
/// The credential travels with the handshake itself, not as a separate
/// request; a rejected credential surfaces as
/// [`RealtimeError::AuthenticationFailed`](crate::RealtimeError::AuthenticationFailed)
/// and transport trouble as
/// [`RealtimeError::DialFailed`](crate::RealtimeError::DialFailed).
pub trait Dialer: Send + Sync {
    fn dial(&self, credential: &str) -> Result<Session>;
}
