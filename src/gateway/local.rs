//! In-process transport: binds a client session straight to a gateway.
//!
//! Used when the broker is embedded in the same process as the services that
//! publish events, and by tests exercising the full client path without a
//! socket listener.

use crate::client::{Dialer, Session};
use crate::error::Result;
use crate::gateway::Gateway;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::types::DisconnectReason;
use crossbeam_channel::bounded;
use std::sync::Arc;
use std::thread;

/// Inbound buffer from the client before sends block.
const CLIENT_BUFFER: usize = 64;

/// Dials a gateway living in the same process.
pub struct LocalDialer {
    gateway: Arc<Gateway>,
}

impl LocalDialer {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

impl Dialer for LocalDialer {
    fn dial(&self, credential: &str) -> Result<Session> {
        let (server_tx, inbound) = bounded::<ServerMessage>(self.gateway.config().outbound_buffer);
        let id = self.gateway.connect(credential, server_tx)?;

        let (outbound, client_rx) = bounded::<ClientMessage>(CLIENT_BUFFER);
        let gateway = Arc::clone(&self.gateway);
        thread::spawn(move || {
            while let Ok(message) = client_rx.recv() {
                gateway.handle_message(id, message);
            }
            // Sender dropped: the client hung up.
            gateway.disconnect(id, DisconnectReason::VoluntaryClose);
        });

        Ok(Session { outbound, inbound })
    }
}
