//! Client connection lifecycle, reconnection, and topic reconciliation.

use crate::backoff::reconnect_delay;
use crate::client::listeners::{Callback, ClientEvent, EventKind, EventListeners, ListenerId};
use crate::client::transport::{Dialer, Session};
use crate::error::{RealtimeError, Result};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::types::{DisconnectReason, FieldId};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Maximum automatic reconnect attempts after an unexpected drop.
    pub max_reconnect_attempts: u32,

    /// Base delay for the reconnect backoff schedule.
    pub backoff_base: Duration,

    /// Cap on the reconnect backoff delay.
    pub backoff_cap: Duration,

    /// Interval between application-level pings while connected.
    pub ping_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(5000),
            ping_interval: Duration::from_secs(20),
        }
    }
}

/// Connection lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Automatic reconnection gave up; a fresh `connect` call is required.
    TerminalFailure,
}

struct StateInner {
    state: ConnectionState,
    credential: Option<String>,
    /// Every field the user has asked to watch, connected or not. Replayed
    /// on each successful (re)connect.
    desired_fields: HashSet<FieldId>,
    outbound: Option<Sender<ClientMessage>>,
    /// Bumped per session so stale reader/ping threads can never mutate the
    /// successor's state.
    epoch: u64,
    cancel_reconnect: Option<Sender<()>>,
    stop_ping: Option<Sender<()>>,
}

struct ClientInner {
    config: ClientConfig,
    dialer: Arc<dyn Dialer>,
    listeners: EventListeners,
    state: Mutex<StateInner>,
}

/// Client connection manager.
///
/// Maintains one logical connection, reconnects with backoff after
/// unexpected drops (single-flight: at most one schedule in flight), and
/// reconciles the desired field set against actual broker membership on
/// every successful (re)connect.
pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

impl RealtimeClient {
    pub fn new(config: ClientConfig, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                dialer,
                listeners: EventListeners::new(),
                state: Mutex::new(StateInner {
                    state: ConnectionState::Disconnected,
                    credential: None,
                    desired_fields: HashSet::new(),
                    outbound: None,
                    epoch: 0,
                    cancel_reconnect: None,
                    stop_ping: None,
                }),
            }),
        }
    }

    /// Open a session with the given credential.
    ///
    /// A no-op while connecting, connected, or reconnecting. A handshake
    /// rejection or dial failure is returned to the caller without any
    /// automatic retry; automatic recovery only covers drops from an
    /// established session.
    pub fn connect(&self, credential: &str) -> Result<()> {
        {
            let mut st = self.inner.state.lock();
            match st.state {
                ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Reconnecting => {
                    debug!(state = ?st.state, "connect ignored, already active");
                    return Ok(());
                }
                ConnectionState::Disconnected | ConnectionState::TerminalFailure => {}
            }
            st.state = ConnectionState::Connecting;
            st.credential = Some(credential.to_string());
        }

        establish(&self.inner).map_err(|e| {
            self.inner.state.lock().state = ConnectionState::Disconnected;
            e
        })
    }

    /// Voluntary close: clears the desired set, cancels any pending
    /// reconnect, and stops all session threads. Terminal until a fresh
    /// `connect` call.
    pub fn logout(&self) {
        let was_active = {
            let mut st = self.inner.state.lock();
            st.epoch += 1;
            st.desired_fields.clear();
            st.credential = None;
            st.outbound = None;
            st.stop_ping = None;
            if let Some(cancel) = st.cancel_reconnect.take() {
                let _ = cancel.try_send(());
            }
            let was_active = matches!(
                st.state,
                ConnectionState::Connecting
                    | ConnectionState::Connected
                    | ConnectionState::Reconnecting
            );
            st.state = ConnectionState::Disconnected;
            was_active
        };
        if was_active {
            info!("logout");
            self.inner.listeners.emit(&ClientEvent::Disconnected {
                reason: DisconnectReason::VoluntaryClose,
            });
        }
    }

    /// Start watching a field.
    ///
    /// Always recorded in the desired set; sent to the broker immediately
    /// when connected, otherwise applied on the next (re)connect.
    pub fn join_field(&self, field_id: FieldId) {
        let outbound = {
            let mut st = self.inner.state.lock();
            st.desired_fields.insert(field_id.clone());
            match st.state {
                ConnectionState::Connected => st.outbound.clone(),
                _ => None,
            }
        };
        if let Some(out) = outbound {
            let _ = out.send(ClientMessage::SubscribeField { field_id });
        }
    }

    /// Stop watching a field. Mirror of [`RealtimeClient::join_field`].
    pub fn leave_field(&self, field_id: FieldId) {
        let outbound = {
            let mut st = self.inner.state.lock();
            st.desired_fields.remove(&field_id);
            match st.state {
                ConnectionState::Connected => st.outbound.clone(),
                _ => None,
            }
        };
        if let Some(out) = outbound {
            let _ = out.send(ClientMessage::UnsubscribeField { field_id });
        }
    }

    /// Send an application-level heartbeat now.
    pub fn ping(&self) -> Result<()> {
        let outbound = {
            let st = self.inner.state.lock();
            if st.state != ConnectionState::Connected {
                return Err(RealtimeError::NotConnected);
            }
            st.outbound.clone()
        };
        outbound
            .ok_or(RealtimeError::NotConnected)?
            .send(ClientMessage::Ping)
            .map_err(|_| RealtimeError::TransportClosed)
    }

    /// Register a listener. Multiple independent listeners per event are
    /// supported; callbacks run outside all client locks.
    pub fn on(&self, kind: EventKind, callback: Callback) -> ListenerId {
        self.inner.listeners.on(kind, callback)
    }

    /// Remove a listener. Safe at any time, including UI teardown.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.inner.listeners.off(kind, id)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Snapshot of the desired field set.
    pub fn desired_fields(&self) -> HashSet<FieldId> {
        self.inner.state.lock().desired_fields.clone()
    }
}

/// Dial, replay the desired set, and hand the session to its threads.
///
/// Used by both the initial connect and every reconnect attempt.
fn establish(inner: &Arc<ClientInner>) -> Result<()> {
    let credential = {
        let st = inner.state.lock();
        st.credential.clone().ok_or(RealtimeError::NotConnected)?
    };

    let Session { outbound, inbound } = inner.dialer.dial(&credential)?;

    let (stop_ping_tx, stop_ping_rx) = bounded::<()>(1);
    let (epoch, desired) = {
        let mut st = inner.state.lock();
        if st.credential.is_none() {
            // Logout raced the dial; abandon the fresh session.
            return Err(RealtimeError::NotConnected);
        }
        st.epoch += 1;
        st.outbound = Some(outbound.clone());
        st.cancel_reconnect = None;
        st.stop_ping = Some(stop_ping_tx);
        st.state = ConnectionState::Connected;
        let desired: Vec<FieldId> = st.desired_fields.iter().cloned().collect();
        (st.epoch, desired)
    };

    // Resubscription replay: actual membership catches up with the desired
    // set before the session is announced as ready.
    for field_id in desired {
        let _ = outbound.send(ClientMessage::SubscribeField { field_id });
    }

    let reader = Arc::clone(inner);
    thread::spawn(move || run_reader(reader, inbound, epoch));
    let pinger = Arc::clone(inner);
    let interval = inner.config.ping_interval;
    thread::spawn(move || run_pinger(pinger, stop_ping_rx, interval, epoch));

    info!("realtime session established");
    inner.listeners.emit(&ClientEvent::Connected);
    Ok(())
}

fn run_reader(inner: Arc<ClientInner>, inbound: Receiver<ServerMessage>, epoch: u64) {
    while let Ok(message) = inbound.recv() {
        dispatch(&inner, message);
    }
    handle_transport_lost(&inner, epoch);
}

fn dispatch(inner: &Arc<ClientInner>, message: ServerMessage) {
    let event = match message {
        ServerMessage::Subscribed { field_id } => ClientEvent::Subscribed { field_id },
        ServerMessage::Unsubscribed { field_id } => ClientEvent::Unsubscribed { field_id },
        ServerMessage::Pong { timestamp } => ClientEvent::Pong { timestamp },
        ServerMessage::Event { envelope } => match envelope.decode() {
            Ok(domain) => ClientEvent::Domain(domain),
            Err(error) => {
                warn!(event = %envelope.event, %error, "undecodable event payload");
                ClientEvent::Unparsed {
                    event: envelope.event,
                }
            }
        },
    };
    inner.listeners.emit(&event);
}

fn handle_transport_lost(inner: &Arc<ClientInner>, epoch: u64) {
    {
        let mut st = inner.state.lock();
        if st.epoch != epoch {
            // A newer session owns the state.
            return;
        }
        if st.state != ConnectionState::Connected {
            // Logout already handled this session.
            return;
        }
        st.outbound = None;
        st.stop_ping = None;
        st.state = ConnectionState::Reconnecting;
    }
    warn!("transport lost, scheduling reconnect");
    inner.listeners.emit(&ClientEvent::Disconnected {
        reason: DisconnectReason::TransportError,
    });
    spawn_reconnect(inner);
}

/// Single-flight: only the thread that performed the
/// `Connected -> Reconnecting` transition reaches this point.
fn spawn_reconnect(inner: &Arc<ClientInner>) {
    let (cancel_tx, cancel_rx) = bounded::<()>(1);
    {
        let mut st = inner.state.lock();
        if st.state != ConnectionState::Reconnecting {
            return;
        }
        st.cancel_reconnect = Some(cancel_tx);
    }
    let worker = Arc::clone(inner);
    thread::spawn(move || run_reconnect(worker, cancel_rx));
}

fn run_reconnect(inner: Arc<ClientInner>, cancel: Receiver<()>) {
    let config = inner.config.clone();
    for attempt in 1..=config.max_reconnect_attempts {
        let delay = reconnect_delay(attempt, config.backoff_base, config.backoff_cap);
        match cancel.recv_timeout(delay) {
            // Logout cancelled the schedule.
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }
        if inner.state.lock().state != ConnectionState::Reconnecting {
            return;
        }

        debug!(attempt, "reconnect attempt");
        match establish(&inner) {
            Ok(()) => return,
            Err(RealtimeError::AuthenticationFailed(error)) => {
                {
                    let mut st = inner.state.lock();
                    st.state = ConnectionState::Disconnected;
                    st.cancel_reconnect = None;
                }
                warn!(%error, "reconnect credential rejected, giving up");
                inner.listeners.emit(&ClientEvent::Disconnected {
                    reason: DisconnectReason::AuthenticationRejected,
                });
                return;
            }
            Err(error) => {
                debug!(attempt, %error, "reconnect attempt failed");
            }
        }
    }

    {
        let mut st = inner.state.lock();
        if st.state != ConnectionState::Reconnecting {
            return;
        }
        st.state = ConnectionState::TerminalFailure;
        st.cancel_reconnect = None;
    }
    warn!(
        attempts = config.max_reconnect_attempts,
        "reconnect attempts exhausted"
    );
    inner.listeners.emit(&ClientEvent::ReconnectExhausted);
}

fn run_pinger(inner: Arc<ClientInner>, stop: Receiver<()>, interval: Duration, epoch: u64) {
    loop {
        match stop.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }
        let outbound = {
            let st = inner.state.lock();
            if st.epoch != epoch || st.state != ConnectionState::Connected {
                return;
            }
            st.outbound.clone()
        };
        match outbound {
            Some(out) => {
                let _ = out.send(ClientMessage::Ping);
            }
            None => return,
        }
    }
}
