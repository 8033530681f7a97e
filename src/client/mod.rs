//! Client side: connection lifecycle, resubscription, and the notification
//! feed.
//!
//! One [`RealtimeClient`] implementation covers both the web and mobile
//! surfaces; platform differences live behind the [`Dialer`] transport seam
//! and the [`EscalationSink`] alert seam.

mod feed;
mod listeners;
mod manager;
mod transport;

pub use feed::{EscalationSink, Notification, NotificationFeed, NotificationId, NotificationKind};
pub use listeners::{Callback, ClientEvent, EventKind, EventListeners, ListenerId};
pub use manager::{ClientConfig, ConnectionState, RealtimeClient};
pub use transport::{Dialer, Session};
