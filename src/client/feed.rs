//! Notification feed: reconciles domain events into a bounded read/unread
//! list with severity-based escalation.

use crate::client::listeners::{ClientEvent, EventKind, ListenerId};
use crate::client::manager::RealtimeClient;
use crate::protocol::DomainEvent;
use crate::types::{DisconnectReason, FieldId, Priority, Severity, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Default feed capacity.
const DEFAULT_CAPACITY: usize = 50;

/// Notification categories shown in the feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Health,
    Alert,
    Recommendation,
    Yield,
    System,
}

/// Client-generated identifier, unique for the feed's lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub u64);

impl fmt::Debug for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NotificationId({})", self.0)
    }
}

/// One entry in the notification feed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub timestamp: Timestamp,
    pub read: bool,
    pub field_id: Option<FieldId>,
    pub field_name: Option<String>,
    pub priority: Option<Priority>,
}

/// Immediate user-facing alert channel for critical events.
///
/// The web client surfaces these as toasts, the mobile client as OS alerts;
/// the feed only guarantees the trigger fires exactly once per event,
/// independent of whether the notification list is open.
pub trait EscalationSink: Send + Sync {
    fn escalate(&self, notification: &Notification);
}

struct FeedInner {
    /// Front is newest.
    entries: VecDeque<Notification>,
}

/// Bounded notification feed with read-state tracking.
///
/// Holds at most `capacity` entries; inserting past the bound evicts the
/// oldest entries first. A malformed event degrades to a generic entry —
/// it never corrupts the feed.
pub struct NotificationFeed {
    capacity: usize,
    escalation: Option<Arc<dyn EscalationSink>>,
    inner: Mutex<FeedInner>,
    next_id: AtomicU64,
}

impl NotificationFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            escalation: None,
            inner: Mutex::new(FeedInner {
                entries: VecDeque::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Attach an escalation sink for critical events.
    pub fn with_escalation(mut self, sink: Arc<dyn EscalationSink>) -> Self {
        self.escalation = Some(sink);
        self
    }

    /// Reconcile one domain event into the feed.
    ///
    /// A critical event yields exactly one feed entry and exactly one
    /// escalation trigger.
    pub fn apply(&self, event: &DomainEvent) {
        let notification = self.reconcile(event);
        let escalate = event.severity() == Some(Severity::Critical);
        let alert = escalate.then(|| notification.clone());
        self.insert(notification);
        if let (Some(sink), Some(notification)) = (&self.escalation, alert) {
            sink.escalate(&notification);
        }
    }

    /// Fallback for wire events that failed to parse: the update is still
    /// surfaced generically instead of being dropped silently.
    pub fn apply_unparsed(&self, event_name: &str) {
        warn!(event = event_name, "falling back to generic notification");
        let notification = self.entry(
            NotificationKind::System,
            "Update received".to_string(),
            format!("A {} update arrived but could not be displayed", event_name),
            None,
            None,
            None,
        );
        self.insert(notification);
    }

    /// Record a non-voluntary connection loss.
    ///
    /// Handshake rejections are skipped too: the transport drop that
    /// preceded them already produced a loss entry.
    pub fn handle_disconnected(&self, reason: DisconnectReason) {
        if !reason.is_unexpected() || reason == DisconnectReason::AuthenticationRejected {
            return;
        }
        let notification = self.entry(
            NotificationKind::System,
            "Connection Lost".to_string(),
            "Real-time updates temporarily unavailable".to_string(),
            None,
            None,
            None,
        );
        self.insert(notification);
    }

    /// Record a successful (re)connect.
    pub fn handle_connected(&self) {
        let notification = self.entry(
            NotificationKind::System,
            "Connected".to_string(),
            "Real-time updates enabled".to_string(),
            None,
            None,
            None,
        );
        self.insert(notification);
    }

    /// Record that automatic reconnection gave up.
    pub fn handle_reconnect_exhausted(&self) {
        let notification = self.entry(
            NotificationKind::System,
            "Real-time unavailable".to_string(),
            "Automatic reconnection stopped; reconnect manually to resume updates".to_string(),
            None,
            None,
            Some(Priority::High),
        );
        self.insert(notification);
    }

    /// Mark one entry as read. Unknown ids are a no-op.
    pub fn mark_as_read(&self, id: NotificationId) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.iter_mut().find(|n| n.id == id) {
            entry.read = true;
        }
    }

    pub fn mark_all_as_read(&self) {
        let mut inner = self.inner.lock();
        for entry in inner.entries.iter_mut() {
            entry.read = true;
        }
    }

    pub fn clear_all(&self) {
        self.inner.lock().entries.clear();
    }

    /// Snapshot of the feed, newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.inner.lock().entries.iter().filter(|n| !n.read).count()
    }

    /// Wire the feed to a client's listener surface. Returns the
    /// registrations so a teardown can `off` each of them.
    pub fn attach(self: Arc<Self>, client: &RealtimeClient) -> Vec<(EventKind, ListenerId)> {
        let mut registrations = Vec::new();

        for kind in [
            EventKind::HealthUpdated,
            EventKind::HealthAlert,
            EventKind::RecommendationCreated,
            EventKind::YieldPredictionReady,
            EventKind::System,
        ] {
            let feed = Arc::clone(&self);
            let id = client.on(
                kind,
                Arc::new(move |event| {
                    if let ClientEvent::Domain(domain) = event {
                        feed.apply(domain);
                    }
                }),
            );
            registrations.push((kind, id));
        }

        let feed = Arc::clone(&self);
        registrations.push((
            EventKind::Unparsed,
            client.on(
                EventKind::Unparsed,
                Arc::new(move |event| {
                    if let ClientEvent::Unparsed { event } = event {
                        feed.apply_unparsed(event);
                    }
                }),
            ),
        ));

        let feed = Arc::clone(&self);
        registrations.push((
            EventKind::Connected,
            client.on(
                EventKind::Connected,
                Arc::new(move |_| feed.handle_connected()),
            ),
        ));

        let feed = Arc::clone(&self);
        registrations.push((
            EventKind::Disconnected,
            client.on(
                EventKind::Disconnected,
                Arc::new(move |event| {
                    if let ClientEvent::Disconnected { reason } = event {
                        feed.handle_disconnected(*reason);
                    }
                }),
            ),
        ));

        let feed = Arc::clone(&self);
        registrations.push((
            EventKind::ReconnectExhausted,
            client.on(
                EventKind::ReconnectExhausted,
                Arc::new(move |_| feed.handle_reconnect_exhausted()),
            ),
        ));

        registrations
    }

    /// Map a typed event to its feed entry.
    fn reconcile(&self, event: &DomainEvent) -> Notification {
        match event {
            DomainEvent::HealthUpdated {
                field_id,
                field_name,
                health,
            } => self.entry(
                NotificationKind::Health,
                "Field Health Updated".to_string(),
                format!(
                    "{}: Health score {} ({})",
                    field_name, health.score, health.status
                ),
                Some(field_id.clone()),
                Some(field_name.clone()),
                None,
            ),
            DomainEvent::HealthAlert {
                field_id,
                field_name,
                message,
                severity,
            } => self.entry(
                NotificationKind::Alert,
                format!(
                    "{}: Field Health Alert",
                    severity.as_str().to_uppercase()
                ),
                format!("{}: {}", field_name, message),
                Some(field_id.clone()),
                Some(field_name.clone()),
                Some(if *severity == Severity::Critical {
                    Priority::High
                } else {
                    Priority::Medium
                }),
            ),
            DomainEvent::RecommendationCreated {
                field_id,
                field_name,
                message,
                recommendations,
            } => {
                let urgent = recommendations
                    .iter()
                    .any(|r| r.priority == Priority::Critical);
                self.entry(
                    NotificationKind::Recommendation,
                    "New Recommendations".to_string(),
                    format!("{}: {}", field_name, message),
                    Some(field_id.clone()),
                    Some(field_name.clone()),
                    Some(if urgent {
                        Priority::High
                    } else {
                        Priority::Medium
                    }),
                )
            }
            DomainEvent::YieldPredictionReady {
                field_id,
                field_name,
                message,
            } => self.entry(
                NotificationKind::Yield,
                "Yield Prediction Ready".to_string(),
                format!("{}: {}", field_name, message),
                Some(field_id.clone()),
                Some(field_name.clone()),
                None,
            ),
            DomainEvent::System { message, severity } => self.entry(
                NotificationKind::System,
                "System Notice".to_string(),
                message.clone(),
                None,
                None,
                severity.map(|s| {
                    if s == Severity::Critical {
                        Priority::High
                    } else {
                        Priority::Medium
                    }
                }),
            ),
        }
    }

    fn entry(
        &self,
        kind: NotificationKind,
        title: String,
        message: String,
        field_id: Option<FieldId>,
        field_name: Option<String>,
        priority: Option<Priority>,
    ) -> Notification {
        Notification {
            id: NotificationId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            kind,
            title,
            message,
            timestamp: Timestamp::now(),
            read: false,
            field_id,
            field_name,
            priority,
        }
    }

    /// Prepend, evicting oldest entries past capacity.
    fn insert(&self, notification: Notification) {
        let mut inner = self.inner.lock();
        inner.entries.push_front(notification);
        while inner.entries.len() > self.capacity {
            inner.entries.pop_back();
        }
    }
}

impl Default for NotificationFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FieldHealth, RecommendationSummary};
    use crate::types::HealthStatus;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingSink {
        alerts: AtomicUsize,
    }

    impl EscalationSink for CountingSink {
        fn escalate(&self, _notification: &Notification) {
            self.alerts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn health_updated(field: &str, score: f32) -> DomainEvent {
        DomainEvent::HealthUpdated {
            field_id: FieldId::from(field),
            field_name: "North Block".to_string(),
            health: FieldHealth {
                score,
                status: HealthStatus::from_score(score),
            },
        }
    }

    fn critical_alert() -> DomainEvent {
        DomainEvent::HealthAlert {
            field_id: FieldId::from("F1"),
            field_name: "North Block".to_string(),
            message: "Field health is critical and requires immediate attention".to_string(),
            severity: Severity::Critical,
        }
    }

    #[test]
    fn test_health_update_template() {
        let feed = NotificationFeed::new();
        feed.apply(&health_updated("F1", 72.0));

        let entries = feed.notifications();
        assert_eq!(entries.len(), 1);
        let n = &entries[0];
        assert_eq!(n.kind, NotificationKind::Health);
        assert_eq!(n.title, "Field Health Updated");
        assert_eq!(n.message, "North Block: Health score 72 (good)");
        assert!(!n.read);
        assert_eq!(n.field_id, Some(FieldId::from("F1")));
    }

    #[test]
    fn test_alert_title_carries_severity() {
        let feed = NotificationFeed::new();
        feed.apply(&critical_alert());

        let n = &feed.notifications()[0];
        assert_eq!(n.kind, NotificationKind::Alert);
        assert_eq!(n.title, "CRITICAL: Field Health Alert");
        assert_eq!(n.priority, Some(Priority::High));
    }

    #[test]
    fn test_recommendation_priority_mapping() {
        let feed = NotificationFeed::new();
        feed.apply(&DomainEvent::RecommendationCreated {
            field_id: FieldId::from("F1"),
            field_name: "North Block".to_string(),
            message: "2 critical recommendation(s) require immediate action".to_string(),
            recommendations: vec![
                RecommendationSummary {
                    priority: Priority::Critical,
                },
                RecommendationSummary {
                    priority: Priority::High,
                },
            ],
        });

        let n = &feed.notifications()[0];
        assert_eq!(n.kind, NotificationKind::Recommendation);
        assert_eq!(n.priority, Some(Priority::High));
    }

    #[test]
    fn test_capacity_evicts_oldest_first() {
        let feed = NotificationFeed::with_capacity(3);
        for i in 0..5 {
            feed.apply(&health_updated(&format!("F{}", i), 70.0));
        }

        let entries = feed.notifications();
        assert_eq!(entries.len(), 3);
        // Newest first; F0 and F1 were evicted.
        assert_eq!(entries[0].field_id, Some(FieldId::from("F4")));
        assert_eq!(entries[2].field_id, Some(FieldId::from("F2")));
    }

    #[test]
    fn test_ids_unique_across_feed_lifetime() {
        let feed = NotificationFeed::with_capacity(2);
        for _ in 0..10 {
            feed.apply(&health_updated("F1", 70.0));
        }
        let entries = feed.notifications();
        assert_ne!(entries[0].id, entries[1].id);
    }

    #[test]
    fn test_read_state_tracking() {
        let feed = NotificationFeed::new();
        feed.apply(&health_updated("F1", 70.0));
        feed.apply(&health_updated("F2", 71.0));
        assert_eq!(feed.unread_count(), 2);

        let id = feed.notifications()[0].id;
        feed.mark_as_read(id);
        assert_eq!(feed.unread_count(), 1);

        // Unknown id is a no-op, not an error.
        feed.mark_as_read(NotificationId(9999));
        assert_eq!(feed.unread_count(), 1);

        feed.mark_all_as_read();
        assert_eq!(feed.unread_count(), 0);

        feed.clear_all();
        assert!(feed.is_empty());
    }

    #[test]
    fn test_critical_event_escalates_exactly_once() {
        let sink = Arc::new(CountingSink::default());
        let feed = NotificationFeed::new().with_escalation(sink.clone());

        feed.apply(&critical_alert());
        assert_eq!(feed.len(), 1);
        assert_eq!(sink.alerts.load(Ordering::SeqCst), 1);

        // Non-critical events never escalate.
        feed.apply(&DomainEvent::HealthAlert {
            field_id: FieldId::from("F1"),
            field_name: "North Block".to_string(),
            message: "3 health anomalies detected".to_string(),
            severity: Severity::Warning,
        });
        assert_eq!(feed.len(), 2);
        assert_eq!(sink.alerts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unparsed_event_falls_back_to_generic_entry() {
        let feed = NotificationFeed::new();
        feed.apply_unparsed("moisture_spike");

        let n = &feed.notifications()[0];
        assert_eq!(n.kind, NotificationKind::System);
        assert!(n.message.contains("moisture_spike"));
        assert_eq!(feed.unread_count(), 1);
    }

    #[test]
    fn test_connectivity_bookkeeping() {
        let feed = NotificationFeed::new();

        feed.handle_disconnected(DisconnectReason::TransportError);
        assert_eq!(feed.notifications()[0].title, "Connection Lost");

        feed.handle_connected();
        assert_eq!(feed.notifications()[0].title, "Connected");

        // A voluntary close adds nothing.
        feed.handle_disconnected(DisconnectReason::VoluntaryClose);
        assert_eq!(feed.len(), 2);
    }

    #[test]
    fn test_reconnect_exhausted_entry_is_high_priority() {
        let feed = NotificationFeed::new();
        feed.handle_reconnect_exhausted();

        let n = &feed.notifications()[0];
        assert_eq!(n.title, "Real-time unavailable");
        assert_eq!(n.priority, Some(Priority::High));
    }
}
