//! Event fan-out to whatever frontend is attached.
//!
//! The engine publishes [`AppEvent`]s on a broadcast channel and does not
//! care whether anyone is listening; a send with no subscribers is dropped.
//! Subscribers that fall behind see `Lagged` and may simply re-read the
//! engine state, so a modest buffer is enough.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    Expired,
    SignedOut,
}

/// Everything the engine tells the outside world. Serialized with a `type`
/// tag so a web view can switch on it directly.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    /// The displayed order list changed; panels should re-render.
    OrdersUpdated { count: usize, page: u32 },
    /// Transient message for the user.
    Toast {
        id: Uuid,
        level: ToastLevel,
        message: String,
    },
    /// Sound is blocked until the user interacts with the app.
    AudioUnlockRequired,
    /// The session ended; the frontend should return to the sign-in view.
    SessionEnded { reason: SessionEndReason },
    /// Heartbeat for the status bar.
    SyncStatus {
        last_synced: Option<DateTime<Utc>>,
        page: u32,
        total_pages: u32,
    },
    /// The notification panel content changed.
    NotificationsUpdated { unread: usize, total: usize },
}

/// Fire-and-forget broadcast of engine events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. A send error just means nobody is subscribed.
    pub fn emit(&self, event: AppEvent) {
        let _ = self.tx.send(event);
    }

    /// Shorthand for a toast event.
    pub fn toast(&self, level: ToastLevel, message: impl Into<String>) {
        self.emit(AppEvent::Toast {
            id: Uuid::new_v4(),
            level,
            message: message.into(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_events_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(AppEvent::AudioUnlockRequired);
        bus.toast(ToastLevel::Info, "3 new orders received");

        assert!(matches!(rx.try_recv(), Ok(AppEvent::AudioUnlockRequired)));
        match rx.try_recv() {
            Ok(AppEvent::Toast { level, message, .. }) => {
                assert_eq!(level, ToastLevel::Info);
                assert_eq!(message, "3 new orders received");
            }
            other => panic!("expected toast, got {other:?}"),
        }
    }

    #[test]
    fn emit_without_subscribers_is_dropped() {
        let bus = EventBus::default();
        bus.emit(AppEvent::SessionEnded {
            reason: SessionEndReason::SignedOut,
        });
    }

    #[test]
    fn events_serialize_with_a_type_tag() {
        let value = serde_json::to_value(AppEvent::OrdersUpdated { count: 3, page: 2 })
            .expect("serialize");
        assert_eq!(value["type"], "orders_updated");
        assert_eq!(value["count"], 3);
        assert_eq!(value["page"], 2);

        let value = serde_json::to_value(AppEvent::SessionEnded {
            reason: SessionEndReason::Expired,
        })
        .expect("serialize");
        assert_eq!(value["type"], "session_ended");
        assert_eq!(value["reason"], "expired");
    }
}
