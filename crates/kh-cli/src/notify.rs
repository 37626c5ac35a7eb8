//! Fire-and-forget notification channel for hub events.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

pub const EVENT_UPDATE: &str = "update";
pub const EVENT_EMERGENCE: &str = "emergence:detected";
pub const EVENT_CONNECTED: &str = "source:connected";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Notification {
    /// Target room; `None` reaches every listener.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    pub event: String,
    pub payload: Value,
}

pub trait Notifier: Send + Sync {
    fn emit(&self, event: &str, payload: Value);

    fn emit_to(&self, room: &str, event: &str, payload: Value);
}

/// Tokio broadcast fan-out. Sending with no subscribers is not an error.
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Notification>,
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    fn send(&self, notification: Notification) {
        if self.sender.send(notification).is_err() {
            tracing::trace!("notification dropped, no listeners");
        }
    }
}

impl Notifier for BroadcastNotifier {
    fn emit(&self, event: &str, payload: Value) {
        self.send(Notification {
            room: None,
            event: event.to_string(),
            payload,
        });
    }

    fn emit_to(&self, room: &str, event: &str, payload: Value) {
        self.send(Notification {
            room: Some(room.to_string()),
            event: event.to_string(),
            payload,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_room_scoped_emit() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();

        notifier.emit_to("neuro", EVENT_UPDATE, serde_json::json!({"count": 2}));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.room.as_deref(), Some("neuro"));
        assert_eq!(got.payload["count"], 2);
    }

    #[test]
    fn test_emit_without_listeners_is_silent() {
        BroadcastNotifier::default().emit(EVENT_EMERGENCE, Value::Null);
    }
}
