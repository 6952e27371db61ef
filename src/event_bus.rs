//! In-process pub/sub fan-out
//!
//! Decouples the engine from notification delivery. Publishing is synchronous
//! per topic: messages arrive at every subscriber in publish order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// The only topic the engine itself publishes on.
pub const NOTIFICATION_TOPIC: &str = "notification";

/// Payload published on the `"notification"` topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
}

impl Notification {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Topic-keyed fan-out bus.
///
/// Cloning is cheap; all clones share the same subscriber registry.
#[derive(Clone, Default)]
pub struct EventBus {
    topics: Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Notification>>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for `topic` and return its receiving end.
    pub fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut topics = self.topics.lock().expect("event bus lock poisoned");
        topics.entry(topic.to_string()).or_default().push(tx);
        rx
    }

    /// Fan `data` out to every live subscriber of `topic`.
    ///
    /// Subscribers whose receiver was dropped are pruned on the way.
    pub fn publish(&self, topic: &str, data: Notification) {
        let mut topics = self.topics.lock().expect("event bus lock poisoned");
        match topics.get_mut(topic) {
            Some(subscribers) => {
                subscribers.retain(|tx| tx.send(data.clone()).is_ok());
            }
            None => debug!("No subscribers for topic '{topic}', dropping message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe(NOTIFICATION_TOPIC);
        let mut b = bus.subscribe(NOTIFICATION_TOPIC);

        bus.publish(NOTIFICATION_TOPIC, Notification::new("hello"));

        assert_eq!(a.recv().await.unwrap().message, "hello");
        assert_eq!(b.recv().await.unwrap().message, "hello");
    }

    #[tokio::test]
    async fn test_delivery_preserves_publish_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(NOTIFICATION_TOPIC);

        for i in 0..5 {
            bus.publish(NOTIFICATION_TOPIC, Notification::new(format!("msg-{i}")));
        }
        for i in 0..5 {
            assert_eq!(rx.recv().await.unwrap().message, format!("msg-{i}"));
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_a_noop() {
        let bus = EventBus::new();
        bus.publish("other", Notification::new("nobody listens"));
    }

    #[tokio::test]
    async fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe(NOTIFICATION_TOPIC);
        drop(rx);

        bus.publish(NOTIFICATION_TOPIC, Notification::new("gone"));

        let mut rx2 = bus.subscribe(NOTIFICATION_TOPIC);
        bus.publish(NOTIFICATION_TOPIC, Notification::new("still works"));
        assert_eq!(rx2.recv().await.unwrap().message, "still works");
    }
}
