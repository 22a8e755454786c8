//! Event bus for the workflow progress stream.
//!
//! Grounded on the `events::bus::EventBus` pub/sub idiom
//! (Tokio broadcast channel, filtered subscriptions) narrowed to the
//! [`ProgressEvent`] shape the runner and UIs need — no persistence
//! layer, since checkpointing already durable-writes state (spec §4.14).

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::ProgressEvent;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("channel closed")]
    ChannelClosed,
}

pub type SharedEventBus = Arc<EventBus>;

pub struct EventBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    pub fn publish(&self, event: ProgressEvent) {
        let kind = event.kind();
        match self.sender.send(event) {
            Ok(count) => debug!(kind, receivers = count, "progress event published"),
            Err(_) => debug!(kind, "progress event published (no receivers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Selective subscription by node name prefix or event kind.
pub struct EventFilter {
    pub node_prefix: Option<String>,
    pub kinds: Option<Vec<&'static str>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self {
            node_prefix: None,
            kinds: None,
        }
    }

    pub fn node(mut self, prefix: &str) -> Self {
        self.node_prefix = Some(prefix.to_string());
        self
    }

    pub fn kinds(mut self, kinds: Vec<&'static str>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn matches(&self, event: &ProgressEvent) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }
        if let Some(prefix) = &self.node_prefix {
            let node = match event {
                ProgressEvent::NodeStart { node, .. } | ProgressEvent::NodeEnd { node, .. } => Some(node.as_str()),
                _ => None,
            };
            if node.map(|n| !n.starts_with(prefix.as_str())).unwrap_or(true) {
                return false;
            }
        }
        true
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FilteredReceiver {
    receiver: broadcast::Receiver<ProgressEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    pub fn new(receiver: broadcast::Receiver<ProgressEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    pub async fn recv(&mut self) -> Result<ProgressEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

pub trait EventBusExt {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl EventBusExt for EventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn publish_subscribe_round_trip() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(ProgressEvent::NodeStart {
            node: "planning".into(),
            phase: 1,
            data: serde_json::Value::Null,
            timestamp: Utc::now(),
        });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind(), "node_start");
    }

    #[tokio::test]
    async fn filter_by_kind_drops_non_matching_events() {
        let bus = EventBus::new();
        let filter = EventFilter::new().kinds(vec!["error"]);
        let mut filtered = bus.subscribe_filtered(filter);

        bus.publish(ProgressEvent::NodeStart {
            node: "planning".into(),
            phase: 1,
            data: serde_json::Value::Null,
            timestamp: Utc::now(),
        });
        bus.publish(ProgressEvent::Error {
            message: "boom".into(),
            node: None,
            timestamp: Utc::now(),
        });

        let event = filtered.recv().await.unwrap();
        assert_eq!(event.kind(), "error");
    }
}
