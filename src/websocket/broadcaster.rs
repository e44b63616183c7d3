use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::messages::WsMessage;

/// Topic-keyed fan-out for downstream WebSocket consumers
///
/// One broadcast channel per topic, created lazily on first subscribe or
/// publish. DashMap keeps topic lookup concurrent so the tick path never
/// queues behind subscription churn.
#[derive(Clone)]
pub struct Broadcaster {
    channels: Arc<DashMap<String, broadcast::Sender<WsMessage>>>,
    capacity: usize,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity,
        }
    }

    fn get_or_create_channel(&self, topic: &str) -> broadcast::Sender<WsMessage> {
        self.channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Subscribe to a topic
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<WsMessage> {
        self.get_or_create_channel(topic).subscribe()
    }

    /// Publish to a topic. Messages on topics nobody listens to are dropped.
    pub fn broadcast(&self, topic: &str, message: WsMessage) {
        if let Some(sender) = self.channels.get(topic) {
            let _ = sender.send(message);
        }
    }

    /// Number of listeners on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.channels
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Drops channels that lost their last listener
    pub fn cleanup_empty_channels(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
