//! Downstream senders
//!
//! Each distributor pushes its normalized updates through one sender. The
//! factory seam keeps the broker ignorant of the outbound transport; the
//! default deployment publishes onto the WebSocket broadcaster's topics.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::models::request::LiveDataUpdate;
use crate::models::spec::DistributionSpec;
use crate::websocket::{Broadcaster, WsMessage};

pub trait MarketDataSender: Send + Sync {
    fn send(&self, update: &LiveDataUpdate);
}

pub trait MarketDataSenderFactory: Send + Sync {
    fn create(&self, spec: &DistributionSpec) -> Arc<dyn MarketDataSender>;
}

/// Factory whose senders drop everything. The default until a deployment
/// wires a real outbound path.
pub struct NullMarketDataSenderFactory;

struct NullSender;

impl MarketDataSender for NullSender {
    fn send(&self, _update: &LiveDataUpdate) {}
}

impl MarketDataSenderFactory for NullMarketDataSenderFactory {
    fn create(&self, _spec: &DistributionSpec) -> Arc<dyn MarketDataSender> {
        Arc::new(NullSender)
    }
}

/// Publishes updates as [`WsMessage::LiveData`] on the distribution's topic
pub struct BroadcastSenderFactory {
    broadcaster: Broadcaster,
}

impl BroadcastSenderFactory {
    pub fn new(broadcaster: Broadcaster) -> Self {
        Self { broadcaster }
    }
}

struct BroadcastSender {
    broadcaster: Broadcaster,
    topic: String,
}

impl MarketDataSender for BroadcastSender {
    fn send(&self, update: &LiveDataUpdate) {
        self.broadcaster.broadcast(
            &self.topic,
            WsMessage::LiveData {
                topic: self.topic.clone(),
                sequence: update.sequence,
                fields: update.fields.clone(),
                timestamp: Utc::now(),
            },
        );
    }
}

impl MarketDataSenderFactory for BroadcastSenderFactory {
    fn create(&self, spec: &DistributionSpec) -> Arc<dyn MarketDataSender> {
        Arc::new(BroadcastSender {
            broadcaster: self.broadcaster.clone(),
            topic: spec.topic().to_string(),
        })
    }
}

/// Records every update it is handed. Test and diagnostics support.
pub struct CollectingSenderFactory {
    sent: Arc<Mutex<Vec<LiveDataUpdate>>>,
}

impl CollectingSenderFactory {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Copy of everything sent so far, across all senders from this factory
    pub fn collected(&self) -> Vec<LiveDataUpdate> {
        self.sent.lock().clone()
    }
}

impl Default for CollectingSenderFactory {
    fn default() -> Self {
        Self::new()
    }
}

struct CollectingSender {
    sent: Arc<Mutex<Vec<LiveDataUpdate>>>,
}

impl MarketDataSender for CollectingSender {
    fn send(&self, update: &LiveDataUpdate) {
        self.sent.lock().push(update.clone());
    }
}

impl MarketDataSenderFactory for CollectingSenderFactory {
    fn create(&self, _spec: &DistributionSpec) -> Arc<dyn MarketDataSender> {
        Arc::new(CollectingSender {
            sent: Arc::clone(&self.sent),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fields::FieldMap;
    use crate::models::spec::LiveDataSpec;
    use crate::normalization::PassthroughPipeline;

    fn dspec() -> DistributionSpec {
        DistributionSpec::new(
            LiveDataSpec::single("raw", "SIM", "1"),
            "1",
            "live-data/1/raw",
            Arc::new(PassthroughPipeline),
        )
    }

    fn update() -> LiveDataUpdate {
        LiveDataUpdate {
            sequence: 7,
            specification: LiveDataSpec::single("raw", "SIM", "1"),
            fields: FieldMap::new(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_sender_publishes_on_topic() {
        let broadcaster = Broadcaster::new();
        let mut rx = broadcaster.subscribe("live-data/1/raw");

        let factory = BroadcastSenderFactory::new(broadcaster);
        let sender = factory.create(&dspec());
        sender.send(&update());

        match rx.recv().await.unwrap() {
            WsMessage::LiveData { topic, sequence, .. } => {
                assert_eq!(topic, "live-data/1/raw");
                assert_eq!(sequence, 7);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_collecting_sender_records() {
        let factory = CollectingSenderFactory::new();
        let sender = factory.create(&dspec());
        sender.send(&update());
        sender.send(&update());
        assert_eq!(factory.collected().len(), 2);
    }
}
