//! Simulated upstream feed
//!
//! An in-process adapter over a fixed instrument universe, used by the demo
//! binary and scenario tests. Prices random-walk around a base image; the
//! polling call synthesizes one update per subscribed instrument per tick
//! interval.

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::models::fields::{FieldMap, FieldValue};

use super::{FeedAdapter, FeedError, FeedHandle, FeedPoll, MarketDataUpdate};

/// Identifier scheme for simulated instruments
pub const SIMULATED_SCHEME: &str = "SIM";

pub struct SimulatedFeedAdapter {
    /// Instrument universe: unique id to base image
    instruments: HashMap<String, FieldMap>,
    connected: AtomicBool,
    /// Currently subscribed ids and their issued handles
    subscribed: DashMap<String, FeedHandle>,
    next_handle: AtomicU64,
    snapshot_on_subscribe: bool,
    tick_interval: Duration,
}

impl SimulatedFeedAdapter {
    pub fn new(snapshot_on_subscribe: bool) -> Self {
        Self {
            instruments: HashMap::new(),
            connected: AtomicBool::new(false),
            subscribed: DashMap::new(),
            next_handle: AtomicU64::new(1),
            snapshot_on_subscribe,
            tick_interval: Duration::from_millis(250),
        }
    }

    /// Adds an instrument with a mid price; bid/ask are derived around it
    pub fn with_instrument(mut self, unique_id: impl Into<String>, mid: Decimal) -> Self {
        let spread = mid / Decimal::from(10_000);
        let mut image = FieldMap::new();
        image.insert("bid".to_string(), FieldValue::Decimal(mid - spread));
        image.insert("ask".to_string(), FieldValue::Decimal(mid + spread));
        image.insert("bid_size".to_string(), FieldValue::Integer(100));
        image.insert("ask_size".to_string(), FieldValue::Integer(100));
        self.instruments.insert(unique_id.into(), image);
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    fn require_connected(&self) -> Result<(), FeedError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(FeedError::ConnectionUnavailable(
                "simulated feed session not established".to_string(),
            ))
        }
    }

    /// Base image with a small random walk applied to bid and ask
    fn current_image(&self, unique_id: &str) -> Option<FieldMap> {
        let base = self.instruments.get(unique_id)?;
        let mut rng = rand::rng();
        let jitter = Decimal::new(rng.random_range(-50..=50), 4);

        let mut image = base.clone();
        for field in ["bid", "ask"] {
            if let Some(FieldValue::Decimal(price)) = image.get(field).cloned() {
                image.insert(field.to_string(), FieldValue::Decimal(price + jitter));
            }
        }
        Some(image)
    }
}

#[async_trait]
impl FeedAdapter for SimulatedFeedAdapter {
    async fn connect(&self) -> Result<(), FeedError> {
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!("simulated feed session established ({} instruments)", self.instruments.len());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), FeedError> {
        self.connected.store(false, Ordering::SeqCst);
        self.subscribed.clear();
        tracing::info!("simulated feed session closed");
        Ok(())
    }

    async fn subscribe(
        &self,
        unique_ids: &[String],
    ) -> Result<HashMap<String, FeedHandle>, FeedError> {
        self.require_connected()?;

        let mut handles = HashMap::new();
        for unique_id in unique_ids {
            if !self.instruments.contains_key(unique_id) {
                return Err(FeedError::Rejected(format!(
                    "unknown instrument {}",
                    unique_id
                )));
            }
            let handle = FeedHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
            self.subscribed.insert(unique_id.clone(), handle);
            handles.insert(unique_id.clone(), handle);
        }
        Ok(handles)
    }

    async fn unsubscribe(&self, handles: &[FeedHandle]) -> Result<(), FeedError> {
        self.require_connected()?;
        self.subscribed
            .retain(|_, issued| !handles.contains(issued));
        Ok(())
    }

    async fn snapshot(
        &self,
        unique_ids: &[String],
    ) -> Result<HashMap<String, Option<FieldMap>>, FeedError> {
        self.require_connected()?;

        let mut images = HashMap::new();
        for unique_id in unique_ids {
            match self.current_image(unique_id) {
                Some(image) => {
                    images.insert(unique_id.clone(), Some(image));
                }
                None => {
                    return Err(FeedError::Rejected(format!(
                        "unknown instrument {}",
                        unique_id
                    )))
                }
            }
        }
        Ok(images)
    }

    async fn poll_events(&self, max_wait: Duration) -> Result<FeedPoll, FeedError> {
        self.require_connected()?;

        tokio::time::sleep(max_wait.min(self.tick_interval)).await;

        if self.subscribed.is_empty() {
            return Ok(FeedPoll::Idle);
        }

        let updates: Vec<MarketDataUpdate> = self
            .subscribed
            .iter()
            .filter_map(|entry| {
                self.current_image(entry.key()).map(|fields| MarketDataUpdate {
                    unique_id: entry.key().clone(),
                    fields,
                })
            })
            .collect();

        Ok(FeedPoll::Updates(updates))
    }

    fn snapshot_on_subscribe_required(&self, _unique_id: &str) -> bool {
        self.snapshot_on_subscribe
    }

    fn unique_id_scheme(&self) -> &str {
        SIMULATED_SCHEME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn adapter() -> SimulatedFeedAdapter {
        SimulatedFeedAdapter::new(true)
            .with_instrument("1", dec!(1.0843))
            .with_instrument("41", dec!(2650.75))
            .with_tick_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_requires_session() {
        let feed = adapter();
        let err = feed.subscribe(&["1".to_string()]).await.unwrap_err();
        assert!(matches!(err, FeedError::ConnectionUnavailable(_)));
    }

    #[tokio::test]
    async fn test_subscribe_issues_handle_per_id() {
        let feed = adapter();
        feed.connect().await.unwrap();

        let ids = vec!["1".to_string(), "41".to_string()];
        let handles = feed.subscribe(&ids).await.unwrap();
        assert_eq!(handles.len(), 2);
        assert_ne!(handles["1"], handles["41"]);
    }

    #[tokio::test]
    async fn test_unknown_instrument_is_rejected() {
        let feed = adapter();
        feed.connect().await.unwrap();

        let err = feed.subscribe(&["999".to_string()]).await.unwrap_err();
        assert!(matches!(err, FeedError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_snapshot_covers_every_id() {
        let feed = adapter();
        feed.connect().await.unwrap();

        let ids = vec!["1".to_string(), "41".to_string()];
        let images = feed.snapshot(&ids).await.unwrap();
        assert_eq!(images.len(), 2);
        assert!(images["41"].as_ref().unwrap().contains_key("bid"));
    }

    #[tokio::test]
    async fn test_poll_produces_updates_for_subscribed() {
        let feed = adapter();
        feed.connect().await.unwrap();
        feed.subscribe(&["1".to_string()]).await.unwrap();

        match feed.poll_events(Duration::from_millis(5)).await.unwrap() {
            FeedPoll::Updates(updates) => {
                assert_eq!(updates.len(), 1);
                assert_eq!(updates[0].unique_id, "1");
            }
            other => panic!("expected updates, got {:?}", other),
        }
    }

    #[test]
    fn test_jitter_stays_bounded() {
        let mut rng = rand::rng();
        for _ in 0..100 {
            let jitter = Decimal::new(rng.random_range(-50..=50), 4);
            assert!(jitter.abs() <= dec!(0.0050));
        }
    }
}
