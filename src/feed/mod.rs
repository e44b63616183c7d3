//! Upstream feed adapter contract
//!
//! The broker is generic over one trait that covers the whole capability set
//! of a vendor gateway: session lifecycle, bulk subscribe/unsubscribe,
//! on-demand images, event polling, and two policy hooks. Concrete adapters
//! live behind this seam; the broker never assumes a transport.

pub mod simulated;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::models::fields::FieldMap;

pub use simulated::SimulatedFeedAdapter;

/// Opaque token identifying one upstream subscription. Only the adapter that
/// issued it can interpret it; the broker just stores and returns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedHandle(u64);

impl FeedHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// One live update pulled off the feed
#[derive(Debug, Clone)]
pub struct MarketDataUpdate {
    pub unique_id: String,
    pub fields: FieldMap,
}

/// Per-iteration outcome of one event-polling call
#[derive(Debug)]
pub enum FeedPoll {
    /// Updates arrived within the wait window
    Updates(Vec<MarketDataUpdate>),
    /// The wait window elapsed without events
    Idle,
    /// The feed signalled end of session; the dispatch loop must terminate
    Disconnected,
}

#[derive(Debug, Error)]
pub enum FeedError {
    /// No session with the upstream feed. The dispatch loop backs off and
    /// retries on this; administrative calls surface it to the caller.
    #[error("no connection to the upstream feed: {0}")]
    ConnectionUnavailable(String),

    /// The feed refused the request (unknown id, malformed request)
    #[error("feed rejected request: {0}")]
    Rejected(String),

    /// Transport-level failure underneath the session
    #[error("feed transport failure: {0}")]
    Transport(String),
}

/// The capability set the broker requires of an upstream feed
///
/// Batch contract: `subscribe` and `snapshot` must populate an entry for
/// every input id or return an error. A map missing a key is treated by the
/// broker as a contract violation.
#[async_trait]
pub trait FeedAdapter: Send + Sync {
    /// Establishes the upstream session. Only called while disconnected.
    async fn connect(&self) -> Result<(), FeedError>;

    /// Tears down the upstream session. Only called while connected.
    async fn disconnect(&self) -> Result<(), FeedError>;

    /// Bulk subscribe; returns a handle per input id
    async fn subscribe(
        &self,
        unique_ids: &[String],
    ) -> Result<HashMap<String, FeedHandle>, FeedError>;

    /// Bulk unsubscribe using previously issued handles
    async fn unsubscribe(&self, handles: &[FeedHandle]) -> Result<(), FeedError>;

    /// On-demand image retrieval; an entry per input id, None when the feed
    /// has no image for a known id
    async fn snapshot(
        &self,
        unique_ids: &[String],
    ) -> Result<HashMap<String, Option<FieldMap>>, FeedError>;

    /// Waits up to `max_wait` for the next batch of events
    async fn poll_events(&self, max_wait: Duration) -> Result<FeedPoll, FeedError>;

    /// Whether a fresh subscription needs an explicit initial image because
    /// the feed does not push a full field set on subscribe
    fn snapshot_on_subscribe_required(&self, unique_id: &str) -> bool;

    /// Whether a subscription that has received no data implies that a
    /// snapshot would also be empty. Safe to answer from the subscription
    /// only when an initial image was required, since otherwise values may
    /// simply not have arrived yet.
    fn empty_subscription_implies_empty_snapshot(&self, unique_id: &str) -> bool {
        self.snapshot_on_subscribe_required(unique_id)
    }

    /// The identifier scheme of the feed's own unique ids
    fn unique_id_scheme(&self) -> &str;
}
