//! Subscription and distributor aggregates
//!
//! A [`Subscription`] is the per-upstream-id unit of bookkeeping: it owns the
//! feed handle, the last-known-value history, and one
//! [`MarketDataDistributor`] per distribution specification. Distributors are
//! the per-topic channels with their own persistence flag, expiry, and
//! send counters.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use crate::feed::FeedHandle;
use crate::history::{LastKnownValueStore, LastKnownValueStoreProvider};
use crate::models::fields::FieldMap;
use crate::models::request::LiveDataUpdate;
use crate::models::spec::{DistributionSpec, LiveDataSpec};
use crate::models::trace::DistributorTrace;
use crate::sender::{MarketDataSender, MarketDataSenderFactory};

/// Live distribution channel for one (subscription, distribution spec) pair
pub struct MarketDataDistributor {
    spec: DistributionSpec,
    persistent: AtomicBool,
    /// Logical TTL enforced by the expiry sweep, epoch millis
    expiry_millis: AtomicI64,
    messages_sent: AtomicU64,
    sequence: AtomicU64,
    last_snapshot: RwLock<Option<LiveDataUpdate>>,
    sender: Arc<dyn MarketDataSender>,
}

impl MarketDataDistributor {
    fn new(spec: DistributionSpec, persistent: bool, sender: Arc<dyn MarketDataSender>) -> Self {
        Self {
            spec,
            persistent: AtomicBool::new(persistent),
            expiry_millis: AtomicI64::new(Utc::now().timestamp_millis()),
            messages_sent: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            last_snapshot: RwLock::new(None),
            sender,
        }
    }

    pub fn distribution_spec(&self) -> &DistributionSpec {
        &self.spec
    }

    pub fn fully_qualified_spec(&self) -> &LiveDataSpec {
        self.spec.fully_qualified_spec()
    }

    pub fn unique_id(&self) -> &str {
        self.spec.unique_id()
    }

    pub fn topic(&self) -> &str {
        self.spec.topic()
    }

    /// A persistent distributor survives expiry sweeps until demoted
    pub fn is_persistent(&self) -> bool {
        self.persistent.load(Ordering::SeqCst)
    }

    pub fn set_persistent(&self, persistent: bool) {
        self.persistent.store(persistent, Ordering::SeqCst);
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        let millis = self.expiry_millis.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
    }

    pub fn set_expiry(&self, expiry: DateTime<Utc>) {
        self.expiry_millis
            .store(expiry.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_millis.load(Ordering::SeqCst) < now.timestamp_millis()
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::SeqCst)
    }

    /// Most recent normalized value, None until data has flowed
    pub fn snapshot(&self) -> Option<LiveDataUpdate> {
        self.last_snapshot.read().clone()
    }

    /// Normalizes one raw message and pushes it downstream. Messages that do
    /// not survive normalization are dropped silently on this path.
    pub fn distribute(&self, raw: &FieldMap, unique_id: &str) {
        let Some(normalized) = self.spec.normalize(raw.clone(), unique_id) else {
            tracing::trace!("update for {} dropped by normalization", unique_id);
            return;
        };
        let update = LiveDataUpdate {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            specification: self.fully_qualified_spec().clone(),
            fields: normalized,
        };
        self.sender.send(&update);
        self.messages_sent.fetch_add(1, Ordering::SeqCst);
        *self.last_snapshot.write() = Some(update);
    }

    /// Seeds the cached snapshot from an initial image without publishing.
    /// Sequence 0 marks a value that predates live distribution.
    pub fn seed_snapshot(&self, image: &FieldMap, unique_id: &str) {
        if let Some(normalized) = self.spec.normalize(image.clone(), unique_id) {
            *self.last_snapshot.write() = Some(LiveDataUpdate {
                sequence: 0,
                specification: self.fully_qualified_spec().clone(),
                fields: normalized,
            });
        }
    }

    pub fn trace(&self, now: DateTime<Utc>) -> DistributorTrace {
        DistributorTrace {
            topic: self.topic().to_string(),
            expiry: self.expiry(),
            expired: self.has_expired(now),
            persistent: self.is_persistent(),
            messages_sent: self.messages_sent(),
        }
    }
}

impl fmt::Debug for MarketDataDistributor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarketDataDistributor")
            .field("spec", &self.spec)
            .field("persistent", &self.is_persistent())
            .field("messages_sent", &self.messages_sent())
            .finish()
    }
}

/// Per-upstream-id aggregate owning the feed handle, value history, and
/// distributors
pub struct Subscription {
    unique_id: String,
    created_at: DateTime<Utc>,
    handle: RwLock<Option<FeedHandle>>,
    history: Arc<dyn LastKnownValueStore>,
    distributors: RwLock<HashMap<LiveDataSpec, Arc<MarketDataDistributor>>>,
    sender_factory: Arc<dyn MarketDataSenderFactory>,
}

impl Subscription {
    pub fn new(
        unique_id: impl Into<String>,
        sender_factory: Arc<dyn MarketDataSenderFactory>,
        lkv_provider: &dyn LastKnownValueStoreProvider,
    ) -> Self {
        let unique_id = unique_id.into();
        let history = lkv_provider.new_store(&unique_id);
        Self {
            unique_id,
            created_at: Utc::now(),
            handle: RwLock::new(None),
            history,
            distributors: RwLock::new(HashMap::new()),
            sender_factory,
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn handle(&self) -> Option<FeedHandle> {
        *self.handle.read()
    }

    pub fn set_handle(&self, handle: FeedHandle) {
        *self.handle.write() = Some(handle);
    }

    /// Invalidates the handle; used when the upstream session drops
    pub fn clear_handle(&self) {
        *self.handle.write() = None;
    }

    pub fn history(&self) -> &Arc<dyn LastKnownValueStore> {
        &self.history
    }

    /// Gets or creates the distributor for a distribution specification.
    /// A repeat request reuses the existing distributor; asking for
    /// persistence promotes it, but a transient repeat never demotes one.
    pub fn create_distributor(
        &self,
        spec: DistributionSpec,
        persistent: bool,
    ) -> Arc<MarketDataDistributor> {
        let mut distributors = self.distributors.write();
        if let Some(existing) = distributors.get(spec.fully_qualified_spec()) {
            if persistent {
                existing.set_persistent(true);
            }
            return Arc::clone(existing);
        }
        let sender = self.sender_factory.create(&spec);
        let distributor = Arc::new(MarketDataDistributor::new(spec, persistent, sender));
        distributors.insert(
            distributor.fully_qualified_spec().clone(),
            Arc::clone(&distributor),
        );
        tracing::debug!(
            "created distributor for {} on topic {}",
            self.unique_id,
            distributor.topic()
        );
        distributor
    }

    pub fn remove_distributor(&self, fully_qualified_spec: &LiveDataSpec) {
        self.distributors.write().remove(fully_qualified_spec);
    }

    pub fn remove_all_distributors(&self) {
        self.distributors.write().clear();
    }

    pub fn distributors(&self) -> Vec<Arc<MarketDataDistributor>> {
        self.distributors.read().values().cloned().collect()
    }

    pub fn distributor_for(
        &self,
        fully_qualified_spec: &LiveDataSpec,
    ) -> Option<Arc<MarketDataDistributor>> {
        self.distributors.read().get(fully_qualified_spec).cloned()
    }

    pub fn has_distributors(&self) -> bool {
        !self.distributors.read().is_empty()
    }

    /// Folds an initial snapshot image into the history and seeds every
    /// distributor's cached value
    pub fn initial_snapshot_received(&self, image: &FieldMap) {
        self.history.update(image);
        for distributor in self.distributors() {
            distributor.seed_snapshot(image, &self.unique_id);
        }
    }

    /// Applies one live update: history first, then distribution
    pub fn live_data_received(&self, fields: FieldMap) {
        self.history.update(&fields);
        for distributor in self.distributors() {
            distributor.distribute(&fields, &self.unique_id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("unique_id", &self.unique_id)
            .field("created_at", &self.created_at)
            .field("handle", &self.handle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MapLastKnownValueStoreProvider;
    use crate::models::fields::FieldValue;
    use crate::normalization::{FieldFilterPipeline, PassthroughPipeline};
    use crate::sender::CollectingSenderFactory;
    use rust_decimal_macros::dec;

    fn dspec(unique_id: &str) -> DistributionSpec {
        DistributionSpec::new(
            LiveDataSpec::single("raw", "SIM", unique_id),
            unique_id,
            format!("live-data/{}/raw", unique_id),
            Arc::new(PassthroughPipeline),
        )
    }

    fn tick(bid: rust_decimal::Decimal) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("bid".to_string(), FieldValue::Decimal(bid));
        fields
    }

    #[test]
    fn test_distribute_sends_and_counts() {
        let factory = Arc::new(CollectingSenderFactory::new());
        let subscription =
            Subscription::new("1", factory.clone(), &MapLastKnownValueStoreProvider);
        let distributor = subscription.create_distributor(dspec("1"), false);

        subscription.live_data_received(tick(dec!(1.10)));
        subscription.live_data_received(tick(dec!(1.11)));

        assert_eq!(distributor.messages_sent(), 2);
        let sent = factory.collected();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].sequence, 1);
        assert_eq!(sent[1].sequence, 2);
        let snapshot = distributor.snapshot().unwrap();
        assert_eq!(snapshot.fields.get("bid"), Some(&FieldValue::Decimal(dec!(1.11))));
    }

    #[test]
    fn test_create_distributor_reuses_and_promotes() {
        let factory = Arc::new(CollectingSenderFactory::new());
        let subscription = Subscription::new("1", factory, &MapLastKnownValueStoreProvider);

        let first = subscription.create_distributor(dspec("1"), false);
        assert!(!first.is_persistent());

        let second = subscription.create_distributor(dspec("1"), true);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.is_persistent());

        // a later transient request must not demote
        let third = subscription.create_distributor(dspec("1"), false);
        assert!(Arc::ptr_eq(&first, &third));
        assert!(first.is_persistent());
    }

    #[test]
    fn test_initial_snapshot_seeds_without_publishing() {
        let factory = Arc::new(CollectingSenderFactory::new());
        let subscription =
            Subscription::new("1", factory.clone(), &MapLastKnownValueStoreProvider);
        let distributor = subscription.create_distributor(dspec("1"), false);

        subscription.initial_snapshot_received(&tick(dec!(1.08)));

        assert!(factory.collected().is_empty());
        assert_eq!(distributor.messages_sent(), 0);
        let seeded = distributor.snapshot().unwrap();
        assert_eq!(seeded.sequence, 0);
        assert!(!subscription.history().is_empty());
    }

    #[test]
    fn test_normalization_can_drop_updates() {
        let factory = Arc::new(CollectingSenderFactory::new());
        let subscription =
            Subscription::new("1", factory.clone(), &MapLastKnownValueStoreProvider);
        let filtered = DistributionSpec::new(
            LiveDataSpec::single("prices", "SIM", "1"),
            "1",
            "live-data/1/prices",
            Arc::new(FieldFilterPipeline::new(["ask"])),
        );
        let distributor = subscription.create_distributor(filtered, false);

        // carries only "bid", which the pipeline filters out
        subscription.live_data_received(tick(dec!(1.10)));

        assert_eq!(distributor.messages_sent(), 0);
        assert!(factory.collected().is_empty());
        // the history still advanced, only distribution was dropped
        assert!(!subscription.history().is_empty());
    }

    #[test]
    fn test_expiry_bookkeeping() {
        let factory = Arc::new(CollectingSenderFactory::new());
        let subscription = Subscription::new("1", factory, &MapLastKnownValueStoreProvider);
        let distributor = subscription.create_distributor(dspec("1"), false);

        let future = Utc::now() + chrono::Duration::seconds(60);
        distributor.set_expiry(future);
        assert!(!distributor.has_expired(Utc::now()));

        let past = Utc::now() - chrono::Duration::seconds(1);
        distributor.set_expiry(past);
        assert!(distributor.has_expired(Utc::now()));
    }
}
