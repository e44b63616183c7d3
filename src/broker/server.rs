//! The subscription/distribution orchestrator
//!
//! [`LiveDataBroker`] owns the global state: the unique-id index, the
//! fully-qualified-spec index, the active set, and the connection status.
//! Administrative operations (subscribe, unsubscribe, snapshot, the expiry
//! sweep) are linearized behind one structural mutex held for the whole
//! operation, including rollback. The tick path reads the unique-id index
//! through a concurrent map and never takes that mutex.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use utoipa::ToSchema;

use crate::entitlement::{EntitlementChecker, PermissiveEntitlementChecker};
use crate::feed::FeedAdapter;
use crate::history::{LastKnownValueStoreProvider, MapLastKnownValueStoreProvider};
use crate::metrics::UpdateRateCounter;
use crate::models::fields::{permission_denied_message, FieldMap};
use crate::models::request::{
    LiveDataUpdate, ResponseBatch, SubscriptionRequest, SubscriptionResponse, SubscriptionResult,
    SubscriptionType,
};
use crate::models::spec::LiveDataSpec;
use crate::models::trace::SubscriptionTrace;
use crate::resolver::{DistributionSpecResolver, DEFAULT_RULESET};
use crate::sender::{MarketDataSenderFactory, NullMarketDataSenderFactory};

use super::error::BrokerError;
use super::expiration::ExpirationManager;
use super::listener::{notify_subscribed, notify_unsubscribed, SubscriptionListener};
use super::subscription::{MarketDataDistributor, Subscription};

/// Whether the broker holds a session with the upstream feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    NotConnected,
}

/// Tuning knobs for the broker
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// How far each subscribe pushes a distributor's expiry into the future
    pub expiry_extension: chrono::Duration,
    /// Fixed period between expiry sweep passes
    pub sweep_period: std::time::Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            expiry_extension: chrono::Duration::seconds(180),
            sweep_period: std::time::Duration::from_secs(60),
        }
    }
}

/// Pre-subscribe validation hook, run over newly staged unique ids before
/// the feed is touched. Rejection fails the whole call and rolls back.
pub trait SubscribeValidator: Send + Sync {
    fn check_subscribe(&self, unique_ids: &[String]) -> Result<(), String>;
}

/// Structural state guarded by the broker's one mutex
struct Indices {
    /// Subscriptions with an established upstream handle
    active: HashMap<String, Arc<Subscription>>,
    /// Fully qualified spec to its currently live distributor
    distributors: HashMap<LiveDataSpec, Arc<MarketDataDistributor>>,
}

pub struct LiveDataBroker {
    adapter: Arc<dyn FeedAdapter>,
    resolver: Arc<dyn DistributionSpecResolver>,
    entitlement: Arc<dyn EntitlementChecker>,
    sender_factory: Arc<dyn MarketDataSenderFactory>,
    lkv_provider: Arc<dyn LastKnownValueStoreProvider>,
    config: BrokerConfig,

    connection_status: RwLock<ConnectionStatus>,
    /// Unique-id index. Reads are lock-free for the tick path; writes happen
    /// only while holding `indices`.
    subscriptions_by_id: DashMap<String, Arc<Subscription>>,
    indices: Mutex<Indices>,
    /// Serializes start/stop/connect/disconnect against each other
    lifecycle: Mutex<()>,

    listeners: RwLock<Vec<Arc<dyn SubscriptionListener>>>,
    subscribe_validator: RwLock<Option<Arc<dyn SubscribeValidator>>>,

    expiration: ExpirationManager,
    updates_received: AtomicU64,
    update_rate: UpdateRateCounter,
}

impl LiveDataBroker {
    pub fn new(
        adapter: Arc<dyn FeedAdapter>,
        resolver: Arc<dyn DistributionSpecResolver>,
        config: BrokerConfig,
    ) -> Self {
        Self {
            adapter,
            resolver,
            entitlement: Arc::new(PermissiveEntitlementChecker),
            sender_factory: Arc::new(NullMarketDataSenderFactory),
            lkv_provider: Arc::new(MapLastKnownValueStoreProvider),
            expiration: ExpirationManager::new(config.sweep_period),
            config,
            connection_status: RwLock::new(ConnectionStatus::NotConnected),
            subscriptions_by_id: DashMap::new(),
            indices: Mutex::new(Indices {
                active: HashMap::new(),
                distributors: HashMap::new(),
            }),
            lifecycle: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
            subscribe_validator: RwLock::new(None),
            updates_received: AtomicU64::new(0),
            update_rate: UpdateRateCounter::new(),
        }
    }

    pub fn set_entitlement_checker(&mut self, checker: Arc<dyn EntitlementChecker>) {
        self.entitlement = checker;
    }

    pub fn set_sender_factory(&mut self, factory: Arc<dyn MarketDataSenderFactory>) {
        self.sender_factory = factory;
    }

    pub fn set_lkv_provider(&mut self, provider: Arc<dyn LastKnownValueStoreProvider>) {
        self.lkv_provider = provider;
    }

    pub fn add_subscription_listener(&self, listener: Arc<dyn SubscriptionListener>) {
        self.listeners.write().push(listener);
    }

    pub fn set_subscribe_validator(&self, validator: Arc<dyn SubscribeValidator>) {
        *self.subscribe_validator.write() = Some(validator);
    }

    pub(crate) fn adapter(&self) -> &Arc<dyn FeedAdapter> {
        &self.adapter
    }

    // ------------------------------------------------------------------
    // Connection lifecycle

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.connection_status.read()
    }

    /// Flips the status. On transition to NotConnected every tracked
    /// subscription's feed handle is invalidated; nothing is sent against a
    /// cleared handle until reestablishment.
    pub fn set_connection_status(&self, status: ConnectionStatus) {
        *self.connection_status.write() = status;
        tracing::info!("connection status changed to {:?}", status);

        if status == ConnectionStatus::NotConnected {
            for entry in self.subscriptions_by_id.iter() {
                entry.value().clear_handle();
            }
        }
    }

    fn verify_connected(&self) -> Result<(), BrokerError> {
        if self.connection_status() == ConnectionStatus::NotConnected {
            return Err(BrokerError::NotConnected);
        }
        Ok(())
    }

    async fn connect_inner(&self) -> Result<(), BrokerError> {
        if self.connection_status() != ConnectionStatus::NotConnected {
            return Err(BrokerError::AlreadyConnected);
        }
        self.adapter.connect().await?;
        self.set_connection_status(ConnectionStatus::Connected);
        Ok(())
    }

    async fn disconnect_inner(&self) -> Result<(), BrokerError> {
        if self.connection_status() != ConnectionStatus::Connected {
            return Err(BrokerError::NotConnected);
        }
        self.adapter.disconnect().await?;
        self.set_connection_status(ConnectionStatus::NotConnected);
        Ok(())
    }

    pub async fn connect(&self) -> Result<(), BrokerError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.connect_inner().await
    }

    pub async fn disconnect(&self) -> Result<(), BrokerError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.disconnect_inner().await
    }

    /// Connects and starts the expiry sweep. A no-op when already running.
    pub async fn start(self: &Arc<Self>) -> Result<(), BrokerError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.connection_status() == ConnectionStatus::NotConnected {
            self.connect_inner().await?;
            self.expiration.start(Arc::clone(self));
        }
        Ok(())
    }

    /// Disconnects and stops the expiry sweep. A no-op when already stopped.
    pub async fn stop(&self) -> Result<(), BrokerError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.connection_status() == ConnectionStatus::Connected {
            self.disconnect_inner().await?;
            self.expiration.stop();
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.connection_status() == ConnectionStatus::Connected
    }

    /// Re-issues one bulk subscribe for every tracked unique id after a
    /// reconnect. Ids the feed fails to hand back are dropped from tracking;
    /// the dropped set is returned so callers can tell a full recovery from
    /// one with gaps. Feed errors make this a logged no-op.
    pub async fn reestablish_subscriptions(&self) -> Vec<String> {
        let mut indices = self.indices.lock().await;

        let unique_ids: Vec<String> = self
            .subscriptions_by_id
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        tracing::warn!(
            "attempting to re-establish subscriptions for {} instruments",
            unique_ids.len()
        );
        if unique_ids.is_empty() {
            return Vec::new();
        }

        let handles = match self.adapter.subscribe(&unique_ids).await {
            Ok(handles) => handles,
            Err(e) => {
                tracing::error!("could not re-establish subscriptions: {}", e);
                return Vec::new();
            }
        };
        if handles.len() != unique_ids.len() {
            tracing::warn!(
                "re-established {} of {} subscriptions",
                handles.len(),
                unique_ids.len()
            );
        }

        let mut dropped = Vec::new();
        for unique_id in unique_ids {
            let Some(subscription) = self
                .subscriptions_by_id
                .get(&unique_id)
                .map(|entry| Arc::clone(entry.value()))
            else {
                continue;
            };
            match handles.get(&unique_id) {
                Some(handle) => {
                    tracing::debug!("reconnected to {}", unique_id);
                    subscription.set_handle(*handle);
                }
                None => {
                    tracing::warn!(
                        "could not reconnect to {}, removing it from tracking",
                        unique_id
                    );
                    self.subscriptions_by_id.remove(&unique_id);
                    indices.active.remove(&unique_id);
                    for distributor in subscription.distributors() {
                        indices.distributors.remove(distributor.fully_qualified_spec());
                    }
                    subscription.remove_all_distributors();
                    dropped.push(unique_id);
                }
            }
        }
        dropped
    }

    // ------------------------------------------------------------------
    // Subscribe

    /// The spec a bare unique id maps to: the feed's own scheme under the
    /// default ruleset
    pub fn default_spec_for(&self, unique_id: &str) -> LiveDataSpec {
        LiveDataSpec::single(DEFAULT_RULESET, self.adapter.unique_id_scheme(), unique_id)
    }

    /// Single-id convenience over [`subscribe`](Self::subscribe), with the
    /// batch contract checked on the way out
    pub async fn subscribe_by_id(
        &self,
        unique_id: &str,
        persistent: bool,
    ) -> Result<SubscriptionResponse, BrokerError> {
        let spec = self.default_spec_for(unique_id);
        let mut responses = self.subscribe(std::slice::from_ref(&spec), persistent).await?;

        if responses.len() != 1 {
            return Ok(SubscriptionResponse::failure(
                spec,
                SubscriptionResult::InternalError,
                "subscribe did not produce exactly one response for one specification",
            ));
        }
        let response = responses.remove(0);
        if response.requested_spec != spec {
            return Ok(SubscriptionResponse::failure(
                spec.clone(),
                SubscriptionResult::InternalError,
                format!(
                    "expected a response for {} but received one for {}",
                    spec, response.requested_spec
                ),
            ));
        }
        Ok(response)
    }

    /// Batch subscribe. Returns exactly one response per input spec.
    ///
    /// Newly created state is all-or-nothing: if anything fails after
    /// staging, every subscription and distributor staged by this call is
    /// removed from all indices and the error is returned. Distributors that
    /// were merely reused (expiry bumped) are untouched by a failed call.
    pub async fn subscribe(
        &self,
        specs: &[LiveDataSpec],
        persistent: bool,
    ) -> Result<Vec<SubscriptionResponse>, BrokerError> {
        tracing::info!(
            "subscribe requested for {} specs, persistent = {}",
            specs.len(),
            persistent
        );
        self.verify_connected()?;

        let mut indices = self.indices.lock().await;

        let expiry = Utc::now() + self.config.expiry_extension;
        let resolved = self.resolver.resolve(specs).await;

        let mut responses: Vec<Option<SubscriptionResponse>> = vec![None; specs.len()];
        // brand-new subscriptions staged by this call, keyed by unique id
        let mut staged: HashMap<String, Arc<Subscription>> = HashMap::new();
        // request index that created each staged subscription, for rewriting
        // its response if the initial image reports a permission denial
        let mut staged_request_idx: HashMap<String, usize> = HashMap::new();
        // new distributors attached to subscriptions that already existed
        let mut staged_attachments: Vec<(Arc<Subscription>, LiveDataSpec)> = Vec::new();

        for (i, spec) in specs.iter().enumerate() {
            let Some(dspec) = resolved.get(spec) else {
                tracing::info!("unable to resolve a distribution specification for {}", spec);
                responses[i] = Some(SubscriptionResponse::failure(
                    spec.clone(),
                    SubscriptionResult::NotPresent,
                    "unable to resolve a distribution specification",
                ));
                continue;
            };

            let fully_qualified = dspec.fully_qualified_spec();
            if let Some(existing) = indices.distributors.get(fully_qualified) {
                // idempotent re-subscribe, possibly via an alias staged
                // earlier in this very batch: bump the expiry, no feed call
                tracing::info!("already subscribed to {}", fully_qualified);
                existing.set_expiry(expiry);
                if persistent {
                    existing.set_persistent(true);
                }
                responses[i] = Some(SubscriptionResponse::subscribed(spec.clone(), dspec));
                continue;
            }

            let unique_id = dspec.unique_id().to_string();
            let subscription = if let Some(staged_sub) = staged.get(&unique_id) {
                Arc::clone(staged_sub)
            } else if let Some(tracked) = self.subscriptions_by_id.get(&unique_id) {
                // a tracked instrument gaining another distribution; no new
                // upstream subscribe is needed
                let tracked = Arc::clone(tracked.value());
                staged_attachments.push((Arc::clone(&tracked), fully_qualified.clone()));
                tracked
            } else {
                let subscription = Arc::new(Subscription::new(
                    unique_id.clone(),
                    Arc::clone(&self.sender_factory),
                    self.lkv_provider.as_ref(),
                ));
                staged.insert(unique_id.clone(), Arc::clone(&subscription));
                staged_request_idx.insert(unique_id.clone(), i);
                tracing::info!("created subscription for {}", fully_qualified);
                subscription
            };

            let distributor = subscription.create_distributor(dspec.clone(), persistent);
            distributor.set_expiry(expiry);
            // indexed immediately so that later aliases in this batch reuse
            // this distributor instead of creating another
            indices
                .distributors
                .insert(distributor.fully_qualified_spec().clone(), distributor);
            responses[i] = Some(SubscriptionResponse::subscribed(spec.clone(), dspec));
        }

        let commit = self
            .commit_staged(&mut indices, &staged, &staged_request_idx, specs, &mut responses)
            .await;

        let newly_active = match commit {
            Ok(newly_active) => newly_active,
            Err(e) => {
                tracing::warn!("subscribe failed, rolling back staged state: {}", e);
                for (unique_id, subscription) in &staged {
                    self.subscriptions_by_id.remove(unique_id);
                    indices.active.remove(unique_id);
                    for distributor in subscription.distributors() {
                        indices.distributors.remove(distributor.fully_qualified_spec());
                    }
                }
                for (subscription, fully_qualified) in &staged_attachments {
                    subscription.remove_distributor(fully_qualified);
                    indices.distributors.remove(fully_qualified);
                }
                return Err(e);
            }
        };
        drop(indices);

        // observer fan-out happens outside the structural lock
        let listeners = self.listeners.read().clone();
        for subscription in &newly_active {
            notify_subscribed(&listeners, subscription);
        }

        Ok(responses
            .into_iter()
            .enumerate()
            .map(|(i, response)| {
                response.unwrap_or_else(|| {
                    SubscriptionResponse::failure(
                        specs[i].clone(),
                        SubscriptionResult::InternalError,
                        "subscribe recorded no response for this specification",
                    )
                })
            })
            .collect())
    }

    /// Steps of subscribe that can fail after staging: validation hook,
    /// initial images, index publication, and the upstream subscribe
    async fn commit_staged(
        &self,
        indices: &mut Indices,
        staged: &HashMap<String, Arc<Subscription>>,
        staged_request_idx: &HashMap<String, usize>,
        specs: &[LiveDataSpec],
        responses: &mut [Option<SubscriptionResponse>],
    ) -> Result<Vec<Arc<Subscription>>, BrokerError> {
        let staged_ids: Vec<String> = staged.keys().cloned().collect();

        if let Some(validator) = self.subscribe_validator.read().clone() {
            validator
                .check_subscribe(&staged_ids)
                .map_err(BrokerError::SubscribeRejected)?;
        }

        // some feeds do not push a full image on subscribe; fetch one
        // explicitly for those
        let need_image: Vec<String> = staged
            .values()
            .filter(|s| self.adapter.snapshot_on_subscribe_required(s.unique_id()))
            .map(|s| s.unique_id().to_string())
            .collect();
        if !need_image.is_empty() {
            tracing::info!("initial image required for {:?}", need_image);
            let images = self.adapter.snapshot(&need_image).await?;
            for (unique_id, image) in &images {
                let Some(subscription) = staged.get(unique_id) else {
                    continue;
                };
                let Some(fields) = image else { continue };
                if let Some(denial) = permission_denied_message(fields) {
                    // only this spec fails; siblings in the batch proceed
                    let Some(&idx) = staged_request_idx.get(unique_id) else {
                        continue;
                    };
                    tracing::info!(
                        "entitlement denied in initial image for {}: {}",
                        unique_id,
                        denial
                    );
                    responses[idx] = Some(SubscriptionResponse::failure(
                        specs[idx].clone(),
                        SubscriptionResult::NotAuthorized,
                        denial,
                    ));
                } else {
                    subscription.initial_snapshot_received(fields);
                }
            }
        }

        // publish the bookkeeping before the upstream subscribe so ticks
        // racing in right after it are not dropped for lack of an entry
        for (unique_id, subscription) in staged {
            self.subscriptions_by_id
                .insert(unique_id.clone(), Arc::clone(subscription));
        }

        if staged_ids.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!("creating upstream subscriptions for {:?}", staged_ids);
        let handles = self.adapter.subscribe(&staged_ids).await?;
        for unique_id in &staged_ids {
            if !handles.contains_key(unique_id) {
                return Err(BrokerError::ContractViolation(format!(
                    "feed subscribe returned no handle for {}",
                    unique_id
                )));
            }
        }

        let mut newly_active = Vec::new();
        for (unique_id, handle) in &handles {
            let Some(subscription) = staged.get(unique_id) else {
                continue;
            };
            subscription.set_handle(*handle);
            indices
                .active
                .insert(unique_id.clone(), Arc::clone(subscription));
            newly_active.push(Arc::clone(subscription));
        }
        Ok(newly_active)
    }

    // ------------------------------------------------------------------
    // Unsubscribe and expiry

    pub async fn unsubscribe_by_id(&self, unique_id: &str) -> Result<bool, BrokerError> {
        let Some(subscription) = self
            .subscriptions_by_id
            .get(unique_id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return Ok(false);
        };
        self.unsubscribe(&subscription).await
    }

    /// Tears a subscription down entirely: feed unsubscribe, all indices,
    /// all distributors. Returns false for an untracked subscription.
    pub async fn unsubscribe(
        &self,
        subscription: &Arc<Subscription>,
    ) -> Result<bool, BrokerError> {
        self.verify_connected()?;

        let mut indices = self.indices.lock().await;
        let removed = self.unsubscribe_locked(&mut indices, subscription).await?;
        drop(indices);

        if removed {
            let listeners = self.listeners.read().clone();
            notify_unsubscribed(&listeners, subscription);
        }
        Ok(removed)
    }

    async fn unsubscribe_locked(
        &self,
        indices: &mut Indices,
        subscription: &Arc<Subscription>,
    ) -> Result<bool, BrokerError> {
        let unique_id = subscription.unique_id();
        if !indices.active.contains_key(unique_id) {
            tracing::warn!("unsubscribe requested for non-active subscription {}", unique_id);
            return Ok(false);
        }

        tracing::info!("unsubscribing from {}", unique_id);
        if let Some(handle) = subscription.handle() {
            self.adapter.unsubscribe(&[handle]).await?;
        }

        indices.active.remove(unique_id);
        self.subscriptions_by_id.remove(unique_id);
        for distributor in subscription.distributors() {
            indices.distributors.remove(distributor.fully_qualified_spec());
        }
        subscription.remove_all_distributors();

        tracing::info!("unsubscribed from {}", unique_id);
        Ok(true)
    }

    /// Stops one distributor. A no-op returning false if the distributor is
    /// stale (not the one currently indexed for its spec) or persistent.
    /// Dropping a subscription's last distributor cascades into a full
    /// unsubscribe.
    pub async fn stop_distributor(
        &self,
        distributor: &Arc<MarketDataDistributor>,
    ) -> Result<bool, BrokerError> {
        let mut indices = self.indices.lock().await;
        let (stopped, unsubscribed) =
            self.stop_distributor_locked(&mut indices, distributor).await?;
        drop(indices);

        if let Some(subscription) = unsubscribed {
            let listeners = self.listeners.read().clone();
            notify_unsubscribed(&listeners, &subscription);
        }
        Ok(stopped)
    }

    async fn stop_distributor_locked(
        &self,
        indices: &mut Indices,
        distributor: &Arc<MarketDataDistributor>,
    ) -> Result<(bool, Option<Arc<Subscription>>), BrokerError> {
        let fully_qualified = distributor.fully_qualified_spec();
        match indices.distributors.get(fully_qualified) {
            Some(current) if Arc::ptr_eq(current, distributor) => {}
            _ => return Ok((false, None)),
        }
        if distributor.is_persistent() {
            return Ok((false, None));
        }

        let Some(subscription) = self
            .subscriptions_by_id
            .get(distributor.unique_id())
            .map(|entry| Arc::clone(entry.value()))
        else {
            // orphaned index entry; drop it rather than leave it dangling
            indices.distributors.remove(fully_qualified);
            return Ok((true, None));
        };

        subscription.remove_distributor(fully_qualified);
        indices.distributors.remove(fully_qualified);

        if !subscription.has_distributors() {
            let removed = self.unsubscribe_locked(indices, &subscription).await?;
            if removed {
                return Ok((true, Some(subscription)));
            }
        }
        Ok((true, None))
    }

    /// One expiry sweep pass. Holds the structural lock for the whole pass:
    /// checking a distributor and stopping it under separate lock
    /// acquisitions could stop one that a concurrent subscribe just renewed.
    /// Returns the number of distributors stopped.
    pub async fn expire_subscriptions(&self) -> usize {
        let mut indices = self.indices.lock().await;
        let now = Utc::now();
        let all: Vec<Arc<MarketDataDistributor>> =
            indices.distributors.values().cloned().collect();

        let mut expired = 0;
        let mut unsubscribed = Vec::new();
        for distributor in all {
            if !distributor.has_expired(now) {
                continue;
            }
            match self.stop_distributor_locked(&mut indices, &distributor).await {
                Ok((true, gone)) => {
                    expired += 1;
                    unsubscribed.extend(gone);
                }
                Ok((false, _)) => {}
                Err(e) => tracing::warn!(
                    "failed to stop expired distributor for {}: {}",
                    distributor.unique_id(),
                    e
                ),
            }
        }
        drop(indices);

        if expired > 0 {
            tracing::info!("expiry sweep stopped {} distributors", expired);
        }
        let listeners = self.listeners.read().clone();
        for subscription in &unsubscribed {
            notify_unsubscribed(&listeners, subscription);
        }
        expired
    }

    pub fn expiration_manager(&self) -> &ExpirationManager {
        &self.expiration
    }

    // ------------------------------------------------------------------
    // Snapshot

    /// Batch snapshot. Active distributors with a cached value answer
    /// without a feed call; the rest are fetched in one batch query and run
    /// through their normalization pipelines.
    pub async fn snapshot(
        &self,
        specs: &[LiveDataSpec],
    ) -> Result<Vec<SubscriptionResponse>, BrokerError> {
        tracing::info!("snapshot requested for {} specs", specs.len());
        self.verify_connected()?;

        let resolved = self.resolver.resolve(specs).await;
        let mut responses: Vec<Option<SubscriptionResponse>> = vec![None; specs.len()];
        // unique id to the request indices it must answer
        let mut query_idx: HashMap<String, Vec<usize>> = HashMap::new();

        {
            let indices = self.indices.lock().await;
            for (i, spec) in specs.iter().enumerate() {
                let Some(dspec) = resolved.get(spec) else {
                    responses[i] = Some(SubscriptionResponse::failure(
                        spec.clone(),
                        SubscriptionResult::NotPresent,
                        "unable to resolve a distribution specification",
                    ));
                    continue;
                };

                if let Some(distributor) = indices.distributors.get(dspec.fully_qualified_spec()) {
                    if let Some(cached) = distributor.snapshot() {
                        tracing::debug!("able to satisfy {} from the last known value", spec);
                        responses[i] =
                            Some(SubscriptionResponse::snapshot(spec.clone(), cached));
                        continue;
                    }
                    if self
                        .adapter
                        .empty_subscription_implies_empty_snapshot(distributor.unique_id())
                    {
                        // an empty live subscription means a fresh query
                        // would come back empty too; report instead of
                        // re-querying
                        responses[i] = Some(SubscriptionResponse::failure(
                            spec.clone(),
                            SubscriptionResult::InternalError,
                            format!(
                                "existing subscription for {} has produced no values; required fields may be unavailable",
                                distributor.unique_id()
                            ),
                        ));
                        continue;
                    }
                }

                query_idx
                    .entry(dspec.unique_id().to_string())
                    .or_default()
                    .push(i);
            }
        }

        if !query_idx.is_empty() {
            let to_query: Vec<String> = query_idx.keys().cloned().collect();
            tracing::debug!("querying the feed for {:?}", to_query);
            let images = self.adapter.snapshot(&to_query).await?;

            for (unique_id, request_indices) in &query_idx {
                let image = images.get(unique_id);
                for &i in request_indices {
                    let spec = &specs[i];
                    responses[i] = Some(match image {
                        None => SubscriptionResponse::failure(
                            spec.clone(),
                            SubscriptionResult::InternalError,
                            format!("feed snapshot returned no entry for {}", unique_id),
                        ),
                        Some(None) => SubscriptionResponse::failure(
                            spec.clone(),
                            SubscriptionResult::InternalError,
                            format!("feed returned no image for {}", unique_id),
                        ),
                        Some(Some(fields)) => {
                            // resolution succeeded earlier for this index
                            match resolved.get(spec) {
                                Some(dspec) => match dspec.normalize(fields.clone(), unique_id) {
                                    Some(normalized) => SubscriptionResponse::snapshot(
                                        spec.clone(),
                                        LiveDataUpdate {
                                            sequence: 0,
                                            specification: dspec.fully_qualified_spec().clone(),
                                            fields: normalized,
                                        },
                                    ),
                                    None => SubscriptionResponse::failure(
                                        spec.clone(),
                                        SubscriptionResult::InternalError,
                                        format!(
                                            "snapshot for {} disappeared in normalization; the ruleset or the feed data is broken",
                                            unique_id
                                        ),
                                    ),
                                },
                                None => SubscriptionResponse::failure(
                                    spec.clone(),
                                    SubscriptionResult::InternalError,
                                    "resolution entry vanished while snapshotting",
                                ),
                            }
                        }
                    });
                }
            }
        }

        Ok(responses
            .into_iter()
            .enumerate()
            .map(|(i, response)| {
                response.unwrap_or_else(|| {
                    SubscriptionResponse::failure(
                        specs[i].clone(),
                        SubscriptionResult::InternalError,
                        "snapshot recorded no response for this specification",
                    )
                })
            })
            .collect())
    }

    /// Always queries the feed, bypassing any cached value. The feed must
    /// return an image for the id or the call fails.
    pub async fn force_snapshot(&self, unique_id: &str) -> Result<FieldMap, BrokerError> {
        let images = self.adapter.snapshot(&[unique_id.to_string()]).await?;
        match images.get(unique_id) {
            Some(Some(fields)) => Ok(fields.clone()),
            _ => Err(BrokerError::ContractViolation(format!(
                "feed snapshot returned no image for {}",
                unique_id
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Full request entry point

    /// Resolution, entitlement, and the snapshot/subscribe split for one
    /// client request. Always yields one response per requested spec; an
    /// escaping error is converted into INTERNAL_ERROR entries rather than
    /// propagated.
    pub async fn process_request(&self, request: &SubscriptionRequest) -> ResponseBatch {
        match self.process_request_impl(request).await {
            Ok(responses) => ResponseBatch::new(request.user.clone(), responses),
            Err(e) => {
                tracing::error!("failed to process request for {}: {}", request.user, e);
                let responses = request
                    .specifications
                    .iter()
                    .map(|spec| {
                        SubscriptionResponse::failure(
                            spec.clone(),
                            SubscriptionResult::InternalError,
                            e.to_string(),
                        )
                    })
                    .collect();
                ResponseBatch::new(request.user.clone(), responses)
            }
        }
    }

    async fn process_request_impl(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<Vec<SubscriptionResponse>, BrokerError> {
        let persistent = request.subscription_type.is_persistent();
        let mut responses = Vec::with_capacity(request.specifications.len());

        // resolution screen: unresolvable specs fail here, the rest carry on
        let resolved = self.resolver.resolve(&request.specifications).await;
        let mut distributable = Vec::new();
        for spec in &request.specifications {
            if resolved.contains_key(spec) {
                distributable.push(spec.clone());
            } else {
                let message = format!("could not build a distribution specification for {}", spec);
                tracing::debug!("{}", message);
                responses.push(SubscriptionResponse::failure(
                    spec.clone(),
                    SubscriptionResult::NotPresent,
                    message,
                ));
            }
        }

        // entitlement screen, then the snapshot/subscribe split
        let entitled = self.entitlement.is_entitled(&request.user, &distributable).await;
        let mut snapshots = Vec::new();
        let mut subscriptions = Vec::new();
        for spec in distributable {
            match entitled.get(&spec) {
                Some(true) => {
                    if request.subscription_type == SubscriptionType::Snapshot {
                        snapshots.push(spec);
                    } else {
                        subscriptions.push(spec);
                    }
                }
                Some(false) => {
                    let message = format!("{} is not entitled to {}", request.user, spec);
                    tracing::info!("{}", message);
                    responses.push(SubscriptionResponse::failure(
                        spec,
                        SubscriptionResult::NotAuthorized,
                        message,
                    ));
                }
                None => {
                    responses.push(SubscriptionResponse::failure(
                        spec.clone(),
                        SubscriptionResult::InternalError,
                        format!("entitlement checker returned no decision for {}", spec),
                    ));
                }
            }
        }

        if !snapshots.is_empty() {
            match self.snapshot(&snapshots).await {
                Ok(batch) => responses.extend(batch),
                Err(e) => {
                    tracing::error!("error obtaining snapshots: {}", e);
                    for spec in snapshots {
                        responses.push(SubscriptionResponse::failure(
                            spec,
                            SubscriptionResult::InternalError,
                            format!("problem obtaining snapshot: {}", e),
                        ));
                    }
                }
            }
        }

        if !subscriptions.is_empty() {
            match self.subscribe(&subscriptions, persistent).await {
                Ok(batch) => responses.extend(batch),
                Err(e) => {
                    tracing::error!("error obtaining subscriptions: {}", e);
                    for spec in subscriptions {
                        responses.push(SubscriptionResponse::failure(
                            spec,
                            SubscriptionResult::InternalError,
                            e.to_string(),
                        ));
                    }
                }
            }
        }

        Ok(responses)
    }

    // ------------------------------------------------------------------
    // Tick hot path

    /// Routes one live update to its subscription. Reads the unique-id index
    /// without the structural lock so ingestion never queues behind
    /// administrative traffic. Data for untracked ids is dropped with a
    /// warning; gateways may deliver a few ticks after an unsubscribe.
    pub fn live_data_received(&self, unique_id: &str, fields: FieldMap) {
        self.updates_received.fetch_add(1, Ordering::Relaxed);
        self.update_rate.record();

        let Some(subscription) = self
            .subscriptions_by_id
            .get(unique_id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            tracing::warn!(
                "received data for {} with no subscription held (recently expired?)",
                unique_id
            );
            return;
        };
        subscription.live_data_received(fields);
    }

    // ------------------------------------------------------------------
    // Introspection

    pub fn is_subscribed_to_id(&self, unique_id: &str) -> bool {
        self.subscriptions_by_id.contains_key(unique_id)
    }

    pub async fn is_subscribed_to(&self, fully_qualified_spec: &LiveDataSpec) -> bool {
        self.indices
            .lock()
            .await
            .distributors
            .contains_key(fully_qualified_spec)
    }

    /// Copy of the active subscriptions
    pub async fn subscriptions(&self) -> Vec<Arc<Subscription>> {
        self.indices.lock().await.active.values().cloned().collect()
    }

    pub async fn active_subscription_ids(&self) -> HashSet<String> {
        self.indices.lock().await.active.keys().cloned().collect()
    }

    pub async fn active_topics(&self) -> HashSet<String> {
        self.indices
            .lock()
            .await
            .distributors
            .values()
            .map(|d| d.topic().to_string())
            .collect()
    }

    pub async fn subscription_count(&self) -> usize {
        self.indices.lock().await.active.len()
    }

    pub async fn distributor_for(
        &self,
        fully_qualified_spec: &LiveDataSpec,
    ) -> Option<Arc<MarketDataDistributor>> {
        self.indices
            .lock()
            .await
            .distributors
            .get(fully_qualified_spec)
            .cloned()
    }

    pub fn updates_received(&self) -> u64 {
        self.updates_received.load(Ordering::Relaxed)
    }

    /// Approximate rate of updates received over the last minute
    pub fn updates_per_second(&self) -> f64 {
        self.update_rate.per_second()
    }

    /// Read-only diagnostic view of one tracked id; never mutates state
    pub fn get_trace(&self, unique_id: &str) -> SubscriptionTrace {
        match self.subscriptions_by_id.get(unique_id) {
            Some(entry) => {
                let subscription = entry.value();
                let now = Utc::now();
                SubscriptionTrace {
                    unique_id: unique_id.to_string(),
                    created_at: Some(subscription.created_at()),
                    distributors: subscription
                        .distributors()
                        .iter()
                        .map(|d| d.trace(now))
                        .collect(),
                    last_known_values: Some(subscription.history().last_known_values()),
                }
            }
            None => SubscriptionTrace::untracked(unique_id),
        }
    }
}
