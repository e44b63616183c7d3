// Library Crate Root
// lib.rs

pub mod api;
pub mod broker;
pub mod entitlement;
pub mod feed;
pub mod history;
pub mod metrics;
pub mod models;
pub mod normalization;
pub mod resolver;
pub mod sender;
pub mod websocket;

// pub use = re-export at crate root
pub use api::{create_router, AppState};
pub use broker::{
    BrokerConfig, BrokerError, ConnectionStatus, DispatchConfig, EventDispatchLoop,
    ExpirationManager, LiveDataBroker, MarketDataDistributor, Subscription, SubscriptionListener,
};
pub use feed::{FeedAdapter, FeedError, FeedHandle, FeedPoll, SimulatedFeedAdapter};
pub use models::{
    DistributionSpec, ExternalId, LiveDataSpec, LiveDataUpdate, ResponseBatch,
    SubscriptionRequest, SubscriptionResponse, SubscriptionResult, SubscriptionType,
};
pub use websocket::Broadcaster;
