pub mod dispatch;
pub mod error;
pub mod expiration;
pub mod listener;
pub mod server;
pub mod subscription;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatch::{DispatchConfig, EventDispatchLoop};
pub use error::BrokerError;
pub use expiration::ExpirationManager;
pub use listener::SubscriptionListener;
pub use server::{BrokerConfig, ConnectionStatus, LiveDataBroker, SubscribeValidator};
pub use subscription::{MarketDataDistributor, Subscription};
