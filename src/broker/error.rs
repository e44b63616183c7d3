//! Error types for broker operations
//!
//! Per-specification failures inside a batch never surface here; they are
//! captured as response entries. This enum covers the failures that abort a
//! whole call: wrong connection state, collaborator contract breaches, and
//! feed-level errors.

use thiserror::Error;

use crate::feed::FeedError;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Operation requires an established upstream session
    #[error("connection to the upstream feed is down")]
    NotConnected,

    /// connect() called while a session is already up
    #[error("already connected to the upstream feed")]
    AlreadyConnected,

    /// The pre-subscribe validation hook refused the staged ids
    #[error("subscribe rejected: {0}")]
    SubscribeRejected(String),

    /// A collaborator broke its batch contract (map missing an input key,
    /// wrong response count)
    #[error("collaborator contract violation: {0}")]
    ContractViolation(String),

    /// Failure reported by the upstream feed adapter
    #[error(transparent)]
    Feed(#[from] FeedError),
}

impl BrokerError {
    /// True for wrong-connection-state failures
    pub fn is_state_error(&self) -> bool {
        matches!(self, BrokerError::NotConnected | BrokerError::AlreadyConnected)
    }

    /// True when the upstream feed itself failed
    pub fn is_feed_error(&self) -> bool {
        matches!(self, BrokerError::Feed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrokerError::SubscribeRejected("id 41 is blocked".to_string());
        assert_eq!(err.to_string(), "subscribe rejected: id 41 is blocked");
    }

    #[test]
    fn test_error_categories() {
        assert!(BrokerError::NotConnected.is_state_error());
        assert!(!BrokerError::NotConnected.is_feed_error());
        let feed = BrokerError::from(FeedError::Rejected("bad id".to_string()));
        assert!(feed.is_feed_error());
    }
}
