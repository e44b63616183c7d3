use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::fields::FieldMap;

/// WebSocket message types pushed to downstream consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// One normalized value update on a topic
    LiveData {
        topic: String,
        sequence: u64,
        fields: FieldMap,
        timestamp: DateTime<Utc>,
    },
    /// Subscription confirmation
    Subscribed {
        topic: String,
    },
    /// Unsubscription confirmation
    Unsubscribed {
        topic: String,
    },
    /// Error message
    Error {
        message: String,
    },
    /// Heartbeat
    Ping {
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
}

/// Client control messages
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Ping,
}
