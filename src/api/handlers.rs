use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::broker::{ConnectionStatus, LiveDataBroker};
use crate::models::request::{ResponseBatch, SubscriptionRequest, SubscriptionType};
use crate::models::spec::LiveDataSpec;
use crate::models::trace::SubscriptionTrace;

use super::responses::{ApiError, ErrorResponse};

/// Shared state for the REST endpoints
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<LiveDataBroker>,
}

/// Snapshot-only request body; sugar over a SNAPSHOT subscription request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SnapshotRequest {
    pub user: String,
    pub specifications: Vec<LiveDataSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UnsubscribeResponse {
    pub unique_id: String,
    pub removed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ActiveSubscriptions {
    pub unique_ids: Vec<String>,
    pub topics: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectionResponse {
    pub status: ConnectionStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReestablishResponse {
    /// Ids the feed failed to re-handle; they are no longer tracked
    pub dropped_unique_ids: Vec<String>,
    pub still_tracked: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BrokerHealth {
    pub status: ConnectionStatus,
    pub active_subscriptions: usize,
    pub updates_received: u64,
    pub updates_per_second: f64,
    pub timestamp: String,
}

/// Process a subscription request batch
#[utoipa::path(
    post,
    path = "/api/v1/subscriptions",
    request_body = SubscriptionRequest,
    responses(
        (status = 200, description = "One response entry per requested specification", body = ResponseBatch),
    ),
    tag = "subscriptions"
)]
pub async fn process_subscription_request(
    State(state): State<AppState>,
    Json(request): Json<SubscriptionRequest>,
) -> Json<ResponseBatch> {
    Json(state.broker.process_request(&request).await)
}

/// Snapshot a batch of specifications
#[utoipa::path(
    post,
    path = "/api/v1/snapshots",
    request_body = SnapshotRequest,
    responses(
        (status = 200, description = "One response entry per requested specification", body = ResponseBatch),
    ),
    tag = "subscriptions"
)]
pub async fn snapshot_request(
    State(state): State<AppState>,
    Json(request): Json<SnapshotRequest>,
) -> Json<ResponseBatch> {
    let request = SubscriptionRequest {
        user: request.user,
        specifications: request.specifications,
        subscription_type: SubscriptionType::Snapshot,
    };
    Json(state.broker.process_request(&request).await)
}

/// Remove a subscription and all of its distributors
#[utoipa::path(
    delete,
    path = "/api/v1/subscriptions/{unique_id}",
    params(("unique_id" = String, Path, description = "Feed unique id")),
    responses(
        (status = 200, description = "Removal outcome; removed=false when the id was not tracked", body = UnsubscribeResponse),
        (status = 409, description = "Not connected to the feed", body = ErrorResponse),
    ),
    tag = "subscriptions"
)]
pub async fn unsubscribe(
    State(state): State<AppState>,
    Path(unique_id): Path<String>,
) -> Result<Json<UnsubscribeResponse>, ApiError> {
    let removed = state.broker.unsubscribe_by_id(&unique_id).await?;
    Ok(Json(UnsubscribeResponse { unique_id, removed }))
}

/// List active subscriptions and topics
#[utoipa::path(
    get,
    path = "/api/v1/subscriptions",
    responses(
        (status = 200, description = "Active subscriptions", body = ActiveSubscriptions),
    ),
    tag = "subscriptions"
)]
pub async fn list_subscriptions(State(state): State<AppState>) -> Json<ActiveSubscriptions> {
    let unique_ids: Vec<String> = state.broker.active_subscription_ids().await.into_iter().collect();
    let topics: Vec<String> = state.broker.active_topics().await.into_iter().collect();
    let count = unique_ids.len();
    Json(ActiveSubscriptions {
        unique_ids,
        topics,
        count,
    })
}

/// Diagnostic trace for one tracked id
#[utoipa::path(
    get,
    path = "/api/v1/subscriptions/{unique_id}/trace",
    params(("unique_id" = String, Path, description = "Feed unique id")),
    responses(
        (status = 200, description = "Trace; untracked ids yield an empty trace", body = SubscriptionTrace),
    ),
    tag = "subscriptions"
)]
pub async fn get_subscription_trace(
    State(state): State<AppState>,
    Path(unique_id): Path<String>,
) -> Json<SubscriptionTrace> {
    Json(state.broker.get_trace(&unique_id))
}

/// Establish the upstream feed session
#[utoipa::path(
    post,
    path = "/api/v1/connection/connect",
    responses(
        (status = 200, description = "Connected", body = ConnectionResponse),
        (status = 400, description = "Already connected", body = ErrorResponse),
    ),
    tag = "connection"
)]
pub async fn connect_feed(
    State(state): State<AppState>,
) -> Result<Json<ConnectionResponse>, ApiError> {
    state.broker.connect().await?;
    Ok(Json(ConnectionResponse {
        status: state.broker.connection_status(),
        message: "feed session established".to_string(),
    }))
}

/// Tear down the upstream feed session
#[utoipa::path(
    post,
    path = "/api/v1/connection/disconnect",
    responses(
        (status = 200, description = "Disconnected", body = ConnectionResponse),
        (status = 409, description = "Not connected", body = ErrorResponse),
    ),
    tag = "connection"
)]
pub async fn disconnect_feed(
    State(state): State<AppState>,
) -> Result<Json<ConnectionResponse>, ApiError> {
    state.broker.disconnect().await?;
    Ok(Json(ConnectionResponse {
        status: state.broker.connection_status(),
        message: "feed session closed".to_string(),
    }))
}

/// Re-issue upstream subscriptions after a reconnect
#[utoipa::path(
    post,
    path = "/api/v1/connection/reestablish",
    responses(
        (status = 200, description = "Recovery outcome, including ids that could not be recovered", body = ReestablishResponse),
    ),
    tag = "connection"
)]
pub async fn reestablish(State(state): State<AppState>) -> Json<ReestablishResponse> {
    let dropped_unique_ids = state.broker.reestablish_subscriptions().await;
    let still_tracked = state.broker.subscription_count().await;
    Json(ReestablishResponse {
        dropped_unique_ids,
        still_tracked,
    })
}

/// Broker health and throughput
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Health summary", body = BrokerHealth),
    ),
    tag = "health"
)]
pub async fn get_health(State(state): State<AppState>) -> Json<BrokerHealth> {
    Json(BrokerHealth {
        status: state.broker.connection_status(),
        active_subscriptions: state.broker.subscription_count().await,
        updates_received: state.broker.updates_received(),
        updates_per_second: state.broker.updates_per_second(),
        timestamp: Utc::now().to_rfc3339(),
    })
}
