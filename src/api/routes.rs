use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::broker::LiveDataBroker;
use crate::websocket::{websocket_handler, Broadcaster, WsState};

use super::handlers::{self, AppState};
use super::openapi::ApiDoc;

/// Create the API router with Swagger UI and WebSocket support
pub fn create_router(broker: Arc<LiveDataBroker>, broadcaster: Broadcaster) -> Router {
    let ws_state = Arc::new(WsState { broadcaster });
    let state = AppState { broker };

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // WebSocket endpoint for downstream consumers
        .route("/ws", get(websocket_handler))
        .with_state(ws_state)
        // Subscription endpoints
        .route(
            "/api/v1/subscriptions",
            post(handlers::process_subscription_request).get(handlers::list_subscriptions),
        )
        .route("/api/v1/subscriptions/:unique_id", delete(handlers::unsubscribe))
        .route(
            "/api/v1/subscriptions/:unique_id/trace",
            get(handlers::get_subscription_trace),
        )
        .route("/api/v1/snapshots", post(handlers::snapshot_request))
        // Connection control endpoints
        .route("/api/v1/connection/connect", post(handlers::connect_feed))
        .route("/api/v1/connection/disconnect", post(handlers::disconnect_feed))
        .route("/api/v1/connection/reestablish", post(handlers::reestablish))
        // Health endpoint
        .route("/api/v1/health", get(handlers::get_health))
        .with_state(state)
}
