use utoipa::OpenApi;

use crate::broker::server::ConnectionStatus;
use crate::models::fields::FieldValue;
use crate::models::request::{
    LiveDataUpdate, ResponseBatch, SubscriptionRequest, SubscriptionResponse, SubscriptionResult,
    SubscriptionType,
};
use crate::models::spec::{ExternalId, LiveDataSpec};
use crate::models::trace::{DistributorTrace, SubscriptionTrace};

use super::handlers::{
    ActiveSubscriptions, BrokerHealth, ConnectionResponse, ReestablishResponse, SnapshotRequest,
    UnsubscribeResponse,
};
use super::responses::ErrorResponse;

/// OpenAPI document for the broker's control surface
#[derive(OpenApi)]
#[openapi(
    paths(
        super::handlers::process_subscription_request,
        super::handlers::snapshot_request,
        super::handlers::unsubscribe,
        super::handlers::list_subscriptions,
        super::handlers::get_subscription_trace,
        super::handlers::connect_feed,
        super::handlers::disconnect_feed,
        super::handlers::reestablish,
        super::handlers::get_health,
    ),
    components(schemas(
        SubscriptionRequest,
        SubscriptionType,
        SubscriptionResponse,
        SubscriptionResult,
        ResponseBatch,
        LiveDataSpec,
        ExternalId,
        LiveDataUpdate,
        FieldValue,
        SubscriptionTrace,
        DistributorTrace,
        ConnectionStatus,
        SnapshotRequest,
        UnsubscribeResponse,
        ActiveSubscriptions,
        ConnectionResponse,
        ReestablishResponse,
        BrokerHealth,
        ErrorResponse,
    )),
    tags(
        (name = "subscriptions", description = "Subscribe, snapshot, unsubscribe, introspect"),
        (name = "connection", description = "Upstream feed session lifecycle"),
        (name = "health", description = "Operational health"),
    ),
    info(
        title = "live-data-broker API",
        description = "Market data subscription and distribution broker",
    )
)]
pub struct ApiDoc;
