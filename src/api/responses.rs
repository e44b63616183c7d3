use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::broker::BrokerError;

/// Uniform error body for all REST endpoints
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Wrapper mapping broker errors onto HTTP responses
#[derive(Debug)]
pub struct ApiError(pub BrokerError);

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self.0 {
            BrokerError::NotConnected => (StatusCode::CONFLICT, "not_connected"),
            BrokerError::AlreadyConnected => (StatusCode::BAD_REQUEST, "already_connected"),
            BrokerError::SubscribeRejected(_) => (StatusCode::BAD_REQUEST, "subscribe_rejected"),
            BrokerError::ContractViolation(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "contract_violation")
            }
            BrokerError::Feed(_) => (StatusCode::BAD_GATEWAY, "feed_error"),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedError;

    #[test]
    fn test_status_mapping() {
        let response = ApiError(BrokerError::NotConnected).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response =
            ApiError(BrokerError::Feed(FeedError::Transport("tcp reset".to_string())))
                .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
