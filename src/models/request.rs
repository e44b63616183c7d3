use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::fields::FieldMap;
use super::spec::{DistributionSpec, LiveDataSpec};

/// How long-lived the requested distribution should be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    /// One-off image, no distributor is created
    Snapshot,
    /// Live distribution that lapses once its expiry passes
    Transient,
    /// Live distribution that survives expiry sweeps until demoted
    Persistent,
}

impl SubscriptionType {
    pub fn is_persistent(&self) -> bool {
        matches!(self, SubscriptionType::Persistent)
    }
}

/// A client request against the broker: one user, a batch of specifications,
/// one subscription type for the whole batch
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionRequest {
    pub user: String,
    pub specifications: Vec<LiveDataSpec>,
    #[serde(rename = "type")]
    pub subscription_type: SubscriptionType,
}

/// Outcome kind for a single requested specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionResult {
    Success,
    /// The specification could not be resolved to anything distributable
    NotPresent,
    /// Entitlement denial, either up front or discovered in a snapshot image
    NotAuthorized,
    /// Unexpected collaborator failure or a broken batch contract
    InternalError,
}

/// One normalized value update as published to clients: a sequence number,
/// the fully qualified spec it belongs to, and the normalized fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LiveDataUpdate {
    pub sequence: u64,
    pub specification: LiveDataSpec,
    pub fields: FieldMap,
}

/// Per-specification response entry. A request with N specifications always
/// produces exactly N of these, success or not.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionResponse {
    pub requested_spec: LiveDataSpec,
    pub result: SubscriptionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fully_qualified_spec: Option<LiveDataSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<LiveDataUpdate>,
}

impl SubscriptionResponse {
    /// Successful live subscription: echoes the canonical spec and topic
    pub fn subscribed(requested_spec: LiveDataSpec, distribution_spec: &DistributionSpec) -> Self {
        Self {
            requested_spec,
            result: SubscriptionResult::Success,
            message: None,
            fully_qualified_spec: Some(distribution_spec.fully_qualified_spec().clone()),
            topic: Some(distribution_spec.topic().to_string()),
            snapshot: None,
        }
    }

    /// Successful snapshot: carries the value inline
    pub fn snapshot(requested_spec: LiveDataSpec, update: LiveDataUpdate) -> Self {
        Self {
            requested_spec,
            result: SubscriptionResult::Success,
            message: None,
            fully_qualified_spec: Some(update.specification.clone()),
            topic: None,
            snapshot: Some(update),
        }
    }

    pub fn failure(
        requested_spec: LiveDataSpec,
        result: SubscriptionResult,
        message: impl Into<String>,
    ) -> Self {
        Self {
            requested_spec,
            result,
            message: Some(message.into()),
            fully_qualified_spec: None,
            topic: None,
            snapshot: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == SubscriptionResult::Success
    }
}

/// The full reply to a [`SubscriptionRequest`]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResponseBatch {
    pub correlation_id: Uuid,
    pub user: String,
    pub responses: Vec<SubscriptionResponse>,
}

impl ResponseBatch {
    pub fn new(user: impl Into<String>, responses: Vec<SubscriptionResponse>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            user: user.into(),
            responses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalization::PassthroughPipeline;
    use std::sync::Arc;

    #[test]
    fn test_subscribed_response_carries_topic() {
        let requested = LiveDataSpec::single("raw", "TICKER", "EURUSD");
        let fq = LiveDataSpec::single("raw", "SIM", "1");
        let dspec =
            DistributionSpec::new(fq.clone(), "1", "live-data/1/raw", Arc::new(PassthroughPipeline));

        let response = SubscriptionResponse::subscribed(requested.clone(), &dspec);
        assert!(response.is_success());
        assert_eq!(response.requested_spec, requested);
        assert_eq!(response.fully_qualified_spec, Some(fq));
        assert_eq!(response.topic.as_deref(), Some("live-data/1/raw"));
        assert!(response.snapshot.is_none());
    }

    #[test]
    fn test_failure_response_has_message() {
        let requested = LiveDataSpec::single("raw", "TICKER", "NOPE");
        let response = SubscriptionResponse::failure(
            requested,
            SubscriptionResult::NotPresent,
            "no distribution specification resolved",
        );
        assert!(!response.is_success());
        assert_eq!(response.result, SubscriptionResult::NotPresent);
        assert!(response.message.unwrap().contains("no distribution"));
    }

    #[test]
    fn test_subscription_type_serde_names() {
        let json = serde_json::to_string(&SubscriptionType::Persistent).unwrap();
        assert_eq!(json, "\"persistent\"");
        assert!(SubscriptionType::Persistent.is_persistent());
        assert!(!SubscriptionType::Snapshot.is_persistent());
    }
}
