use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::fields::FieldMap;

/// Diagnostic view of one distributor, as exposed by the trace endpoint
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DistributorTrace {
    pub topic: String,
    pub expiry: DateTime<Utc>,
    pub expired: bool,
    pub persistent: bool,
    pub messages_sent: u64,
}

/// Read-only diagnostic view of one tracked subscription. Untracked ids get
/// a trace with only the id filled in, mirroring the lookup miss.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionTrace {
    pub unique_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub distributors: Vec<DistributorTrace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_known_values: Option<FieldMap>,
}

impl SubscriptionTrace {
    /// Trace for an id the broker is not tracking
    pub fn untracked(unique_id: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            created_at: None,
            distributors: Vec::new(),
            last_known_values: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untracked_trace_is_empty() {
        let trace = SubscriptionTrace::untracked("41");
        assert_eq!(trace.unique_id, "41");
        assert!(trace.created_at.is_none());
        assert!(trace.distributors.is_empty());
        assert!(trace.last_known_values.is_none());
    }
}
