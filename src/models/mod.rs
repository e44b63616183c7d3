pub mod fields;
pub mod request;
pub mod spec;
pub mod trace;

pub use fields::{permission_denied_message, FieldMap, FieldValue, PERMISSION_DENIED_FIELD};
pub use request::{
    LiveDataUpdate, ResponseBatch, SubscriptionRequest, SubscriptionResponse, SubscriptionResult,
    SubscriptionType,
};
pub use spec::{DistributionSpec, ExternalId, LiveDataSpec};
pub use trace::{DistributorTrace, SubscriptionTrace};
