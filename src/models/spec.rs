use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::models::fields::FieldMap;
use crate::normalization::NormalizationPipeline;

/// A single external identifier: a naming scheme plus a value within it
///
/// The same instrument is commonly known under several schemes at once
/// (vendor ticker, ISIN, an internal code), so requests carry a bundle of
/// these rather than a single string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct ExternalId {
    pub scheme: String,
    pub value: String,
}

impl ExternalId {
    pub fn new(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.scheme, self.value)
    }
}

/// Identity of a requested data element: a normalization ruleset plus an
/// identifier bundle naming the underlying instrument
///
/// Two flavors share this type. As supplied by a client the bundle may be
/// aliased or underspecified; after resolution the fully qualified form is
/// canonical and is used as an index key, which is why the identifier list is
/// kept sorted and deduplicated so that equality and hashing are stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(from = "LiveDataSpecWire")]
pub struct LiveDataSpec {
    normalization_ruleset: String,
    identifiers: Vec<ExternalId>,
}

/// Wire shape accepted over the API before the sort/dedup invariant is applied
#[derive(Deserialize)]
struct LiveDataSpecWire {
    normalization_ruleset: String,
    identifiers: Vec<ExternalId>,
}

impl From<LiveDataSpecWire> for LiveDataSpec {
    fn from(wire: LiveDataSpecWire) -> Self {
        LiveDataSpec::new(wire.normalization_ruleset, wire.identifiers)
    }
}

impl LiveDataSpec {
    pub fn new(normalization_ruleset: impl Into<String>, mut identifiers: Vec<ExternalId>) -> Self {
        identifiers.sort();
        identifiers.dedup();
        Self {
            normalization_ruleset: normalization_ruleset.into(),
            identifiers,
        }
    }

    /// Convenience constructor for a spec naming one identifier
    pub fn single(
        normalization_ruleset: impl Into<String>,
        scheme: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::new(normalization_ruleset, vec![ExternalId::new(scheme, value)])
    }

    pub fn normalization_ruleset(&self) -> &str {
        &self.normalization_ruleset
    }

    pub fn identifiers(&self) -> &[ExternalId] {
        &self.identifiers
    }

    /// Value of the identifier under the given scheme, if the bundle has one
    pub fn identifier_for(&self, scheme: &str) -> Option<&str> {
        self.identifiers
            .iter()
            .find(|id| id.scheme == scheme)
            .map(|id| id.value.as_str())
    }
}

impl fmt::Display for LiveDataSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:[", self.normalization_ruleset)?;
        for (i, id) in self.identifiers.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", id)?;
        }
        write!(f, "]")
    }
}

/// Resolved binding of a fully qualified [`LiveDataSpec`] to the upstream
/// feed's own unique id, an outbound topic name, and the normalization
/// pipeline that shapes raw feed messages for clients
///
/// Produced by the resolver; immutable once produced for a given fully
/// qualified spec.
#[derive(Clone)]
pub struct DistributionSpec {
    fully_qualified_spec: LiveDataSpec,
    unique_id: String,
    topic: String,
    pipeline: Arc<dyn NormalizationPipeline>,
}

impl DistributionSpec {
    pub fn new(
        fully_qualified_spec: LiveDataSpec,
        unique_id: impl Into<String>,
        topic: impl Into<String>,
        pipeline: Arc<dyn NormalizationPipeline>,
    ) -> Self {
        Self {
            fully_qualified_spec,
            unique_id: unique_id.into(),
            topic: topic.into(),
            pipeline,
        }
    }

    pub fn fully_qualified_spec(&self) -> &LiveDataSpec {
        &self.fully_qualified_spec
    }

    /// The upstream feed's unique id for the instrument
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Outbound topic that distributors publish on
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Runs a raw feed message through the normalization pipeline.
    /// None means the message did not survive normalization.
    pub fn normalize(&self, raw: FieldMap, unique_id: &str) -> Option<FieldMap> {
        self.pipeline.normalize(raw, unique_id)
    }
}

impl PartialEq for DistributionSpec {
    fn eq(&self, other: &Self) -> bool {
        self.fully_qualified_spec == other.fully_qualified_spec
            && self.unique_id == other.unique_id
            && self.topic == other.topic
    }
}

impl fmt::Debug for DistributionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributionSpec")
            .field("fully_qualified_spec", &self.fully_qualified_spec)
            .field("unique_id", &self.unique_id)
            .field("topic", &self.topic)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalization::PassthroughPipeline;

    #[test]
    fn test_identifier_order_does_not_affect_equality() {
        let a = LiveDataSpec::new(
            "raw",
            vec![ExternalId::new("TICKER", "EURUSD"), ExternalId::new("ISIN", "EU0009652759")],
        );
        let b = LiveDataSpec::new(
            "raw",
            vec![ExternalId::new("ISIN", "EU0009652759"), ExternalId::new("TICKER", "EURUSD")],
        );
        assert_eq!(a, b);

        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn test_identifier_for() {
        let spec = LiveDataSpec::single("raw", "SIM", "41");
        assert_eq!(spec.identifier_for("SIM"), Some("41"));
        assert_eq!(spec.identifier_for("ISIN"), None);
    }

    #[test]
    fn test_deserialized_spec_is_canonical() {
        let json = r#"{
            "normalization_ruleset": "raw",
            "identifiers": [
                {"scheme": "TICKER", "value": "XAUUSD"},
                {"scheme": "ISIN", "value": "XX123"},
                {"scheme": "TICKER", "value": "XAUUSD"}
            ]
        }"#;
        let spec: LiveDataSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.identifiers().len(), 2);
        assert_eq!(
            spec,
            LiveDataSpec::new(
                "raw",
                vec![ExternalId::new("ISIN", "XX123"), ExternalId::new("TICKER", "XAUUSD")]
            )
        );
    }

    #[test]
    fn test_distribution_spec_equality_ignores_pipeline() {
        let fq = LiveDataSpec::single("raw", "SIM", "1");
        let a = DistributionSpec::new(fq.clone(), "1", "live-data/1/raw", Arc::new(PassthroughPipeline));
        let b = DistributionSpec::new(fq, "1", "live-data/1/raw", Arc::new(PassthroughPipeline));
        assert_eq!(a, b);
    }
}
