//! Normalization pipelines
//!
//! A pipeline transforms one raw field message from the upstream feed into
//! the client-facing shape for a distribution. Returning None means the
//! message disappeared in normalization; on the live path that drops the
//! update, on the snapshot path it is reported as an internal error because
//! it usually indicates a broken rule rather than bad input.

use std::collections::BTreeSet;

use crate::models::fields::FieldMap;

pub trait NormalizationPipeline: Send + Sync {
    fn normalize(&self, raw: FieldMap, unique_id: &str) -> Option<FieldMap>;
}

/// Forwards every field untouched. Empty messages are treated as dropped.
pub struct PassthroughPipeline;

impl NormalizationPipeline for PassthroughPipeline {
    fn normalize(&self, raw: FieldMap, _unique_id: &str) -> Option<FieldMap> {
        if raw.is_empty() {
            None
        } else {
            Some(raw)
        }
    }
}

/// Retains only an allow-listed set of fields
///
/// The usual building block for client-facing rulesets: feeds deliver far
/// more fields than any consumer wants. A message with none of the allowed
/// fields is dropped.
pub struct FieldFilterPipeline {
    allowed: BTreeSet<String>,
}

impl FieldFilterPipeline {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

impl NormalizationPipeline for FieldFilterPipeline {
    fn normalize(&self, raw: FieldMap, unique_id: &str) -> Option<FieldMap> {
        let filtered: FieldMap = raw
            .into_iter()
            .filter(|(name, _)| self.allowed.contains(name))
            .collect();
        if filtered.is_empty() {
            tracing::debug!("no allowed fields survived normalization for {}", unique_id);
            None
        } else {
            Some(filtered)
        }
    }
}
