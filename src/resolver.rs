//! Distribution specification resolution
//!
//! The resolver turns client-supplied specifications into canonical
//! [`DistributionSpec`]s. A real deployment backs this with a reference-data
//! service; [`NaiveResolver`] covers demos and tests by requiring the client
//! to already name the feed's own id scheme.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::spec::{DistributionSpec, LiveDataSpec};
use crate::normalization::{NormalizationPipeline, PassthroughPipeline};

/// Ruleset registered by default on the naive resolver
pub const DEFAULT_RULESET: &str = "raw";

#[async_trait]
pub trait DistributionSpecResolver: Send + Sync {
    /// Resolves a whole batch in one call. A spec absent from the returned
    /// map could not be resolved; it must not fail the rest of the batch.
    async fn resolve(
        &self,
        specs: &[LiveDataSpec],
    ) -> HashMap<LiveDataSpec, DistributionSpec>;
}

/// Resolves specs that carry an identifier in the feed's own id scheme and
/// request a registered ruleset. Anything else is unresolvable.
pub struct NaiveResolver {
    scheme: String,
    pipelines: HashMap<String, Arc<dyn NormalizationPipeline>>,
}

impl NaiveResolver {
    pub fn new(scheme: impl Into<String>) -> Self {
        let mut pipelines: HashMap<String, Arc<dyn NormalizationPipeline>> = HashMap::new();
        pipelines.insert(DEFAULT_RULESET.to_string(), Arc::new(PassthroughPipeline));
        Self {
            scheme: scheme.into(),
            pipelines,
        }
    }

    /// Registers a ruleset under the given name, replacing any previous one
    pub fn with_pipeline(
        mut self,
        ruleset: impl Into<String>,
        pipeline: Arc<dyn NormalizationPipeline>,
    ) -> Self {
        self.pipelines.insert(ruleset.into(), pipeline);
        self
    }

    fn resolve_one(&self, spec: &LiveDataSpec) -> Option<DistributionSpec> {
        let unique_id = spec.identifier_for(&self.scheme)?;
        let pipeline = self.pipelines.get(spec.normalization_ruleset())?.clone();

        let ruleset = spec.normalization_ruleset();
        let fully_qualified = LiveDataSpec::single(ruleset, self.scheme.clone(), unique_id);
        let topic = format!("live-data/{}/{}", unique_id, ruleset);
        Some(DistributionSpec::new(fully_qualified, unique_id, topic, pipeline))
    }
}

#[async_trait]
impl DistributionSpecResolver for NaiveResolver {
    async fn resolve(
        &self,
        specs: &[LiveDataSpec],
    ) -> HashMap<LiveDataSpec, DistributionSpec> {
        let mut resolved = HashMap::new();
        for spec in specs {
            match self.resolve_one(spec) {
                Some(dspec) => {
                    resolved.insert(spec.clone(), dspec);
                }
                None => {
                    tracing::debug!("unable to resolve {}", spec);
                }
            }
        }
        resolved
    }
}
