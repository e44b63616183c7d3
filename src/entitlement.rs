//! Entitlement checking
//!
//! Yes/no permission decisions per user per requested specification. The
//! broker consults the checker before subscribing or snapshotting; denials
//! become NOT_AUTHORIZED entries without affecting siblings in the batch.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use crate::models::spec::LiveDataSpec;

#[async_trait]
pub trait EntitlementChecker: Send + Sync {
    /// Decides the whole batch in one call. The returned map should carry an
    /// entry for every input spec; a missing entry is treated as a checker
    /// fault, not a denial.
    async fn is_entitled(
        &self,
        user: &str,
        specs: &[LiveDataSpec],
    ) -> HashMap<LiveDataSpec, bool>;
}

/// Grants everything. The default for closed deployments.
pub struct PermissiveEntitlementChecker;

#[async_trait]
impl EntitlementChecker for PermissiveEntitlementChecker {
    async fn is_entitled(
        &self,
        _user: &str,
        specs: &[LiveDataSpec],
    ) -> HashMap<LiveDataSpec, bool> {
        specs.iter().map(|s| (s.clone(), true)).collect()
    }
}

/// Denies any spec that names a blocked identifier value, regardless of user
pub struct DenyListEntitlementChecker {
    denied_values: HashSet<String>,
}

impl DenyListEntitlementChecker {
    pub fn new<I, S>(denied_values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            denied_values: denied_values.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl EntitlementChecker for DenyListEntitlementChecker {
    async fn is_entitled(
        &self,
        user: &str,
        specs: &[LiveDataSpec],
    ) -> HashMap<LiveDataSpec, bool> {
        specs
            .iter()
            .map(|spec| {
                let denied = spec
                    .identifiers()
                    .iter()
                    .any(|id| self.denied_values.contains(&id.value));
                if denied {
                    tracing::info!("{} is not entitled to {}", user, spec);
                }
                (spec.clone(), !denied)
            })
            .collect()
    }
}
