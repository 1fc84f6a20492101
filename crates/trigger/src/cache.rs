//! Short-TTL cache over the enabled-policy list.
//!
//! Nearly every resource batch needs the full list, so a warm worker reuses
//! it until the TTL passes. Staleness up to the TTL is accepted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;
use tracing::debug;
use warden_core::{Policy, PolicySource, WardenError};

pub struct CachedPolicySource {
    inner: Arc<dyn PolicySource>,
    enabled: Cache<(), Arc<Vec<Policy>>>,
}

impl CachedPolicySource {
    pub fn new(inner: Arc<dyn PolicySource>, ttl: Duration) -> Self {
        Self {
            inner,
            enabled: Cache::builder().max_capacity(1).time_to_live(ttl).build(),
        }
    }
}

#[async_trait]
impl PolicySource for CachedPolicySource {
    async fn enabled_policies(&self) -> Result<Vec<Policy>, WardenError> {
        if let Some(policies) = self.enabled.get(&()) {
            debug!(policies = policies.len(), "using cached enabled policies");
            return Ok(policies.as_ref().clone());
        }

        let policies = self.inner.enabled_policies().await?;
        self.enabled.insert((), Arc::new(policies.clone()));
        Ok(policies)
    }

    async fn get_policy(&self, policy_id: &str) -> Result<Option<Policy>, WardenError> {
        self.inner.get_policy(policy_id).await
    }
}
