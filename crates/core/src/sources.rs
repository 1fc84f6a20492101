//! Collaborator interfaces for the policy and resource inventories.
//!
//! Concrete HTTP clients live in `warden-trigger`; tests and local mode
//! substitute their own implementations.

use async_trait::async_trait;

use crate::error::WardenError;
use crate::model::{Policy, Resource};

/// One page of a resource listing.
#[derive(Debug, Clone, Default)]
pub struct ResourcePage {
    pub resources: Vec<Resource>,
    /// Total number of pages available for the same query (1-based paging).
    pub total_pages: u64,
}

/// Read access to the policy inventory.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Every currently enabled policy.
    async fn enabled_policies(&self) -> Result<Vec<Policy>, WardenError>;

    /// A single policy by ID, or `None` if it no longer exists.
    async fn get_policy(&self, policy_id: &str) -> Result<Option<Policy>, WardenError>;
}

/// Read access to the resource inventory.
#[async_trait]
pub trait ResourceSource: Send + Sync {
    /// List resources of the given types (empty = all types), 1-based `page`.
    async fn list_resources(
        &self,
        resource_types: &[String],
        page: u64,
        page_size: u64,
    ) -> Result<ResourcePage, WardenError>;
}
