//! HTTP clients for the policy and resource inventories.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use warden_core::{Policy, PolicySource, Resource, ResourcePage, ResourceSource, WardenError};

fn http_error(e: reqwest::Error) -> WardenError {
    WardenError::Http(e.to_string())
}

/// Turn a non-2xx response into [`WardenError::Upstream`].
async fn ensure_success(service: &str, response: reqwest::Response) -> Result<reqwest::Response, WardenError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(WardenError::Upstream {
        service: service.to_string(),
        status: status.as_u16(),
        body,
    })
}

#[derive(Deserialize)]
struct EnabledPolicies {
    #[serde(default)]
    policies: Vec<Policy>,
}

pub struct HttpPolicySource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPolicySource {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PolicySource for HttpPolicySource {
    async fn enabled_policies(&self) -> Result<Vec<Policy>, WardenError> {
        let url = format!("{}/policies/enabled", self.base_url);
        let response = self.client.get(&url).send().await.map_err(http_error)?;
        let listing: EnabledPolicies = ensure_success("policy-api", response)
            .await?
            .json()
            .await
            .map_err(http_error)?;
        debug!(policies = listing.policies.len(), "fetched enabled policies");
        Ok(listing.policies)
    }

    async fn get_policy(&self, policy_id: &str) -> Result<Option<Policy>, WardenError> {
        let url = format!("{}/policy", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("policyId", policy_id)])
            .send()
            .await
            .map_err(http_error)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let policy = ensure_success("policy-api", response)
            .await?
            .json()
            .await
            .map_err(http_error)?;
        Ok(Some(policy))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourcePaging {
    total_pages: u64,
}

#[derive(Deserialize)]
struct ResourceListing {
    #[serde(default)]
    resources: Vec<Resource>,
    paging: ResourcePaging,
}

pub struct HttpResourceSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpResourceSource {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ResourceSource for HttpResourceSource {
    async fn list_resources(
        &self,
        resource_types: &[String],
        page: u64,
        page_size: u64,
    ) -> Result<ResourcePage, WardenError> {
        let url = format!("{}/resources", self.base_url);
        let mut query = vec![
            ("page", page.to_string()),
            ("pageSize", page_size.to_string()),
            ("fields", "attributes,id,integrationId,type".to_string()),
            ("deleted", "false".to_string()),
        ];
        if !resource_types.is_empty() {
            query.push(("types", resource_types.join(",")));
        }

        let response = self.client.get(&url).query(&query).send().await.map_err(http_error)?;
        let listing: ResourceListing = ensure_success("resource-api", response)
            .await?
            .json()
            .await
            .map_err(http_error)?;

        debug!(page, total_pages = listing.paging.total_pages, resources = listing.resources.len(), "fetched resource page");
        Ok(ResourcePage {
            resources: listing.resources,
            total_pages: listing.paging.total_pages,
        })
    }
}
