//! Remediation trigger for resources that are still failing.

use async_trait::async_trait;
use serde::Serialize;

use crate::traits::NotifyError;

#[async_trait]
pub trait Remediator: Send + Sync {
    async fn remediate(&self, policy_id: &str, resource_id: &str) -> Result<(), NotifyError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RemediationRequest<'a> {
    policy_id: &'a str,
    resource_id: &'a str,
}

/// Posts `{policyId, resourceId}` to the remediation service.
pub struct HttpRemediator {
    client: reqwest::Client,
    url: String,
}

impl HttpRemediator {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }
}

#[async_trait]
impl Remediator for HttpRemediator {
    async fn remediate(&self, policy_id: &str, resource_id: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&RemediationRequest { policy_id, resource_id })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                service: "remediation".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(policy_id, resource_id, "remediation requested");
        Ok(())
    }
}
