//! The external evaluation function.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use warden_core::{Policy, Resource};

use crate::error::TriggerError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnginePolicy {
    pub id: String,
    pub body: String,
    pub resource_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineResource {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub attributes: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub policies: Vec<EnginePolicy>,
    pub resources: Vec<EngineResource>,
}

impl EvaluationRequest {
    pub fn new<'a>(
        policies: impl IntoIterator<Item = &'a Policy>,
        resources: impl IntoIterator<Item = &'a Resource>,
    ) -> Self {
        Self {
            policies: policies
                .into_iter()
                .map(|p| EnginePolicy {
                    id: p.id.clone(),
                    body: p.body.clone(),
                    resource_types: p.resource_types.clone(),
                })
                .collect(),
            resources: resources
                .into_iter()
                .map(|r| EngineResource {
                    id: r.id.clone(),
                    resource_type: r.resource_type.clone(),
                    attributes: r.attributes.clone().unwrap_or(serde_json::Value::Null),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyError {
    pub id: String,
    pub message: String,
}

/// Outcome of every applicable policy against one resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceResult {
    pub id: String,
    #[serde(default)]
    pub errored: Vec<PolicyError>,
    #[serde(default)]
    pub failed: Vec<String>,
    #[serde(default)]
    pub passed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResponse {
    #[serde(default)]
    pub resources: Vec<ResourceResult>,
}

/// Evaluates policy bodies against resource attributes.
///
/// An `Err` is a function-level failure and aborts the caller's batch;
/// per-pair problems come back in `errored`.
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResponse, TriggerError>;
}

/// Calls the evaluation function over HTTP.
pub struct HttpPolicyEngine {
    client: reqwest::Client,
    url: String,
}

impl HttpPolicyEngine {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }
}

#[async_trait]
impl PolicyEngine for HttpPolicyEngine {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResponse, TriggerError> {
        info!(
            url = %self.url,
            policies = request.policies.len(),
            resources = request.resources.len(),
            "invoking policy engine"
        );

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| TriggerError::Evaluation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TriggerError::Evaluation(format!("engine returned {status}: {body}")));
        }

        let output: EvaluationResponse = response
            .json()
            .await
            .map_err(|e| TriggerError::Evaluation(format!("unreadable engine response: {e}")))?;
        debug!(results = output.resources.len(), "policy engine finished");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use warden_core::Severity;

    use super::*;

    #[test]
    fn request_wire_shape() {
        let mut policy = Policy::new("p1", "def policy(r): return True", Severity::Low);
        policy.resource_types = vec!["AWS.S3.Bucket".into()];
        let resource = Resource {
            id: "r1".into(),
            resource_type: "AWS.S3.Bucket".into(),
            attributes: Some(serde_json::json!({"Name": "b"})),
            integration_id: "i1".into(),
        };

        let json = serde_json::to_value(EvaluationRequest::new([&policy], [&resource])).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "policies": [{"id": "p1", "body": "def policy(r): return True", "resourceTypes": ["AWS.S3.Bucket"]}],
                "resources": [{"id": "r1", "type": "AWS.S3.Bucket", "attributes": {"Name": "b"}}],
            })
        );
    }

    #[test]
    fn response_lists_default_empty() {
        let response: EvaluationResponse =
            serde_json::from_str(r#"{"resources":[{"id":"r1","failed":["p1"]}]}"#).unwrap();
        assert_eq!(response.resources[0].failed, ["p1"]);
        assert!(response.resources[0].passed.is_empty());
        assert!(response.resources[0].errored.is_empty());
    }
}
