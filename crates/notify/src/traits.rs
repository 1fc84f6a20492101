//! Notifier trait definition and shared error types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use warden_compliance::{AlertConfig, ComplianceError};
use warden_core::{AlertCandidate, WardenError};

/// Errors that can occur while handling an alert candidate.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned {status}: {body}")]
    Rejected {
        service: String,
        status: u16,
        body: String,
    },

    #[error("Malformed alert candidate: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Policy lookup failed: {0}")]
    Inventory(#[from] WardenError),

    #[error("Compliance store error: {0}")]
    Compliance(#[from] ComplianceError),
}

impl NotifyError {
    /// Whether redelivering the same message could succeed. A body that
    /// does not parse never will.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, NotifyError::Parse(_) | NotifyError::Config(_))
    }
}

/// A rendered alert ready for delivery.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub resource_id: String,
    pub created_at: DateTime<Utc>,
    /// Policy metadata captured when the debounce window was acquired.
    pub alert: AlertConfig,
    pub metadata: HashMap<String, String>,
}

impl Notification {
    pub fn for_candidate(candidate: &AlertCandidate, alert: AlertConfig) -> Self {
        let name = if alert.display_name.is_empty() {
            alert.policy_id.as_str()
        } else {
            alert.display_name.as_str()
        };
        let subject = format!("[{}] Policy failure: {}", alert.severity, name);

        let mut body = format!("Resource {} is failing policy {}.", candidate.resource_id, name);
        if !alert.description.is_empty() {
            body.push_str("\n\n");
            body.push_str(&alert.description);
        }
        if !alert.runbook.is_empty() {
            body.push_str("\n\nRunbook: ");
            body.push_str(&alert.runbook);
        }

        let metadata = HashMap::from([
            ("policy_id".to_string(), alert.policy_id.clone()),
            ("resource_id".to_string(), candidate.resource_id.clone()),
            ("severity".to_string(), alert.severity.to_string()),
        ]);

        Self {
            subject,
            body,
            resource_id: candidate.resource_id.clone(),
            created_at: candidate.timestamp,
            alert,
            metadata,
        }
    }
}

/// Trait for notification channel implementations.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification through this channel.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// Test connectivity with a sample notification.
    async fn test(&self) -> Result<(), NotifyError> {
        let candidate = AlertCandidate {
            resource_id: "test-resource".to_string(),
            policy_id: "test-policy".to_string(),
            policy_version_id: String::new(),
            timestamp: Utc::now(),
            should_alert: true,
        };
        let alert = AlertConfig::from(&warden_core::Policy::new(
            "test-policy",
            "",
            warden_core::Severity::Info,
        ));
        let mut notification = Notification::for_candidate(&candidate, alert);
        notification.subject = format!("[TEST] {}", notification.subject);
        self.send(&notification).await
    }

    /// Human-readable name for this channel (e.g., "webhook").
    fn channel_name(&self) -> &str;
}

/// Result of dispatching a notification to a single channel.
#[derive(Debug)]
pub struct DispatchResult {
    pub channel: String,
    pub policy_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use warden_core::{Policy, Severity};

    use super::*;

    #[test]
    fn rendering_prefers_display_name_and_appends_runbook() {
        let mut policy = Policy::new("p1", "body", Severity::High);
        policy.display_name = "S3 bucket encryption".into();
        policy.runbook = "Enable SSE".into();
        let candidate = AlertCandidate {
            resource_id: "arn:aws:s3:::bucket".into(),
            policy_id: "p1".into(),
            policy_version_id: "v1".into(),
            timestamp: Utc::now(),
            should_alert: true,
        };

        let n = Notification::for_candidate(&candidate, AlertConfig::from(&policy));
        assert_eq!(n.subject, "[HIGH] Policy failure: S3 bucket encryption");
        assert!(n.body.starts_with("Resource arn:aws:s3:::bucket is failing"));
        assert!(n.body.ends_with("Runbook: Enable SSE"));
        assert_eq!(n.metadata["severity"], "HIGH");

        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["alert"]["policyId"], "p1");
        assert_eq!(json["resourceId"], "arn:aws:s3:::bucket");
    }

    #[test]
    fn malformed_bodies_are_not_retryable() {
        let parse = serde_json::from_str::<AlertCandidate>("not json").unwrap_err();
        assert!(!NotifyError::Parse(parse).is_retryable());
        assert!(!NotifyError::Config("bad webhook".into()).is_retryable());
        assert!(NotifyError::Rejected { service: "remediation".into(), status: 503, body: String::new() }
            .is_retryable());
        assert!(NotifyError::Inventory(WardenError::Config("policy api down".into())).is_retryable());
    }

    #[test]
    fn rendering_falls_back_to_policy_id() {
        let candidate = AlertCandidate {
            resource_id: "r1".into(),
            policy_id: "p1".into(),
            policy_version_id: String::new(),
            timestamp: Utc::now(),
            should_alert: true,
        };
        let n = Notification::for_candidate(&candidate, AlertConfig::from(&Policy::new("p1", "", Severity::Low)));
        assert_eq!(n.subject, "[LOW] Policy failure: p1");
        assert_eq!(n.body, "Resource r1 is failing policy p1.");
    }
}
