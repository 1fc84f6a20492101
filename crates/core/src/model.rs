//! Shared domain model: compliance verdicts, resources, policies and the
//! alert candidate message exchanged between the trigger and alert workers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WardenError;

// ── Status ────────────────────────────────────────────────────

/// Verdict of a single policy evaluated against a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Pass,
    Fail,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pass => "PASS",
            Status::Fail => "FAIL",
            Status::Error => "ERROR",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PASS" => Ok(Status::Pass),
            "FAIL" => Ok(Status::Fail),
            "ERROR" => Ok(Status::Error),
            other => Err(WardenError::InvalidValue(format!("unknown status '{other}'"))),
        }
    }
}

// ── Severity ──────────────────────────────────────────────────

/// Policy severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Most severe first; the order in which resource rankings compare buckets.
    pub const DESCENDING: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    /// Sort priority (higher = more severe).
    pub fn priority(&self) -> u8 {
        match self {
            Severity::Info => 0,
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Severity::Info),
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(WardenError::InvalidValue(format!("unknown severity '{other}'"))),
        }
    }
}

// ── Compliance records ────────────────────────────────────────

/// Composite key of a compliance record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusKey {
    pub resource_id: String,
    pub policy_id: String,
}

impl StatusKey {
    pub fn new(resource_id: impl Into<String>, policy_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            policy_id: policy_id.into(),
        }
    }
}

/// The persisted verdict for one (resource, policy) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceStatus {
    pub resource_id: String,
    pub resource_type: String,
    pub policy_id: String,
    pub integration_id: String,
    pub status: Status,
    pub severity: Severity,
    pub suppressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub last_updated: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
}

impl ComplianceStatus {
    pub fn key(&self) -> StatusKey {
        StatusKey::new(self.resource_id.clone(), self.policy_id.clone())
    }
}

/// A verdict to be recorded; timestamps are stamped by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetStatus {
    pub resource_id: String,
    pub resource_type: String,
    pub policy_id: String,
    pub integration_id: String,
    pub status: Status,
    pub severity: Severity,
    pub suppressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SetStatus {
    pub fn key(&self) -> StatusKey {
        StatusKey::new(self.resource_id.clone(), self.policy_id.clone())
    }
}

// ── Resources and policies ────────────────────────────────────

/// A monitored resource as delivered on the change queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type", default)]
    pub resource_type: String,
    #[serde(default)]
    pub attributes: Option<serde_json::Value>,
    #[serde(default)]
    pub integration_id: String,
}

/// An evaluable policy with its alerting metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub id: String,
    #[serde(default)]
    pub body: String,
    /// Empty means the policy applies to every resource type.
    #[serde(default)]
    pub resource_types: Vec<String>,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default)]
    pub suppressions: Vec<String>,
    #[serde(default)]
    pub version_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub runbook: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_severity() -> Severity {
    Severity::Info
}

impl Policy {
    /// Build a policy with empty metadata collections.
    pub fn new(id: impl Into<String>, body: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            resource_types: Vec::new(),
            severity,
            suppressions: Vec::new(),
            version_id: String::new(),
            display_name: String::new(),
            description: String::new(),
            runbook: String::new(),
            tags: Vec::new(),
        }
    }
}

// ── Alert candidates ──────────────────────────────────────────

/// Message queued by the trigger for a resource newly failing a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertCandidate {
    pub resource_id: String,
    pub policy_id: String,
    pub policy_version_id: String,
    pub timestamp: DateTime<Utc>,
    pub should_alert: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_format_is_uppercase() {
        assert_eq!(serde_json::to_string(&Status::Fail).unwrap(), "\"FAIL\"");
        assert_eq!("ERROR".parse::<Status>().unwrap(), Status::Error);
        assert!("fail".parse::<Status>().is_err());
    }

    #[test]
    fn severity_priority_follows_declaration_order() {
        assert!(Severity::Critical > Severity::High);
        assert_eq!(Severity::Critical.priority(), 4);
        assert_eq!(Severity::Info.priority(), 0);
        assert_eq!(Severity::DESCENDING[0], Severity::Critical);
    }

    #[test]
    fn policy_missing_collections_deserialize_empty() {
        let policy: Policy = serde_json::from_str(r#"{"id":"p1","body":"def policy(r): return True"}"#).unwrap();
        assert!(policy.resource_types.is_empty());
        assert!(policy.suppressions.is_empty());
        assert_eq!(policy.severity, Severity::Info);

        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["tags"], serde_json::json!([]));
    }

    #[test]
    fn resource_type_uses_type_key() {
        let resource: Resource =
            serde_json::from_str(r#"{"id":"r1","type":"AWS.S3.Bucket","attributes":{},"integrationId":"i1"}"#)
                .unwrap();
        assert_eq!(resource.resource_type, "AWS.S3.Bucket");
        assert_eq!(resource.integration_id, "i1");
    }

    #[test]
    fn compliance_status_expires_at_is_epoch_seconds() {
        let now = Utc::now();
        let status = ComplianceStatus {
            resource_id: "r1".into(),
            resource_type: "AWS.S3.Bucket".into(),
            policy_id: "p1".into(),
            integration_id: "i1".into(),
            status: Status::Pass,
            severity: Severity::Low,
            suppressed: false,
            error_message: None,
            last_updated: now,
            expires_at: now,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["expiresAt"], serde_json::json!(now.timestamp()));
        assert!(json.get("errorMessage").is_none());
        assert_eq!(status.key(), StatusKey::new("r1", "p1"));
    }
}
