//! Alert dedup gate.
//!
//! The only cross-process coordination point: one conditional write per
//! policy that succeeds for at most one caller per debounce window.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use warden_core::{Policy, Severity};

use crate::error::ComplianceError;

/// Policy metadata captured when an alert window is acquired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertConfig {
    pub policy_id: String,
    pub policy_version_id: String,
    pub display_name: String,
    pub description: String,
    pub severity: Severity,
    pub runbook: String,
    pub tags: Vec<String>,
    pub resource_types: Vec<String>,
}

impl From<&Policy> for AlertConfig {
    fn from(policy: &Policy) -> Self {
        Self {
            policy_id: policy.id.clone(),
            policy_version_id: policy.version_id.clone(),
            display_name: policy.display_name.clone(),
            description: policy.description.clone(),
            severity: policy.severity,
            runbook: policy.runbook.clone(),
            tags: policy.tags.clone(),
            resource_types: policy.resource_types.clone(),
        }
    }
}

/// Backend for the debounce record keyed by policy ID.
#[async_trait]
pub trait DebounceStore: Send + Sync {
    /// In one atomic step: if no record exists for `policy_id`, or its
    /// `last_updated` is before `cutoff`, write `(now, snapshot, expires_at)`
    /// and return `true`. Otherwise change nothing and return `false`.
    async fn acquire(
        &self,
        policy_id: &str,
        snapshot: &serde_json::Value,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, ComplianceError>;
}

#[derive(Clone)]
pub struct AlertDebounceGate {
    store: Arc<dyn DebounceStore>,
}

impl AlertDebounceGate {
    pub fn new(store: Arc<dyn DebounceStore>) -> Self {
        Self { store }
    }

    /// Returns `true` if this caller won the window for `policy_id` and
    /// should notify. `false` means someone else already did; it is not an
    /// error.
    pub async fn try_acquire_debounce_window(
        &self,
        policy_id: &str,
        window: Duration,
        config: &AlertConfig,
    ) -> Result<bool, ComplianceError> {
        self.try_acquire_debounce_window_at(policy_id, window, config, Utc::now())
            .await
    }

    pub async fn try_acquire_debounce_window_at(
        &self,
        policy_id: &str,
        window: Duration,
        config: &AlertConfig,
        now: DateTime<Utc>,
    ) -> Result<bool, ComplianceError> {
        let window = TimeDelta::from_std(window)
            .map_err(|e| ComplianceError::InvalidRequest(format!("debounce window: {e}")))?;
        let snapshot = serde_json::to_value(config)?;

        let acquired = self
            .store
            .acquire(policy_id, &snapshot, now, now - window, now + window)
            .await?;

        if acquired {
            info!(policy_id, "debounce window acquired");
        } else {
            debug!(policy_id, "alert suppressed by active debounce window");
        }
        Ok(acquired)
    }
}
