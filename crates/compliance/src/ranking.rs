//! Deterministic "top failing" orderings.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use warden_core::{Severity, Status};

use crate::summary::{StatusCount, StatusCountBySeverity};

/// Per-policy tally over unsuppressed records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySummary {
    pub id: String,
    pub severity: Severity,
    pub count: StatusCount,
}

impl PolicySummary {
    pub fn new(id: impl Into<String>, severity: Severity) -> Self {
        Self { id: id.into(), severity, count: StatusCount::default() }
    }

    pub fn status(&self) -> Status {
        self.count.status()
    }
}

/// Per-resource tally over unsuppressed records, bucketed by policy severity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub count: StatusCountBySeverity,
}

impl ResourceSummary {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            count: StatusCountBySeverity::default(),
        }
    }

    pub fn status(&self) -> Status {
        self.count.status()
    }
}

/// Failing policies first, then higher severity, then more failures, then
/// ID. Passing policies sort by ID only, whatever their severity.
pub fn compare_policies(left: &PolicySummary, right: &PolicySummary) -> Ordering {
    let (lf, rf) = (left.count.failing(), right.count.failing());
    match (lf > 0, rf > 0) {
        (false, false) => left.id.cmp(&right.id),
        (false, true) => Ordering::Greater,
        (true, false) => Ordering::Less,
        (true, true) => right
            .severity
            .priority()
            .cmp(&left.severity.priority())
            .then_with(|| rf.cmp(&lf))
            .then_with(|| left.id.cmp(&right.id)),
    }
}

/// More CRITICAL failures first, then HIGH, MEDIUM, LOW, INFO, then ID.
pub fn compare_resources(left: &ResourceSummary, right: &ResourceSummary) -> Ordering {
    Severity::DESCENDING
        .iter()
        .map(|&sev| {
            let lf = left.count.bucket(sev).failing();
            let rf = right.count.bucket(sev).failing();
            rf.cmp(&lf)
        })
        .find(|ord| ord.is_ne())
        .unwrap_or_else(|| left.id.cmp(&right.id))
}

pub fn sort_policies_by_top_failing(policies: &mut [PolicySummary]) {
    policies.sort_by(compare_policies);
}

pub fn sort_resources_by_top_failing(resources: &mut [ResourceSummary]) {
    resources.sort_by(compare_resources);
}
