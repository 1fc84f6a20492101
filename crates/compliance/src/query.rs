//! Request and response shapes for store reads, and the single-pass
//! accumulators that build them.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use warden_core::{ComplianceStatus, Severity, Status};

use crate::error::ComplianceError;
use crate::ranking::{sort_policies_by_top_failing, sort_resources_by_top_failing, PolicySummary, ResourceSummary};
use crate::summary::{ActiveSuppressedCount, StatusCount, StatusCountBySeverity};

pub const DEFAULT_PAGE_SIZE: u64 = 25;
pub const DEFAULT_TOP_FAILING: usize = 10;

// ── Paged detail ──────────────────────────────────────────────

/// Paging and filters for a describe-policy / describe-resource request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageParams {
    /// 1-based.
    pub page: u64,
    pub page_size: u64,
    pub status: Option<Status>,
    pub suppressed: Option<bool>,
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            status: None,
            suppressed: None,
        }
    }
}

impl PageParams {
    pub fn validate(&self) -> Result<(), ComplianceError> {
        if self.page == 0 {
            return Err(ComplianceError::InvalidRequest("page must be at least 1".into()));
        }
        if self.page_size == 0 {
            return Err(ComplianceError::InvalidRequest("pageSize must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paging {
    /// 0 when nothing matched the filters.
    pub this_page: u64,
    pub total_pages: u64,
    pub total_items: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyResourceDetail {
    pub items: Vec<ComplianceStatus>,
    pub paging: Paging,
    /// Derived from unsuppressed records, before filtering.
    pub status: Status,
    /// Every record touched, before filtering.
    pub totals: ActiveSuppressedCount,
}

/// Builds a [`PolicyResourceDetail`] in one pass over a key's records.
///
/// Every item updates the overall status and totals. Only items that pass
/// the filters count toward paging, and page boundaries fall on the ordinal
/// of matching items rather than scan position.
pub struct DetailBuilder {
    params: PageParams,
    severity: Option<Severity>,
    /// `None` when the requested page lies beyond any addressable item.
    first_item: Option<u64>,
    detail: PolicyResourceDetail,
}

impl DetailBuilder {
    pub fn new(params: PageParams, severity: Option<Severity>) -> Self {
        let first_item = params
            .page
            .saturating_sub(1)
            .checked_mul(params.page_size)
            .and_then(|skipped| skipped.checked_add(1));
        let capacity = params.page_size.min(1024) as usize;
        Self {
            params,
            severity,
            first_item,
            detail: PolicyResourceDetail {
                items: Vec::with_capacity(capacity),
                paging: Paging::default(),
                status: Status::Pass,
                totals: ActiveSuppressedCount::default(),
            },
        }
    }

    pub fn add(&mut self, item: ComplianceStatus) {
        self.detail.totals.record(item.status, item.suppressed);
        if !item.suppressed {
            self.detail.status = match (self.detail.status, item.status) {
                (_, Status::Error) | (Status::Error, _) => Status::Error,
                (_, Status::Fail) | (Status::Fail, _) => Status::Fail,
                _ => Status::Pass,
            };
        }

        if !self.matches(&item) {
            return;
        }

        self.detail.paging.total_items += 1;
        let on_page = self.first_item.is_some_and(|first| self.detail.paging.total_items >= first);
        if on_page && (self.detail.items.len() as u64) < self.params.page_size
        {
            self.detail.items.push(item);
        }
    }

    fn matches(&self, item: &ComplianceStatus) -> bool {
        self.params.suppressed.map_or(true, |s| s == item.suppressed)
            && self.params.status.map_or(true, |s| s == item.status)
            && self.severity.map_or(true, |s| s == item.severity)
    }

    pub fn finish(mut self) -> PolicyResourceDetail {
        let paging = &mut self.detail.paging;
        paging.total_pages = paging.total_items.div_ceil(self.params.page_size);
        paging.this_page = if paging.total_items == 0 { 0 } else { self.params.page };
        self.detail
    }
}

// ── Org aggregation ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub id: String,
    pub status: Status,
}

/// Every policy and every resource, ranked top failing first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntireOrg {
    pub policies: Vec<ItemSummary>,
    pub resources: Vec<ItemSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOfType {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub count: StatusCount,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedResources {
    pub by_type: Vec<ResourceOfType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgOverview {
    /// Policy statuses counted by policy severity.
    pub applied_policies: StatusCountBySeverity,
    /// Resource statuses counted by resource type.
    pub scanned_resources: ScannedResources,
    pub top_failing_policies: Vec<PolicySummary>,
    pub top_failing_resources: Vec<ResourceSummary>,
}

/// Per-policy and per-resource tallies from one pass over unsuppressed
/// records.
#[derive(Debug, Clone, Default)]
pub struct OrgTally {
    pub policies: HashMap<String, PolicySummary>,
    pub resources: HashMap<String, ResourceSummary>,
}

impl OrgTally {
    pub fn record(&mut self, item: &ComplianceStatus) {
        self.policies
            .entry(item.policy_id.clone())
            .or_insert_with(|| PolicySummary::new(item.policy_id.clone(), item.severity))
            .count
            .record(item.status);

        self.resources
            .entry(item.resource_id.clone())
            .or_insert_with(|| ResourceSummary::new(item.resource_id.clone(), item.resource_type.clone()))
            .count
            .record(item.severity, item.status);
    }

    pub fn describe(&self) -> EntireOrg {
        let mut policies: Vec<_> = self.policies.values().cloned().collect();
        sort_policies_by_top_failing(&mut policies);

        let mut resources: Vec<_> = self.resources.values().cloned().collect();
        sort_resources_by_top_failing(&mut resources);

        EntireOrg {
            policies: policies
                .into_iter()
                .map(|p| ItemSummary { status: p.status(), id: p.id })
                .collect(),
            resources: resources
                .into_iter()
                .map(|r| ItemSummary { status: r.status(), id: r.id })
                .collect(),
        }
    }

    pub fn overview(&self, limit_top_failing: usize) -> OrgOverview {
        let mut applied_policies = StatusCountBySeverity::default();
        let mut failing_policies = Vec::new();
        for policy in self.policies.values() {
            let status = policy.status();
            applied_policies.record(policy.severity, status);
            if status != Status::Pass {
                failing_policies.push(policy.clone());
            }
        }
        sort_policies_by_top_failing(&mut failing_policies);
        failing_policies.truncate(limit_top_failing);

        let mut by_type: BTreeMap<&str, StatusCount> = BTreeMap::new();
        let mut failing_resources = Vec::new();
        for resource in self.resources.values() {
            let status = resource.status();
            by_type.entry(&resource.resource_type).or_default().record(status);
            if status != Status::Pass {
                failing_resources.push(resource.clone());
            }
        }
        sort_resources_by_top_failing(&mut failing_resources);
        failing_resources.truncate(limit_top_failing);

        OrgOverview {
            applied_policies,
            scanned_resources: ScannedResources {
                by_type: by_type
                    .into_iter()
                    .map(|(t, count)| ResourceOfType { resource_type: t.to_string(), count })
                    .collect(),
            },
            top_failing_policies: failing_policies,
            top_failing_resources: failing_resources,
        }
    }
}

// ── Mutations ─────────────────────────────────────────────────

/// One delete-status entry: either every record of a policy (optionally
/// only for some resource types) or every record of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteStatus {
    Policy {
        id: String,
        #[serde(default, rename = "resourceTypes")]
        resource_types: Vec<String>,
    },
    Resource {
        id: String,
    },
}

/// New severity and suppression set for a policy's existing records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMetadata {
    pub policy_id: String,
    pub severity: Severity,
    #[serde(default)]
    pub suppressions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn item(resource: &str, policy: &str, status: Status, severity: Severity, suppressed: bool) -> ComplianceStatus {
        ComplianceStatus {
            resource_id: resource.into(),
            resource_type: "AWS.S3.Bucket".into(),
            policy_id: policy.into(),
            integration_id: "i1".into(),
            status,
            severity,
            suppressed,
            error_message: None,
            last_updated: Utc::now(),
            expires_at: Utc::now(),
        }
    }

    fn build(items: Vec<ComplianceStatus>, params: PageParams, severity: Option<Severity>) -> PolicyResourceDetail {
        let mut builder = DetailBuilder::new(params, severity);
        items.into_iter().for_each(|i| builder.add(i));
        builder.finish()
    }

    #[test]
    fn totals_ignore_filters_but_paging_respects_them() {
        let items = vec![
            item("r1", "p1", Status::Pass, Severity::High, false),
            item("r2", "p1", Status::Fail, Severity::High, false),
            item("r3", "p1", Status::Fail, Severity::High, true),
            item("r4", "p1", Status::Error, Severity::High, true),
            item("r5", "p1", Status::Fail, Severity::High, false),
        ];
        let params = PageParams { status: Some(Status::Fail), ..PageParams::default() };
        let detail = build(items, params, None);

        assert_eq!(detail.totals.active, StatusCount { error: 0, fail: 2, pass: 1 });
        assert_eq!(detail.totals.suppressed, StatusCount { error: 1, fail: 1, pass: 0 });
        // Suppressed ERROR does not affect the overall status.
        assert_eq!(detail.status, Status::Fail);
        assert_eq!(detail.paging, Paging { this_page: 1, total_pages: 1, total_items: 3 });
        let ids: Vec<_> = detail.items.iter().map(|i| i.resource_id.as_str()).collect();
        assert_eq!(ids, ["r2", "r3", "r5"]);
    }

    #[test]
    fn page_boundaries_count_only_matching_items() {
        // Matching items interleaved with non-matching ones.
        let items: Vec<_> = (0..10)
            .map(|i| {
                let status = if i % 2 == 0 { Status::Fail } else { Status::Pass };
                item(&format!("r{i}"), "p1", status, Severity::Low, false)
            })
            .collect();
        let params = PageParams {
            page: 2,
            page_size: 2,
            status: Some(Status::Fail),
            suppressed: None,
        };
        let detail = build(items, params, None);

        let ids: Vec<_> = detail.items.iter().map(|i| i.resource_id.as_str()).collect();
        assert_eq!(ids, ["r4", "r6"]);
        assert_eq!(detail.paging, Paging { this_page: 2, total_pages: 3, total_items: 5 });
    }

    #[test]
    fn no_matches_reports_page_zero() {
        let items = vec![item("r1", "p1", Status::Pass, Severity::Low, false)];
        let params = PageParams { suppressed: Some(true), ..PageParams::default() };
        let detail = build(items, params, None);

        assert!(detail.items.is_empty());
        assert_eq!(detail.paging, Paging { this_page: 0, total_pages: 0, total_items: 0 });
        assert_eq!(detail.totals.active.pass, 1);
    }

    #[test]
    fn severity_filter_applies_to_resource_detail() {
        let items = vec![
            item("r1", "p1", Status::Fail, Severity::Critical, false),
            item("r1", "p2", Status::Fail, Severity::Low, false),
        ];
        let detail = build(items, PageParams::default(), Some(Severity::Critical));
        assert_eq!(detail.items.len(), 1);
        assert_eq!(detail.items[0].policy_id, "p1");
        assert_eq!(detail.totals.active.fail, 2);
    }

    #[test]
    fn huge_page_numbers_are_simply_past_the_end() {
        let items: Vec<_> = (0..3)
            .map(|i| item(&format!("r{i}"), "p1", Status::Fail, Severity::Low, false))
            .collect();
        let params = PageParams { page: u64::MAX / 2, page_size: 25, status: None, suppressed: None };
        let detail = build(items, params.clone(), None);

        assert!(detail.items.is_empty());
        assert_eq!(detail.paging, Paging { this_page: u64::MAX / 2, total_pages: 1, total_items: 3 });

        let empty = build(Vec::new(), params, None);
        assert_eq!(empty.paging, Paging::default());
    }

    #[test]
    fn page_params_reject_zero() {
        assert!(PageParams { page: 0, ..PageParams::default() }.validate().is_err());
        assert!(PageParams { page_size: 0, ..PageParams::default() }.validate().is_err());
        assert!(PageParams::default().validate().is_ok());
    }

    #[test]
    fn overview_counts_and_truncates() {
        let mut tally = OrgTally::default();
        for rec in [
            item("r1", "p1", Status::Fail, Severity::High, false),
            item("r1", "p2", Status::Pass, Severity::Low, false),
            item("r2", "p1", Status::Pass, Severity::High, false),
            item("r2", "p3", Status::Error, Severity::Critical, false),
        ] {
            tally.record(&rec);
        }

        let overview = tally.overview(1);
        assert_eq!(overview.applied_policies.high, StatusCount { error: 0, fail: 1, pass: 0 });
        assert_eq!(overview.applied_policies.critical.error, 1);
        assert_eq!(overview.applied_policies.low.pass, 1);
        assert_eq!(overview.top_failing_policies.len(), 1);
        assert_eq!(overview.top_failing_policies[0].id, "p3");
        assert_eq!(overview.top_failing_resources.len(), 1);
        assert_eq!(overview.top_failing_resources[0].id, "r2");
        assert_eq!(overview.scanned_resources.by_type.len(), 1);
        assert_eq!(
            overview.scanned_resources.by_type[0].count,
            StatusCount { error: 1, fail: 1, pass: 0 }
        );
    }

    #[test]
    fn delete_entry_wire_format() {
        let policy: DeleteStatus =
            serde_json::from_str(r#"{"policy":{"id":"p1","resourceTypes":["AWS.S3.Bucket"]}}"#).unwrap();
        assert_eq!(
            policy,
            DeleteStatus::Policy { id: "p1".into(), resource_types: vec!["AWS.S3.Bucket".into()] }
        );
        let resource: DeleteStatus = serde_json::from_str(r#"{"resource":{"id":"r1"}}"#).unwrap();
        assert_eq!(resource, DeleteStatus::Resource { id: "r1".into() });
        assert!(serde_json::from_str::<DeleteStatus>(r#"{"policy":{"id":"p1"},"resource":{"id":"r1"}}"#).is_err());
    }
}
