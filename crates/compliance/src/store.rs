//! Compliance store: batched writes and the aggregating reads on top of a
//! [`ComplianceTable`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use futures::TryStreamExt;
use tracing::{debug, info};
use warden_batch::{BatchOperation, CallError, ChunkLimits, ChunkResponse};
use warden_core::config::ComplianceConfig;
use warden_core::{ComplianceStatus, SetStatus, Severity, Status, StatusKey};

use crate::cache::SnapshotCache;
use crate::error::ComplianceError;
use crate::query::{
    DeleteStatus, DetailBuilder, EntireOrg, OrgOverview, OrgTally, PageParams, PolicyResourceDetail,
    UpdateMetadata,
};
use crate::suppression::SuppressionSet;
use crate::table::{ComplianceTable, RecordStream};

// ── Batch adapters ────────────────────────────────────────────

struct PutRecords<'a>(&'a dyn ComplianceTable);
struct GetRecords<'a>(&'a dyn ComplianceTable);
struct DeleteRecords<'a>(&'a dyn ComplianceTable);

#[async_trait]
impl<'a> BatchOperation for PutRecords<'a> {
    type Item = ComplianceStatus;
    type Output = ();

    fn name(&self) -> &str {
        "compliance.put"
    }

    fn limits(&self) -> ChunkLimits {
        ChunkLimits::WRITE
    }

    async fn call(&self, chunk: &[ComplianceStatus]) -> Result<ChunkResponse<ComplianceStatus, ()>, CallError> {
        self.0.put_chunk(chunk).await.map(ChunkResponse::retry)
    }
}

#[async_trait]
impl<'a> BatchOperation for GetRecords<'a> {
    type Item = StatusKey;
    type Output = ComplianceStatus;

    fn name(&self) -> &str {
        "compliance.get"
    }

    fn limits(&self) -> ChunkLimits {
        ChunkLimits::GET
    }

    async fn call(&self, chunk: &[StatusKey]) -> Result<ChunkResponse<StatusKey, ComplianceStatus>, CallError> {
        self.0.get_chunk(chunk).await.map(ChunkResponse::complete)
    }
}

#[async_trait]
impl<'a> BatchOperation for DeleteRecords<'a> {
    type Item = StatusKey;
    type Output = ();

    fn name(&self) -> &str {
        "compliance.delete"
    }

    fn limits(&self) -> ChunkLimits {
        ChunkLimits::DELETE
    }

    async fn call(&self, chunk: &[StatusKey]) -> Result<ChunkResponse<StatusKey, ()>, CallError> {
        self.0.delete_chunk(chunk).await.map(ChunkResponse::retry)
    }
}

// ── Store ─────────────────────────────────────────────────────

pub struct ComplianceStore {
    table: Arc<dyn ComplianceTable>,
    snapshots: SnapshotCache,
    status_lifetime: TimeDelta,
    write_backoff: Duration,
}

impl ComplianceStore {
    pub fn new(table: Arc<dyn ComplianceTable>, config: &ComplianceConfig) -> Self {
        Self::with_settings(
            table,
            config.status_lifetime(),
            config.write_backoff(),
            Duration::from_secs(config.snapshot_cache_ttl_secs),
        )
    }

    pub fn with_settings(
        table: Arc<dyn ComplianceTable>,
        status_lifetime: Duration,
        write_backoff: Duration,
        snapshot_ttl: Duration,
    ) -> Self {
        Self {
            table,
            snapshots: SnapshotCache::new(snapshot_ttl),
            status_lifetime: TimeDelta::from_std(status_lifetime).unwrap_or(TimeDelta::hours(50)),
            write_backoff,
        }
    }

    /// Upsert verdicts, stamping `last_updated` and `expires_at`. Entries
    /// sharing a key collapse to the last one.
    pub async fn set_status(&self, entries: Vec<SetStatus>) -> Result<(), ComplianceError> {
        let now = Utc::now();
        let expires_at = now + self.status_lifetime;

        let mut by_key: HashMap<StatusKey, usize> = HashMap::with_capacity(entries.len());
        let mut records: Vec<ComplianceStatus> = Vec::with_capacity(entries.len());
        for entry in entries {
            let record = ComplianceStatus {
                resource_id: entry.resource_id,
                resource_type: entry.resource_type,
                policy_id: entry.policy_id,
                integration_id: entry.integration_id,
                status: entry.status,
                severity: entry.severity,
                suppressed: entry.suppressed,
                error_message: entry.error_message,
                last_updated: now,
                expires_at,
            };
            match by_key.get(&record.key()) {
                Some(&i) => records[i] = record,
                None => {
                    by_key.insert(record.key(), records.len());
                    records.push(record);
                }
            }
        }

        info!(records = records.len(), "writing compliance status");
        self.write(records).await
    }

    async fn write(&self, records: Vec<ComplianceStatus>) -> Result<(), ComplianceError> {
        if records.is_empty() {
            return Ok(());
        }
        warden_batch::execute(&PutRecords(self.table.as_ref()), records, self.write_backoff).await?;
        self.snapshots.invalidate();
        Ok(())
    }

    /// The stored verdict for one pair, or `None` if there is none.
    pub async fn get_status(&self, key: &StatusKey) -> Result<Option<ComplianceStatus>, ComplianceError> {
        self.table.get(key).await
    }

    /// Stored statuses for many pairs at once. Absent pairs are absent from
    /// the map.
    pub async fn previous_statuses(
        &self,
        keys: Vec<StatusKey>,
    ) -> Result<HashMap<StatusKey, Status>, ComplianceError> {
        let mut seen = HashSet::with_capacity(keys.len());
        let keys: Vec<_> = keys.into_iter().filter(|k| seen.insert(k.clone())).collect();

        let found = warden_batch::execute(&GetRecords(self.table.as_ref()), keys, self.write_backoff).await?;
        Ok(found.into_iter().map(|r| (r.key(), r.status)).collect())
    }

    /// Delete every record named by `entries`. Returns the number of keys
    /// deleted.
    pub async fn delete_status(&self, entries: Vec<DeleteStatus>) -> Result<usize, ComplianceError> {
        let mut keys: HashSet<StatusKey> = HashSet::new();

        for entry in &entries {
            match entry {
                DeleteStatus::Policy { id, resource_types } => {
                    let mut records = self.table.query_policy(id);
                    while let Some(record) = records.try_next().await? {
                        if resource_types.is_empty() || resource_types.contains(&record.resource_type) {
                            keys.insert(record.key());
                        }
                    }
                }
                DeleteStatus::Resource { id } => {
                    let mut records = self.table.query_resource(id);
                    while let Some(record) = records.try_next().await? {
                        keys.insert(record.key());
                    }
                }
            }
        }

        let count = keys.len();
        if count > 0 {
            info!(entries = entries.len(), records = count, "deleting compliance status");
            let keys: Vec<_> = keys.into_iter().collect();
            warden_batch::execute(&DeleteRecords(self.table.as_ref()), keys, self.write_backoff).await?;
            self.snapshots.invalidate();
        }
        Ok(count)
    }

    async fn org_tally(&self) -> Result<Arc<OrgTally>, ComplianceError> {
        if let Some(tally) = self.snapshots.get() {
            debug!("using cached org tally");
            return Ok(tally);
        }

        let mut tally = OrgTally::default();
        let mut records = self.table.scan_unsuppressed();
        while let Some(record) = records.try_next().await? {
            tally.record(&record);
        }

        let tally = Arc::new(tally);
        self.snapshots.insert(tally.clone());
        Ok(tally)
    }

    /// Every policy and resource with its derived status, top failing first.
    pub async fn describe_org(&self) -> Result<EntireOrg, ComplianceError> {
        Ok(self.org_tally().await?.describe())
    }

    pub async fn org_overview(&self, limit_top_failing: usize) -> Result<OrgOverview, ComplianceError> {
        Ok(self.org_tally().await?.overview(limit_top_failing))
    }

    pub async fn describe_policy(
        &self,
        policy_id: &str,
        params: &PageParams,
    ) -> Result<PolicyResourceDetail, ComplianceError> {
        params.validate()?;
        detail(self.table.query_policy(policy_id), params, None).await
    }

    pub async fn describe_resource(
        &self,
        resource_id: &str,
        params: &PageParams,
        severity: Option<Severity>,
    ) -> Result<PolicyResourceDetail, ComplianceError> {
        params.validate()?;
        detail(self.table.query_resource(resource_id), params, severity).await
    }

    /// Apply a policy's new severity and suppressions to its stored records,
    /// rewriting only those that change. Returns the number rewritten.
    pub async fn update_metadata(&self, update: &UpdateMetadata) -> Result<usize, ComplianceError> {
        info!(policy_id = %update.policy_id, "querying records to update");
        let suppressions = SuppressionSet::compile(&update.suppressions);

        let mut changed = Vec::new();
        let mut records = self.table.query_policy(&update.policy_id);
        while let Some(mut record) = records.try_next().await? {
            let suppressed = suppressions.is_suppressed(&record.resource_id);
            if record.suppressed != suppressed || record.severity != update.severity {
                record.suppressed = suppressed;
                record.severity = update.severity;
                changed.push(record);
            }
        }

        let count = changed.len();
        self.write(changed).await?;
        Ok(count)
    }

    /// Remove records whose lifetime has passed.
    pub async fn purge_expired(&self) -> Result<u64, ComplianceError> {
        let purged = self.table.purge_expired(Utc::now()).await?;
        if purged > 0 {
            info!(purged, "purged expired compliance records");
            self.snapshots.invalidate();
        }
        Ok(purged)
    }
}

async fn detail(
    mut records: RecordStream<'_>,
    params: &PageParams,
    severity: Option<Severity>,
) -> Result<PolicyResourceDetail, ComplianceError> {
    let mut builder = DetailBuilder::new(params.clone(), severity);
    while let Some(record) = records.try_next().await? {
        builder.add(record);
    }
    Ok(builder.finish())
}
