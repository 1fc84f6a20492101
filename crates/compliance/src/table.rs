//! Storage backend for compliance records.
//!
//! Bulk methods take one chunk at a time and classify their failures so the
//! store can drive them through `warden_batch`. Reads skip records whose
//! `expires_at` has passed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use warden_batch::CallError;
use warden_core::{ComplianceStatus, StatusKey};

use crate::error::ComplianceError;

pub type RecordStream<'a> = BoxStream<'a, Result<ComplianceStatus, ComplianceError>>;

#[async_trait]
pub trait ComplianceTable: Send + Sync {
    /// Upsert a chunk of records with unique keys. Returns the records that
    /// were not written.
    async fn put_chunk(&self, records: &[ComplianceStatus]) -> Result<Vec<ComplianceStatus>, CallError>;

    /// Delete a chunk of keys. Returns the keys that were not deleted.
    async fn delete_chunk(&self, keys: &[StatusKey]) -> Result<Vec<StatusKey>, CallError>;

    /// Look up a chunk of keys. Missing keys are simply absent from the result.
    async fn get_chunk(&self, keys: &[StatusKey]) -> Result<Vec<ComplianceStatus>, CallError>;

    async fn get(&self, key: &StatusKey) -> Result<Option<ComplianceStatus>, ComplianceError>;

    /// Every unsuppressed record.
    fn scan_unsuppressed(&self) -> RecordStream<'_>;

    /// Every record for one policy, via the policy index.
    fn query_policy(&self, policy_id: &str) -> RecordStream<'_>;

    /// Every record for one resource.
    fn query_resource(&self, resource_id: &str) -> RecordStream<'_>;

    /// Physically remove records that expired before `now`. Returns the count.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, ComplianceError>;
}
