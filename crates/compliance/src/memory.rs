//! In-memory backends for local mode and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use warden_batch::CallError;
use warden_core::{ComplianceStatus, StatusKey};

use crate::debounce::DebounceStore;
use crate::error::ComplianceError;
use crate::table::{ComplianceTable, RecordStream};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Compliance records held in an ordered map keyed by (resource, policy).
#[derive(Default)]
pub struct MemoryComplianceTable {
    records: Mutex<BTreeMap<StatusKey, ComplianceStatus>>,
}

impl MemoryComplianceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired or not.
    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn collect<F>(&self, keep: F) -> RecordStream<'_>
    where
        F: Fn(&ComplianceStatus) -> bool,
    {
        let now = Utc::now();
        let matching: Vec<_> = lock(&self.records)
            .values()
            .filter(|r| r.expires_at > now && keep(r))
            .cloned()
            .map(Ok)
            .collect();
        stream::iter(matching).boxed()
    }
}

#[async_trait]
impl ComplianceTable for MemoryComplianceTable {
    async fn put_chunk(&self, records: &[ComplianceStatus]) -> Result<Vec<ComplianceStatus>, CallError> {
        let mut map = lock(&self.records);
        for record in records {
            map.insert(record.key(), record.clone());
        }
        Ok(Vec::new())
    }

    async fn delete_chunk(&self, keys: &[StatusKey]) -> Result<Vec<StatusKey>, CallError> {
        let mut map = lock(&self.records);
        for key in keys {
            map.remove(key);
        }
        Ok(Vec::new())
    }

    async fn get_chunk(&self, keys: &[StatusKey]) -> Result<Vec<ComplianceStatus>, CallError> {
        let now = Utc::now();
        let map = lock(&self.records);
        Ok(keys
            .iter()
            .filter_map(|k| map.get(k))
            .filter(|r| r.expires_at > now)
            .cloned()
            .collect())
    }

    async fn get(&self, key: &StatusKey) -> Result<Option<ComplianceStatus>, ComplianceError> {
        let now = Utc::now();
        Ok(lock(&self.records)
            .get(key)
            .filter(|r| r.expires_at > now)
            .cloned())
    }

    fn scan_unsuppressed(&self) -> RecordStream<'_> {
        self.collect(|r| !r.suppressed)
    }

    fn query_policy(&self, policy_id: &str) -> RecordStream<'_> {
        self.collect(|r| r.policy_id == policy_id)
    }

    fn query_resource(&self, resource_id: &str) -> RecordStream<'_> {
        self.collect(|r| r.resource_id == resource_id)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, ComplianceError> {
        let mut map = lock(&self.records);
        let before = map.len();
        map.retain(|_, r| r.expires_at > now);
        Ok((before - map.len()) as u64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DebounceRecord {
    pub last_updated: DateTime<Utc>,
    pub snapshot: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

/// Debounce records behind a mutex; the check and the write happen under
/// one lock acquisition.
#[derive(Default)]
pub struct MemoryDebounceStore {
    records: Mutex<HashMap<String, DebounceRecord>>,
}

impl MemoryDebounceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, policy_id: &str) -> Option<DebounceRecord> {
        lock(&self.records).get(policy_id).cloned()
    }
}

#[async_trait]
impl DebounceStore for MemoryDebounceStore {
    async fn acquire(
        &self,
        policy_id: &str,
        snapshot: &serde_json::Value,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, ComplianceError> {
        let mut records = lock(&self.records);
        if records.get(policy_id).is_some_and(|r| r.last_updated >= cutoff) {
            return Ok(false);
        }
        records.insert(
            policy_id.to_string(),
            DebounceRecord {
                last_updated: now,
                snapshot: snapshot.clone(),
                expires_at,
            },
        );
        Ok(true)
    }
}
