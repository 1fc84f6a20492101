//! Short-lived org tally cache.
//!
//! The full scan behind describe-org and the overview is the most expensive
//! read; consecutive requests in a warm process reuse it until the TTL
//! passes. Nothing is shared across processes.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

use crate::query::OrgTally;

#[derive(Clone)]
pub struct SnapshotCache {
    cache: Cache<(), Arc<OrgTally>>,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder().max_capacity(1).time_to_live(ttl).build();
        Self { cache }
    }

    pub fn get(&self) -> Option<Arc<OrgTally>> {
        self.cache.get(&())
    }

    pub fn insert(&self, tally: Arc<OrgTally>) {
        self.cache.insert((), tally);
    }

    /// Drop the cached tally after a local write.
    pub fn invalidate(&self) {
        self.cache.invalidate(&());
    }
}
