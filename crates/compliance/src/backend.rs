//! Backend selection: Postgres when configured and reachable, in-memory
//! otherwise.

use std::sync::Arc;

use tracing::{info, warn};
use warden_core::config::PostgresConfig;

use crate::debounce::DebounceStore;
use crate::memory::{MemoryComplianceTable, MemoryDebounceStore};
use crate::postgres::{init_pg_pool, PgComplianceTable, PgDebounceStore};
use crate::table::ComplianceTable;

#[derive(Clone)]
pub struct Backends {
    pub table: Arc<dyn ComplianceTable>,
    pub debounce: Arc<dyn DebounceStore>,
}

impl Backends {
    pub async fn from_config(config: &PostgresConfig) -> Self {
        match init_pg_pool(config).await {
            Some(pool) => {
                info!("using Postgres compliance backend");
                Self {
                    table: Arc::new(PgComplianceTable::new(pool.clone())),
                    debounce: Arc::new(PgDebounceStore::new(pool)),
                }
            }
            None => {
                warn!("running in local mode with in-memory compliance backend");
                Self::in_memory()
            }
        }
    }

    pub fn in_memory() -> Self {
        Self {
            table: Arc::new(MemoryComplianceTable::new()),
            debounce: Arc::new(MemoryDebounceStore::new()),
        }
    }
}
