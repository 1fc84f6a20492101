//! PostgreSQL backends.
//!
//! `compliance_status` is keyed by `(resource_id, policy_id)` with a
//! secondary index on `policy_id`; `alert_debounce` is keyed by `policy_id`.
//! See `migrations/` at the workspace root.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{future, StreamExt, TryStreamExt};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{info, warn};
use warden_batch::CallError;
use warden_core::config::PostgresConfig;
use warden_core::{ComplianceStatus, StatusKey};

use crate::debounce::DebounceStore;
use crate::error::ComplianceError;
use crate::table::{ComplianceTable, RecordStream};

/// Connect and apply migrations. Returns `None` when Postgres is not
/// configured or unreachable, so callers can fall back to local mode.
pub async fn init_pg_pool(config: &PostgresConfig) -> Option<PgPool> {
    if !config.is_configured() {
        warn!("Postgres not configured, compliance data will not persist");
        return None;
    }

    let pool = match PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.connection_string())
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            warn!(host = %config.host, error = %e, "failed to connect to Postgres");
            return None;
        }
    };
    info!(host = %config.host, database = %config.database, "Postgres connected");

    match sqlx::migrate!("../../migrations").run(&pool).await {
        Ok(()) => {
            info!("database migrations applied");
            Some(pool)
        }
        Err(e) => {
            warn!(error = %e, "failed to run migrations");
            None
        }
    }
}

/// Serialization failures, deadlocks, connection exhaustion and I/O are
/// retried; everything else is permanent.
fn classify(err: sqlx::Error) -> CallError {
    let transient = match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some("40001" | "40P01" | "53300" | "57P03")
        ),
        _ => false,
    };
    if transient {
        CallError::Transient(err.to_string())
    } else {
        CallError::Permanent(err.to_string())
    }
}

macro_rules! select_status {
    ($filter:literal) => {
        concat!(
            "SELECT resource_id, resource_type, policy_id, integration_id, status, severity, ",
            "suppressed, error_message, last_updated, expires_at ",
            "FROM compliance_status WHERE expires_at > NOW() AND ",
            $filter
        )
    };
}

#[derive(sqlx::FromRow)]
struct StatusRow {
    resource_id: String,
    resource_type: String,
    policy_id: String,
    integration_id: String,
    status: String,
    severity: String,
    suppressed: bool,
    error_message: Option<String>,
    last_updated: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<StatusRow> for ComplianceStatus {
    type Error = ComplianceError;

    fn try_from(row: StatusRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| ComplianceError::CorruptRecord {
            resource_id: row.resource_id.clone(),
            policy_id: row.policy_id.clone(),
            reason,
        };
        let status = row.status.parse().map_err(|e| corrupt(format!("{e}")))?;
        let severity = row.severity.parse().map_err(|e| corrupt(format!("{e}")))?;

        Ok(ComplianceStatus {
            resource_id: row.resource_id,
            resource_type: row.resource_type,
            policy_id: row.policy_id,
            integration_id: row.integration_id,
            status,
            severity,
            suppressed: row.suppressed,
            error_message: row.error_message,
            last_updated: row.last_updated,
            expires_at: row.expires_at,
        })
    }
}

fn unzip_keys(keys: &[StatusKey]) -> (Vec<String>, Vec<String>) {
    keys.iter()
        .map(|k| (k.resource_id.clone(), k.policy_id.clone()))
        .unzip()
}

pub struct PgComplianceTable {
    pool: PgPool,
}

impl PgComplianceTable {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn stream(&self, sql: &'static str, key: Option<String>) -> RecordStream<'_> {
        let query = sqlx::query_as::<_, StatusRow>(sql);
        let query = match key {
            Some(key) => query.bind(key),
            None => query,
        };
        query
            .fetch(&self.pool)
            .map_err(ComplianceError::from)
            .and_then(|row| future::ready(ComplianceStatus::try_from(row)))
            .boxed()
    }
}

#[async_trait]
impl ComplianceTable for PgComplianceTable {
    async fn put_chunk(&self, records: &[ComplianceStatus]) -> Result<Vec<ComplianceStatus>, CallError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(
                "INSERT INTO compliance_status (resource_id, resource_type, policy_id, integration_id, \
                 status, severity, suppressed, error_message, last_updated, expires_at) ",
            );
        qb.push_values(records, |mut row, r| {
            row.push_bind(r.resource_id.clone())
                .push_bind(r.resource_type.clone())
                .push_bind(r.policy_id.clone())
                .push_bind(r.integration_id.clone())
                .push_bind(r.status.as_str())
                .push_bind(r.severity.as_str())
                .push_bind(r.suppressed)
                .push_bind(r.error_message.clone())
                .push_bind(r.last_updated)
                .push_bind(r.expires_at);
        });
        qb.push(
            " ON CONFLICT (resource_id, policy_id) DO UPDATE SET \
               resource_type = EXCLUDED.resource_type, \
               integration_id = EXCLUDED.integration_id, \
               status = EXCLUDED.status, \
               severity = EXCLUDED.severity, \
               suppressed = EXCLUDED.suppressed, \
               error_message = EXCLUDED.error_message, \
               last_updated = EXCLUDED.last_updated, \
               expires_at = EXCLUDED.expires_at",
        );

        qb.build().execute(&self.pool).await.map_err(classify)?;
        Ok(Vec::new())
    }

    async fn delete_chunk(&self, keys: &[StatusKey]) -> Result<Vec<StatusKey>, CallError> {
        let (resource_ids, policy_ids) = unzip_keys(keys);
        sqlx::query(
            "DELETE FROM compliance_status
             WHERE (resource_id, policy_id) IN (SELECT * FROM UNNEST($1::text[], $2::text[]))",
        )
        .bind(resource_ids)
        .bind(policy_ids)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(Vec::new())
    }

    async fn get_chunk(&self, keys: &[StatusKey]) -> Result<Vec<ComplianceStatus>, CallError> {
        let (resource_ids, policy_ids) = unzip_keys(keys);
        let rows = sqlx::query_as::<_, StatusRow>(select_status!(
            "(resource_id, policy_id) IN (SELECT * FROM UNNEST($1::text[], $2::text[]))"
        ))
        .bind(resource_ids)
        .bind(policy_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        rows.into_iter()
            .map(|row| ComplianceStatus::try_from(row).map_err(|e| CallError::permanent(e.to_string())))
            .collect()
    }

    async fn get(&self, key: &StatusKey) -> Result<Option<ComplianceStatus>, ComplianceError> {
        sqlx::query_as::<_, StatusRow>(select_status!("resource_id = $1 AND policy_id = $2"))
        .bind(&key.resource_id)
        .bind(&key.policy_id)
        .fetch_optional(&self.pool)
        .await?
        .map(ComplianceStatus::try_from)
        .transpose()
    }

    fn scan_unsuppressed(&self) -> RecordStream<'_> {
        self.stream(select_status!("NOT suppressed"), None)
    }

    fn query_policy(&self, policy_id: &str) -> RecordStream<'_> {
        self.stream(select_status!("policy_id = $1 ORDER BY resource_id"), Some(policy_id.to_string()))
    }

    fn query_resource(&self, resource_id: &str) -> RecordStream<'_> {
        self.stream(select_status!("resource_id = $1 ORDER BY policy_id"), Some(resource_id.to_string()))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, ComplianceError> {
        let result = sqlx::query("DELETE FROM compliance_status WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

pub struct PgDebounceStore {
    pool: PgPool,
}

impl PgDebounceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DebounceStore for PgDebounceStore {
    async fn acquire(
        &self,
        policy_id: &str,
        snapshot: &serde_json::Value,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, ComplianceError> {
        // The conflict branch only writes when the stored window is older
        // than the cutoff; RETURNING yields no row otherwise.
        let acquired = sqlx::query_scalar::<_, String>(
            "INSERT INTO alert_debounce (policy_id, last_updated, alert_config, expires_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (policy_id) DO UPDATE SET
                 last_updated = EXCLUDED.last_updated,
                 alert_config = EXCLUDED.alert_config,
                 expires_at = EXCLUDED.expires_at
             WHERE alert_debounce.last_updated < $5
             RETURNING policy_id",
        )
        .bind(policy_id)
        .bind(now)
        .bind(snapshot)
        .bind(expires_at)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        Ok(acquired.is_some())
    }
}
