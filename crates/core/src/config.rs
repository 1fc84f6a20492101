use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_list(profile: &str, key: &str) -> Vec<String> {
    profiled_env_opt(profile, key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub aws: AwsConfig,
    pub postgres: PostgresConfig,
    pub queues: QueueConfig,
    pub services: ServiceConfig,
    pub compliance: ComplianceConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `WARDEN_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("WARDEN_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            aws: AwsConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
            queues: QueueConfig::from_env_profiled(p),
            services: ServiceConfig::from_env_profiled(p),
            compliance: ComplianceConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  aws:         region={}", self.aws.region);
        tracing::info!(
            "  postgres:    host={}, db={}, configured={}",
            self.postgres.host,
            self.postgres.database,
            self.postgres.is_configured()
        );
        tracing::info!(
            "  queues:      resources={}, alerts={}, dlq={}",
            self.queues.resource_queue_url.as_deref().unwrap_or("(in-memory)"),
            self.queues.alert_queue_url.as_deref().unwrap_or("(in-memory)"),
            self.queues.dead_letter_url.as_deref().unwrap_or("(none)")
        );
        tracing::info!(
            "  services:    policy_api={}, resource_api={}, engine={}",
            self.services.policy_api_url,
            self.services.resource_api_url,
            self.services.policy_engine_url
        );
        tracing::info!(
            "  compliance:  debounce={}s, status_lifetime={}h",
            self.compliance.debounce_window_secs,
            self.compliance.status_lifetime_hours
        );
    }
}

// ── AWS ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub endpoint_url: Option<String>,
}

impl AwsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            region: profiled_env_or(p, "AWS_REGION", "us-east-1"),
            access_key_id: profiled_env_opt(p, "AWS_ACCESS_KEY_ID"),
            secret_access_key: profiled_env_opt(p, "AWS_SECRET_ACCESS_KEY"),
            session_token: profiled_env_opt(p, "AWS_SESSION_TOKEN"),
            endpoint_url: profiled_env_opt(p, "QUEUE_AWS_ENDPOINT_URL"),
        }
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "warden"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

// ── Queues ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Resource/policy change events consumed by the trigger worker.
    pub resource_queue_url: Option<String>,
    /// Alert candidates produced by the trigger, consumed by the alert worker.
    pub alert_queue_url: Option<String>,
    /// Destination for change events that are neither resources nor policies.
    pub dead_letter_url: Option<String>,
    pub visibility_timeout_secs: u32,
    pub receive_batch_size: u32,
    /// Micro-batch flush thresholds for the trigger worker.
    pub batch_max_messages: usize,
    pub batch_max_wait_ms: u64,
}

impl QueueConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            resource_queue_url: profiled_env_opt(p, "RESOURCE_QUEUE_URL"),
            alert_queue_url: profiled_env_opt(p, "ALERT_QUEUE_URL"),
            dead_letter_url: profiled_env_opt(p, "DEAD_LETTER_QUEUE_URL"),
            visibility_timeout_secs: profiled_env_u32(p, "QUEUE_VISIBILITY_TIMEOUT", 120),
            receive_batch_size: profiled_env_u32(p, "QUEUE_RECEIVE_BATCH", 10),
            batch_max_messages: profiled_env_u64(p, "TRIGGER_BATCH_MAX_MESSAGES", 50) as usize,
            batch_max_wait_ms: profiled_env_u64(p, "TRIGGER_BATCH_MAX_WAIT_MS", 2_000),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.resource_queue_url.is_some() && self.alert_queue_url.is_some()
    }
}

// ── External services ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub policy_api_url: String,
    pub resource_api_url: String,
    pub policy_engine_url: String,
    pub remediation_url: Option<String>,
    /// Webhook endpoints that receive alert notifications.
    pub alert_webhooks: Vec<String>,
    pub request_timeout_secs: u64,
}

impl ServiceConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            policy_api_url: profiled_env_or(p, "POLICY_API_URL", "http://localhost:8081"),
            resource_api_url: profiled_env_or(p, "RESOURCE_API_URL", "http://localhost:8082"),
            policy_engine_url: profiled_env_or(p, "POLICY_ENGINE_URL", "http://localhost:8083/evaluate"),
            remediation_url: profiled_env_opt(p, "REMEDIATION_URL"),
            alert_webhooks: profiled_env_list(p, "ALERT_WEBHOOK_URLS"),
            request_timeout_secs: profiled_env_u64(p, "SERVICE_TIMEOUT_SECS", 30),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ── Compliance behaviour ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceConfig {
    /// Records not refreshed within this many hours are purged.
    pub status_lifetime_hours: u64,
    pub debounce_window_secs: u64,
    pub write_backoff_secs: u64,
    pub send_backoff_secs: u64,
    pub policy_cache_ttl_secs: u64,
    pub snapshot_cache_ttl_secs: u64,
    pub alert_delay_secs: u32,
    pub resource_page_size: u64,
    pub purge_interval_secs: u64,
}

impl ComplianceConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            status_lifetime_hours: profiled_env_u64(p, "STATUS_LIFETIME_HOURS", 50),
            debounce_window_secs: profiled_env_u64(p, "ALERT_DEBOUNCE_SECS", 3_600),
            write_backoff_secs: profiled_env_u64(p, "WRITE_BACKOFF_SECS", 60),
            send_backoff_secs: profiled_env_u64(p, "SEND_BACKOFF_SECS", 30),
            policy_cache_ttl_secs: profiled_env_u64(p, "POLICY_CACHE_TTL_SECS", 30),
            snapshot_cache_ttl_secs: profiled_env_u64(p, "SNAPSHOT_CACHE_TTL_SECS", 30),
            alert_delay_secs: profiled_env_u32(p, "ALERT_DELAY_SECS", 30),
            resource_page_size: profiled_env_u64(p, "RESOURCE_PAGE_SIZE", 1_000),
            purge_interval_secs: profiled_env_u64(p, "PURGE_INTERVAL_SECS", 3_600),
        }
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_secs(self.debounce_window_secs)
    }

    pub fn status_lifetime(&self) -> Duration {
        Duration::from_secs(self.status_lifetime_hours * 3_600)
    }

    pub fn write_backoff(&self) -> Duration {
        Duration::from_secs(self.write_backoff_secs)
    }

    pub fn send_backoff(&self) -> Duration {
        Duration::from_secs(self.send_backoff_secs)
    }
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self::from_env_profiled("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_string_uses_defaults_for_missing_credentials() {
        let pg = PostgresConfig {
            host: "db".into(),
            port: 5433,
            database: "warden".into(),
            username: None,
            password: None,
            ssl_mode: "disable".into(),
            max_connections: 4,
        };
        assert_eq!(pg.connection_string(), "postgres://postgres:@db:5433/warden?sslmode=disable");
        assert!(!pg.is_configured());
    }

    #[test]
    fn profiled_lookup_prefers_prefixed_key() {
        env::set_var("WARDENTEST_ALERT_DEBOUNCE_SECS", "60");
        let cfg = ComplianceConfig::from_env_profiled("WARDENTEST");
        assert_eq!(cfg.debounce_window(), Duration::from_secs(60));
        env::remove_var("WARDENTEST_ALERT_DEBOUNCE_SECS");
    }

    #[test]
    fn list_values_are_trimmed_and_skip_empties() {
        env::set_var("WARDENLIST_ALERT_WEBHOOK_URLS", " http://a , ,http://b");
        let svc = ServiceConfig::from_env_profiled("WARDENLIST");
        assert_eq!(svc.alert_webhooks, vec!["http://a".to_string(), "http://b".to_string()]);
        env::remove_var("WARDENLIST_ALERT_WEBHOOK_URLS");
    }
}
