//! trigger-worker: consumes resource/policy change events and records
//! compliance verdicts.
//!
//! Polls the change queue, micro-batches messages, runs each batch through
//! the evaluation pipeline and acks on success. A failed batch is nacked as a
//! whole so the queue redelivers it. Expired compliance records are purged
//! on a timer.
//!
//! With no queues configured (or `--local`) everything runs in memory; use
//! `--events` to seed the in-memory change queue from a JSON-lines file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use warden_compliance::{Backends, ComplianceStore};
use warden_core::config::{load_dotenv, Config};
use warden_queue::{
    sqs_client, MemoryQueue, MessageSink, MicroBatcher, OutboundMessage, QueueConsumer, QueueMessage, SqsConsumer,
    SqsProducer,
};
use warden_trigger::{
    handle_batch, CachedPolicySource, HttpPolicyEngine, HttpPolicySource, HttpResourceSource, TriggerContext,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Evaluation trigger worker.
#[derive(Parser, Debug)]
#[command(name = "trigger-worker", version, about)]
struct Cli {
    /// Config profile (e.g. PROD); keys resolve as {PROFILE}_{KEY} first.
    #[arg(long, env = "WARDEN_PROFILE", default_value = "")]
    profile: String,

    /// Run on in-memory queues and store regardless of configuration.
    #[arg(long)]
    local: bool,

    /// JSON-lines file of change events to enqueue at startup (local mode).
    #[arg(long)]
    events: Option<PathBuf>,

    /// Delay between polls, in milliseconds.
    #[arg(long, env = "TRIGGER_POLL_INTERVAL_MS", default_value_t = 250)]
    poll_interval_ms: u64,

    /// Longest pause after consecutive failed batches, in seconds.
    #[arg(long, env = "TRIGGER_MAX_ERROR_BACKOFF", default_value_t = 60)]
    max_error_backoff: u64,
}

struct Queues {
    changes: Arc<dyn QueueConsumer>,
    alerts: Arc<dyn MessageSink>,
    dead_letter: Option<Arc<dyn MessageSink>>,
    local: Option<Arc<MemoryQueue>>,
}

fn build_queues(config: &Config, force_local: bool) -> Queues {
    let queues = &config.queues;
    if let (false, Some(changes_url), Some(alerts_url)) =
        (force_local, &queues.resource_queue_url, &queues.alert_queue_url)
    {
        let client = sqs_client(&config.aws);
        let send_backoff = config.compliance.send_backoff();
        let consumer = SqsConsumer::new(client.clone(), changes_url, queues.visibility_timeout_secs)
            .with_dead_letter(queues.dead_letter_url.clone());
        let dead_letter = queues.dead_letter_url.as_ref().map(|url| {
            Arc::new(SqsProducer::new(client.clone(), url, send_backoff)) as Arc<dyn MessageSink>
        });
        return Queues {
            changes: Arc::new(consumer),
            alerts: Arc::new(SqsProducer::new(client, alerts_url, send_backoff)),
            dead_letter,
            local: None,
        };
    }

    warn!("change/alert queues not configured, using in-memory queues");
    let changes = Arc::new(MemoryQueue::new());
    Queues {
        changes: changes.clone(),
        alerts: Arc::new(MemoryQueue::new()),
        dead_letter: None,
        local: Some(changes),
    }
}

async fn seed_events(queue: &MemoryQueue, path: &Path) -> anyhow::Result<usize> {
    let contents = tokio::fs::read_to_string(path).await?;
    let messages: Vec<_> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(OutboundMessage::new)
        .collect();
    let count = messages.len();
    queue.send_batch(messages).await?;
    Ok(count)
}

fn spawn_purge(store: Arc<ComplianceStore>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = store.purge_expired().await {
                warn!(error = %e, "failed to purge expired compliance records");
            }
        }
    });
}

async fn settle(consumer: &dyn QueueConsumer, batch: &[QueueMessage], success: bool) {
    for msg in batch {
        let result = if success {
            consumer.ack(&msg.receipt_handle).await
        } else {
            consumer.nack(&msg.receipt_handle).await
        };
        if let Err(e) = result {
            warn!(message_id = %msg.id, error = %e, "failed to settle message");
        }
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::for_profile(&cli.profile);
    config.log_summary();

    let backends = if cli.local {
        Backends::in_memory()
    } else {
        Backends::from_config(&config.postgres).await
    };
    let store = Arc::new(ComplianceStore::new(backends.table.clone(), &config.compliance));

    let http = reqwest::Client::builder()
        .timeout(config.services.request_timeout())
        .build()?;
    let policies = Arc::new(CachedPolicySource::new(
        Arc::new(HttpPolicySource::new(http.clone(), &config.services.policy_api_url)),
        Duration::from_secs(config.compliance.policy_cache_ttl_secs),
    ));
    let resources = Arc::new(HttpResourceSource::new(http.clone(), &config.services.resource_api_url));
    let engine = Arc::new(HttpPolicyEngine::new(http, config.services.policy_engine_url.clone()));

    let queues = build_queues(&config, cli.local);
    if let (Some(queue), Some(path)) = (&queues.local, &cli.events) {
        let count = seed_events(queue, path).await?;
        info!(count, path = %path.display(), "seeded change events");
    }

    let ctx = TriggerContext::new(store.clone(), policies, resources, engine, queues.alerts.clone())
        .with_dead_letter(queues.dead_letter.clone())
        .with_alert_delay(config.compliance.alert_delay_secs)
        .with_resource_page_size(config.compliance.resource_page_size);

    spawn_purge(store, Duration::from_secs(config.compliance.purge_interval_secs.max(1)));

    let consumer = queues.changes;
    let mut batcher = MicroBatcher::from_config(&config.queues);
    let poll_interval = Duration::from_millis(cli.poll_interval_ms);
    let max_error_backoff = Duration::from_secs(cli.max_error_backoff);
    let mut consecutive_errors: u32 = 0;

    info!(
        batch_max_messages = config.queues.batch_max_messages,
        batch_max_wait_ms = config.queues.batch_max_wait_ms,
        "trigger-worker started"
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            polled = consumer.poll_batch(config.queues.receive_batch_size) => match polled {
                Ok(messages) => {
                    batcher.push(messages);
                }
                Err(e) => {
                    warn!(error = %e, "change queue poll failed, retrying in {:?}", poll_interval);
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }
            },
        }

        if let Some(batch) = batcher.try_flush() {
            let bodies: Vec<String> = batch.iter().map(|m| m.body.clone()).collect();
            match handle_batch(&ctx, &bodies).await {
                Ok(_) => {
                    consecutive_errors = 0;
                    settle(consumer.as_ref(), &batch, true).await;
                }
                Err(e) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    error!(error = %e, messages = batch.len(), consecutive_errors, "change batch failed");
                    settle(consumer.as_ref(), &batch, false).await;

                    let backoff = poll_interval
                        .saturating_mul(2u32.saturating_pow(consecutive_errors.min(16)))
                        .min(max_error_backoff);
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            }
        }

        tokio::time::sleep(poll_interval).await;
    }

    // Anything buffered but not processed becomes visible again.
    let pending = batcher.flush();
    settle(consumer.as_ref(), &pending, false).await;
    info!("trigger-worker exited cleanly");
    Ok(())
}
