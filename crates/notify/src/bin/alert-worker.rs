//! alert-worker: consumes alert candidates queued by the trigger, applies the
//! per-policy debounce window and fans out to notification channels and the
//! remediation service.
//!
//! Each message is settled on its own: acked when processed, nacked (and so
//! redelivered after the visibility timeout) when processing fails for a
//! reason that may clear up. Bodies that can never be processed are forwarded
//! to the dead-letter queue, when one is configured, and acked.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use warden_compliance::{AlertDebounceGate, Backends, ComplianceStore};
use warden_core::config::{load_dotenv, Config};
use warden_notify::{
    AlertProcessor, Disposition, Dispatcher, HttpRemediator, Notifier, Remediator, WebhookNotifier,
};
use warden_queue::{
    sqs_client, MemoryQueue, MessageSink, OutboundMessage, QueueConsumer, QueueMessage, SqsConsumer, SqsProducer,
};
use warden_trigger::{CachedPolicySource, HttpPolicySource};

// ── CLI ─────────────────────────────────────────────────────────────

/// Alert delivery worker.
#[derive(Parser, Debug)]
#[command(name = "alert-worker", version, about)]
struct Cli {
    /// Config profile (e.g. PROD); keys resolve as {PROFILE}_{KEY} first.
    #[arg(long, env = "WARDEN_PROFILE", default_value = "")]
    profile: String,

    /// Run on in-memory queue and store regardless of configuration.
    #[arg(long)]
    local: bool,

    /// JSON-lines file of alert candidates to enqueue at startup (local mode).
    #[arg(long)]
    candidates: Option<PathBuf>,

    /// Send a test notification through every channel and exit.
    #[arg(long)]
    test_channels: bool,

    /// Delay between polls, in milliseconds.
    #[arg(long, env = "ALERT_POLL_INTERVAL_MS", default_value_t = 500)]
    poll_interval_ms: u64,
}

struct Queues {
    alerts: Arc<dyn QueueConsumer>,
    dead_letter: Option<Arc<dyn MessageSink>>,
    local: Option<Arc<MemoryQueue>>,
}

fn build_queues(config: &Config, force_local: bool) -> Queues {
    let queues = &config.queues;
    match (&queues.alert_queue_url, force_local) {
        (Some(url), false) => {
            let client = sqs_client(&config.aws);
            let consumer = SqsConsumer::new(client.clone(), url, queues.visibility_timeout_secs)
                .with_dead_letter(queues.dead_letter_url.clone());
            let dead_letter = queues.dead_letter_url.as_ref().map(|dlq| {
                Arc::new(SqsProducer::new(client, dlq, config.compliance.send_backoff())) as Arc<dyn MessageSink>
            });
            Queues { alerts: Arc::new(consumer), dead_letter, local: None }
        }
        _ => {
            warn!("alert queue not configured, using in-memory queue");
            let queue = Arc::new(MemoryQueue::new());
            Queues { alerts: queue.clone(), dead_letter: None, local: Some(queue) }
        }
    }
}

async fn settle(queues: &Queues, msg: &QueueMessage, disposition: Disposition) {
    if disposition == Disposition::DeadLetter {
        if let Some(dlq) = &queues.dead_letter {
            if let Err(e) = dlq.send_batch(vec![OutboundMessage::new(msg.body.as_str())]).await {
                // Keep the message so it is not lost; it will come back.
                warn!(message_id = %msg.id, error = %e, "failed to dead-letter alert candidate");
                if let Err(e) = queues.alerts.nack(&msg.receipt_handle).await {
                    warn!(message_id = %msg.id, error = %e, "failed to settle message");
                }
                return;
            }
        }
    }

    let result = match disposition {
        Disposition::Ack | Disposition::DeadLetter => queues.alerts.ack(&msg.receipt_handle).await,
        Disposition::Retry => queues.alerts.nack(&msg.receipt_handle).await,
    };
    if let Err(e) = result {
        warn!(message_id = %msg.id, error = %e, "failed to settle message");
    }
}

fn build_dispatcher(config: &Config, http: &reqwest::Client) -> anyhow::Result<Dispatcher> {
    let mut channels: Vec<Box<dyn Notifier>> = Vec::new();
    for url in &config.services.alert_webhooks {
        channels.push(Box::new(WebhookNotifier::from_config(http.clone(), url, None, None)?));
    }
    if channels.is_empty() {
        warn!("no alert webhooks configured, notifications will only be logged");
    }
    Ok(Dispatcher::with_defaults(channels))
}

async fn seed_candidates(queue: &MemoryQueue, path: &Path) -> anyhow::Result<usize> {
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

    let http = reqwest::Client::builder()
        .timeout(config.services.request_timeout())
        .build()?;
    let dispatcher = build_dispatcher(&config, &http)?;

    if cli.test_channels {
        for (channel, result) in dispatcher.test_defaults().await {
            match result {
                Ok(()) => info!(channel, "test notification delivered"),
                Err(e) => error!(channel, error = %e, "test notification failed"),
            }
        }
        return Ok(());
    }

    let backends = if cli.local {
        Backends::in_memory()
    } else {
        Backends::from_config(&config.postgres).await
    };
    let store = Arc::new(ComplianceStore::new(backends.table.clone(), &config.compliance));
    let policies = Arc::new(CachedPolicySource::new(
        Arc::new(HttpPolicySource::new(http.clone(), &config.services.policy_api_url)),
        Duration::from_secs(config.compliance.policy_cache_ttl_secs),
    ));
    let remediator = config
        .services
        .remediation_url
        .as_ref()
        .map(|url| Arc::new(HttpRemediator::new(http.clone(), url.clone())) as Arc<dyn Remediator>);

    let processor = AlertProcessor::new(
        store,
        policies,
        AlertDebounceGate::new(backends.debounce.clone()),
        Arc::new(dispatcher),
        config.compliance.debounce_window(),
    )
    .with_remediator(remediator);

    let queues = build_queues(&config, cli.local);
    let consumer = queues.alerts.clone();
    if let (Some(queue), Some(path)) = (&queues.local, &cli.candidates) {
        let count = seed_candidates(queue, path).await?;
        info!(count, path = %path.display(), "seeded alert candidates");
    }

    let poll_interval = Duration::from_millis(cli.poll_interval_ms);
    info!(window_secs = config.compliance.debounce_window().as_secs(), "alert-worker started");

    loop {
        let messages = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            polled = consumer.poll_batch(config.queues.receive_batch_size) => match polled {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(error = %e, "alert queue poll failed, retrying in {:?}", poll_interval);
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }
            },
        };

        for msg in &messages {
            let result = processor.handle_message(&msg.body).await;
            let disposition = Disposition::of(&result);
            match &result {
                Ok(outcome) => info!(message_id = %msg.id, ?outcome, "alert candidate processed"),
                Err(e) if disposition == Disposition::Retry => {
                    error!(message_id = %msg.id, attempt = msg.attempt_count, error = %e, "alert candidate failed")
                }
                Err(e) => {
                    error!(message_id = %msg.id, error = %e, body = %msg.body, "dropping unprocessable alert candidate")
                }
            }
            settle(&queues, msg, disposition).await;
        }

        if messages.is_empty() {
            tokio::time::sleep(poll_interval).await;
        }
    }

    info!("alert-worker exited cleanly");
    Ok(())
}
