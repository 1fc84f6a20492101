//! AWS SQS consumer and batched producer.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_sqs::config::BehaviorVersion;
use aws_sdk_sqs::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::types::{MessageSystemAttributeName, QueueAttributeName, SendMessageBatchRequestEntry};
use aws_sdk_sqs::Client;
use chrono::{TimeZone, Utc};
use tracing::{debug, info, warn};

use warden_batch::{BatchOperation, CallError, ChunkLimits, ChunkResponse};
use warden_core::config::AwsConfig;

use crate::consumer::{QueueConsumer, QueueHealth, QueueMessage};
use crate::error::QueueError;
use crate::sink::{MessageSink, OutboundMessage};

/// Build an SQS client from project config.
///
/// Built directly instead of through `aws_config::defaults()` because the
/// shared loader honours `AWS_ENDPOINT_URL`, which may point at another
/// service. Only `QUEUE_AWS_ENDPOINT_URL` overrides the SQS endpoint.
pub fn sqs_client(aws: &AwsConfig) -> Client {
    let region = aws_sdk_sqs::config::Region::new(aws.region.clone());
    let mut sqs_config = aws_sdk_sqs::Config::builder()
        .region(region)
        .behavior_version(BehaviorVersion::latest());

    if let (Some(key_id), Some(secret)) = (&aws.access_key_id, &aws.secret_access_key) {
        let creds = Credentials::new(
            key_id,
            secret,
            aws.session_token.clone(),
            None,
            "warden-queue-static",
        );
        sqs_config = sqs_config.credentials_provider(creds);
    }

    if let Some(endpoint) = aws.endpoint_url.as_deref().filter(|e| !e.is_empty()) {
        let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("https://{endpoint}")
        };
        sqs_config = sqs_config.endpoint_url(url);
    }

    Client::from_conf(sqs_config.build())
}

/// Throttling and server-side faults are worth retrying; the rest are not.
fn classify<E, R>(err: SdkError<E, R>) -> CallError
where
    E: ProvideErrorMetadata + Debug,
    R: Debug,
{
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => true,
        SdkError::ServiceError(ctx) => matches!(
            ctx.err().code(),
            Some(
                "RequestThrottled"
                    | "ThrottlingException"
                    | "InternalError"
                    | "InternalFailure"
                    | "ServiceUnavailable"
                    | "KmsThrottled"
            )
        ),
        _ => false,
    };
    let reason = format!("{err:?}");
    if transient {
        CallError::Transient(reason)
    } else {
        CallError::Permanent(reason)
    }
}

/// SQS-backed queue consumer.
pub struct SqsConsumer {
    client: Client,
    queue_url: String,
    dlq_url: Option<String>,
    visibility_timeout_secs: i32,
}

impl SqsConsumer {
    pub fn new(client: Client, queue_url: impl Into<String>, visibility_timeout_secs: u32) -> Self {
        let queue_url = queue_url.into();
        info!(queue_url = %queue_url, "SQS consumer initialized");
        Self {
            client,
            queue_url,
            dlq_url: None,
            visibility_timeout_secs: visibility_timeout_secs as i32,
        }
    }

    /// Attach a dead-letter queue for depth reporting.
    pub fn with_dead_letter(mut self, dlq_url: Option<String>) -> Self {
        self.dlq_url = dlq_url;
        self
    }

    async fn approximate_depth(&self, queue_url: &str) -> Result<Option<u64>, QueueError> {
        let resp = self
            .client
            .get_queue_attributes()
            .queue_url(queue_url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(|e| QueueError::Connection(format!("SQS attribute lookup failed: {e:?}")))?;

        Ok(resp
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .and_then(|v| v.parse::<u64>().ok()))
    }
}

#[async_trait]
impl QueueConsumer for SqsConsumer {
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        // SQS caps at 10 messages per receive.
        let capped = max_messages.clamp(1, 10) as i32;

        let resp = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(capped)
            .wait_time_seconds(20)
            .visibility_timeout(self.visibility_timeout_secs)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .send()
            .await
            .map_err(|e| QueueError::Connection(format!("SQS receive failed: {e:?}")))?;

        let sqs_messages = resp.messages.unwrap_or_default();
        debug!(count = sqs_messages.len(), "received SQS messages");

        let mut messages = Vec::with_capacity(sqs_messages.len());
        for msg in sqs_messages {
            let receipt_handle = msg
                .receipt_handle()
                .ok_or_else(|| QueueError::Parse("missing receipt handle".into()))?
                .to_string();

            let attribute = |name: MessageSystemAttributeName| {
                msg.attributes().and_then(|attrs| attrs.get(&name)).cloned()
            };

            let timestamp = attribute(MessageSystemAttributeName::SentTimestamp)
                .and_then(|ts| ts.parse::<i64>().ok())
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .unwrap_or_else(Utc::now);

            let attempt_count = attribute(MessageSystemAttributeName::ApproximateReceiveCount)
                .and_then(|c| c.parse::<u32>().ok())
                .unwrap_or(1);

            messages.push(QueueMessage {
                id: msg.message_id().unwrap_or("unknown").to_string(),
                body: msg.body().unwrap_or("").to_string(),
                receipt_handle,
                timestamp,
                attempt_count,
            });
        }

        Ok(messages)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Ack(format!("SQS delete failed: {e:?}")))?;
        Ok(())
    }

    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        debug!(receipt_handle, "nacking SQS message (visibility=0)");
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(0)
            .send()
            .await
            .map_err(|e| QueueError::Provider(format!("SQS visibility change failed: {e:?}")))?;
        Ok(())
    }

    async fn health_check(&self) -> Result<QueueHealth, QueueError> {
        let count = self.approximate_depth(&self.queue_url).await?;
        Ok(QueueHealth {
            connected: true,
            approximate_message_count: count,
            provider: "sqs".to_string(),
        })
    }

    async fn dlq_depth(&self) -> Result<Option<u64>, QueueError> {
        match &self.dlq_url {
            Some(url) => self.approximate_depth(url).await,
            None => Ok(None),
        }
    }
}

/// Batched sender for one SQS queue.
pub struct SqsProducer {
    client: Client,
    queue_url: String,
    max_elapsed: Duration,
}

impl SqsProducer {
    pub fn new(client: Client, queue_url: impl Into<String>, max_elapsed: Duration) -> Self {
        Self { client, queue_url: queue_url.into(), max_elapsed }
    }
}

#[async_trait]
impl MessageSink for SqsProducer {
    async fn send_batch(&self, messages: Vec<OutboundMessage>) -> Result<(), QueueError> {
        warden_batch::execute(self, messages, self.max_elapsed).await?;
        Ok(())
    }
}

#[async_trait]
impl BatchOperation for SqsProducer {
    type Item = OutboundMessage;
    type Output = ();

    fn name(&self) -> &str {
        "sqs.send_message_batch"
    }

    fn limits(&self) -> ChunkLimits {
        ChunkLimits::SEND
    }

    fn item_size(&self, item: &OutboundMessage) -> usize {
        item.payload_size()
    }

    async fn call(&self, chunk: &[OutboundMessage]) -> Result<ChunkResponse<OutboundMessage, ()>, CallError> {
        // Entry ids are positions in the chunk so failures map straight back.
        let entries = chunk
            .iter()
            .enumerate()
            .map(|(i, msg)| {
                SendMessageBatchRequestEntry::builder()
                    .id(i.to_string())
                    .message_body(&msg.body)
                    .delay_seconds(msg.delay_seconds as i32)
                    .build()
                    .map_err(|e| CallError::permanent(format!("invalid batch entry: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let resp = self
            .client
            .send_message_batch()
            .queue_url(&self.queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(classify)?;

        let mut unprocessed = Vec::new();
        for failed in resp.failed() {
            if failed.sender_fault() {
                return Err(CallError::permanent(format!(
                    "message {} rejected: {} {}",
                    failed.id(),
                    failed.code(),
                    failed.message().unwrap_or_default()
                )));
            }
            let original = failed
                .id()
                .parse::<usize>()
                .ok()
                .and_then(|i| chunk.get(i))
                .ok_or_else(|| CallError::permanent(format!("unknown failed entry id {}", failed.id())))?;
            warn!(queue_url = %self.queue_url, code = failed.code(), "SQS entry failed, will retry");
            unprocessed.push(original.clone());
        }

        Ok(ChunkResponse::retry(unprocessed))
    }
}
