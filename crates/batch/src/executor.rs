//! Drives a [`BatchOperation`] over an arbitrarily large item list.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::chunk::{chunk_items, ChunkLimits};
use crate::error::{BatchError, CallError};

/// Result of one remote call over a chunk.
#[derive(Debug)]
pub struct ChunkResponse<I, O> {
    /// Values returned by the call (lookups); empty for writes and sends.
    pub output: Vec<O>,
    /// Items the remote side accepted but did not process.
    pub unprocessed: Vec<I>,
}

impl<I, O> ChunkResponse<I, O> {
    pub fn complete(output: Vec<O>) -> Self {
        Self { output, unprocessed: Vec::new() }
    }

    pub fn partial(output: Vec<O>, unprocessed: Vec<I>) -> Self {
        Self { output, unprocessed }
    }
}

impl<I> ChunkResponse<I, ()> {
    /// Write/send call that processed everything.
    pub fn done() -> Self {
        Self::complete(Vec::new())
    }

    /// Write/send call that left `unprocessed` behind.
    pub fn retry(unprocessed: Vec<I>) -> Self {
        Self::partial(Vec::new(), unprocessed)
    }
}

/// A remote bulk API with a per-call size limit.
#[async_trait]
pub trait BatchOperation: Send + Sync {
    type Item: Send + Sync;
    type Output: Send;

    /// Name used in logs and errors (e.g. `"compliance.put"`).
    fn name(&self) -> &str;

    fn limits(&self) -> ChunkLimits;

    /// Payload size of one item, counted against [`ChunkLimits::max_bytes`].
    fn item_size(&self, _item: &Self::Item) -> usize {
        0
    }

    /// Issue one remote call for `chunk`.
    async fn call(
        &self,
        chunk: &[Self::Item],
    ) -> Result<ChunkResponse<Self::Item, Self::Output>, CallError>;
}

/// Run `op` over every item using the default backoff schedule.
pub async fn execute<Op>(
    op: &Op,
    items: Vec<Op::Item>,
    max_elapsed: Duration,
) -> Result<Vec<Op::Output>, BatchError>
where
    Op: BatchOperation + ?Sized,
{
    execute_with(op, items, BackoffPolicy::new(max_elapsed)).await
}

/// Run `op` over every item, chunked to its limits, retrying per `policy`.
///
/// Chunks are sent sequentially. A chunk is retried while its failures are
/// transient or it reports unprocessed items; each retry carries only the
/// items still outstanding. The first chunk that cannot complete aborts the
/// whole operation and the error reports how many items were confirmed.
pub async fn execute_with<Op>(
    op: &Op,
    items: Vec<Op::Item>,
    policy: BackoffPolicy,
) -> Result<Vec<Op::Output>, BatchError>
where
    Op: BatchOperation + ?Sized,
{
    let total = items.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let operation = op.name().to_string();
    info!(operation = %operation, total_items = total, "starting batch operation");
    let started = tokio::time::Instant::now();

    let chunks = chunk_items(items, op.limits(), |item| op.item_size(item));
    let mut outputs = Vec::new();
    let mut succeeded = 0usize;

    for chunk in chunks {
        let mut pending = chunk;
        let mut backoff = policy.start();

        loop {
            debug!(operation = %operation, items = pending.len(), "invoking batch call");

            let reason = match op.call(&pending).await {
                Ok(response) => {
                    succeeded += pending.len();
                    outputs.extend(response.output);

                    if response.unprocessed.is_empty() {
                        break;
                    }

                    // A remote reporting more leftovers than it was sent can
                    // only undo this call's own items.
                    let failed = response.unprocessed.len().min(pending.len());
                    succeeded = succeeded.saturating_sub(failed);
                    warn!(operation = %operation, unprocessed = failed, "backoff: batch call partially failed");
                    pending = response.unprocessed;
                    format!("{failed} unprocessed items")
                }
                Err(CallError::Permanent(reason)) => {
                    let failed = total.saturating_sub(succeeded);
                    error!(
                        operation = %operation,
                        succeeded,
                        failed,
                        error = %reason,
                        "batch operation permanently failed"
                    );
                    return Err(BatchError::Permanent { operation, succeeded, failed, reason });
                }
                Err(CallError::Transient(reason)) => {
                    warn!(operation = %operation, error = %reason, "backoff: remote temporarily unavailable");
                    reason
                }
            };

            match backoff.next_delay() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    let failed = total.saturating_sub(succeeded);
                    let elapsed = backoff.elapsed();
                    error!(
                        operation = %operation,
                        succeeded,
                        failed,
                        error = %reason,
                        "batch operation exhausted its retry budget"
                    );
                    return Err(BatchError::Exhausted { operation, succeeded, failed, elapsed, reason });
                }
            }
        }
    }

    info!(
        operation = %operation,
        total_items = total,
        duration_ms = started.elapsed().as_millis() as u64,
        "batch operation successful"
    );
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Records every call and replays a scripted response per call index.
    struct ScriptedOp {
        limits: ChunkLimits,
        calls: Mutex<Vec<Vec<u32>>>,
        script: Mutex<VecDeque<Script>>,
    }

    #[derive(Clone, Copy)]
    enum Script {
        Ok,
        Unprocessed(usize),
        /// Claims more leftovers than the chunk held.
        Overreported,
        Transient,
        Permanent,
    }

    impl ScriptedOp {
        fn new(limits: ChunkLimits, script: Vec<Script>) -> Self {
            Self {
                limits,
                calls: Mutex::new(Vec::new()),
                script: Mutex::new(script.into()),
            }
        }

        fn calls(&self) -> Vec<Vec<u32>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchOperation for ScriptedOp {
        type Item = u32;
        type Output = u32;

        fn name(&self) -> &str {
            "test.write"
        }

        fn limits(&self) -> ChunkLimits {
            self.limits
        }

        async fn call(&self, chunk: &[u32]) -> Result<ChunkResponse<u32, u32>, CallError> {
            self.calls.lock().unwrap().push(chunk.to_vec());
            let step = self.script.lock().unwrap().pop_front().unwrap_or(Script::Ok);
            match step {
                Script::Ok => Ok(ChunkResponse::complete(chunk.to_vec())),
                Script::Unprocessed(n) => {
                    let split = chunk.len() - n;
                    Ok(ChunkResponse::partial(chunk[..split].to_vec(), chunk[split..].to_vec()))
                }
                Script::Overreported => {
                    let mut unprocessed = chunk.to_vec();
                    unprocessed.extend(chunk.iter().map(|i| i + 1000));
                    Ok(ChunkResponse::partial(Vec::new(), unprocessed))
                }
                Script::Transient => Err(CallError::transient("throughput exceeded")),
                Script::Permanent => Err(CallError::permanent("validation failed")),
            }
        }
    }

    fn fast_policy(max_elapsed: Duration) -> BackoffPolicy {
        BackoffPolicy::new(max_elapsed).with_initial_interval(Duration::from_millis(10))
    }

    #[tokio::test(start_paused = true)]
    async fn partial_failure_retries_only_unprocessed_subset() {
        let op = ScriptedOp::new(
            ChunkLimits::WRITE,
            vec![Script::Ok, Script::Unprocessed(4), Script::Ok, Script::Ok],
        );
        let items: Vec<u32> = (0..57).collect();

        let output = execute_with(&op, items, fast_policy(Duration::from_secs(5))).await.unwrap();

        let calls = op.calls();
        let lens: Vec<usize> = calls.iter().map(Vec::len).collect();
        assert_eq!(lens, vec![25, 25, 4, 7]);
        assert_eq!(calls[2], vec![46, 47, 48, 49]);
        assert_eq!(output.len(), 57);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_retries_same_chunk() {
        let op = ScriptedOp::new(ChunkLimits::items(10), vec![Script::Transient, Script::Ok]);
        let items: Vec<u32> = (0..5).collect();

        execute_with(&op, items, fast_policy(Duration::from_secs(5))).await.unwrap();

        let calls = op.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_aborts_without_retry() {
        let op = ScriptedOp::new(ChunkLimits::items(10), vec![Script::Ok, Script::Permanent]);
        let items: Vec<u32> = (0..25).collect();

        let err = execute_with(&op, items, fast_policy(Duration::from_secs(5)))
            .await
            .unwrap_err();

        assert!(matches!(err, BatchError::Permanent { .. }));
        assert_eq!(err.succeeded(), 10);
        assert_eq!(err.failed(), 15);
        assert_eq!(op.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_reports_accurate_counts() {
        let mut script = vec![Script::Ok, Script::Unprocessed(3)];
        script.extend((0..1000).map(|_| Script::Unprocessed(3)));
        let op = ScriptedOp::new(ChunkLimits::WRITE, script);
        let items: Vec<u32> = (0..57).collect();

        let err = execute_with(&op, items, fast_policy(Duration::from_secs(1)))
            .await
            .unwrap_err();

        assert!(matches!(err, BatchError::Exhausted { .. }));
        assert_eq!(err.succeeded(), 47);
        assert_eq!(err.failed(), 10);
        // The third chunk is never attempted.
        assert!(op.calls().iter().all(|c| c.len() != 7));
    }

    #[tokio::test(start_paused = true)]
    async fn overreported_leftovers_do_not_underflow_counts() {
        let op = ScriptedOp::new(ChunkLimits::items(10), vec![Script::Overreported; 1000]);
        let items: Vec<u32> = (0..5).collect();

        let err = execute_with(&op, items, fast_policy(Duration::from_secs(1)))
            .await
            .unwrap_err();

        assert!(matches!(err, BatchError::Exhausted { .. }));
        assert_eq!(err.succeeded(), 0);
        assert_eq!(err.failed(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_input_makes_no_calls() {
        let op = ScriptedOp::new(ChunkLimits::WRITE, vec![]);
        let output = execute(&op, Vec::new(), Duration::from_secs(1)).await.unwrap();
        assert!(output.is_empty());
        assert!(op.calls().is_empty());
    }
}
