//! Alert consumer: turns queued alert candidates into notifications and
//! remediation requests.
//!
//! Each candidate is re-checked against the compliance store because the
//! resource may have been fixed while the message sat in the queue. Only a
//! candidate that is still failing can alert, and only the caller that wins
//! the policy's debounce window actually notifies.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use warden_compliance::{AlertConfig, AlertDebounceGate, ComplianceStore};
use warden_core::{AlertCandidate, PolicySource, Status, StatusKey};

use crate::dispatcher::Dispatcher;
use crate::remediation::Remediator;
use crate::traits::{Notification, NotifyError};

/// What happened to a single candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// The pair is no longer failing (or no record exists).
    Resolved,
    /// Still failing, but nothing was sent: alerting disabled on the
    /// candidate, the policy vanished, or another caller holds the window.
    Debounced { remediated: bool },
    /// Still failing and this call won the debounce window.
    Notified { delivered: usize, failed: usize, remediated: bool },
}

/// How the worker should settle a message after processing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Leave the message for redelivery.
    Retry,
    /// Never processable; park it on the dead-letter queue and ack.
    DeadLetter,
}

impl Disposition {
    pub fn of(result: &Result<AlertOutcome, NotifyError>) -> Self {
        match result {
            Ok(_) => Disposition::Ack,
            Err(e) if e.is_retryable() => Disposition::Retry,
            Err(_) => Disposition::DeadLetter,
        }
    }
}

pub struct AlertProcessor {
    store: Arc<ComplianceStore>,
    policies: Arc<dyn PolicySource>,
    gate: AlertDebounceGate,
    dispatcher: Arc<Dispatcher>,
    remediator: Option<Arc<dyn Remediator>>,
    window: Duration,
}

impl AlertProcessor {
    pub fn new(
        store: Arc<ComplianceStore>,
        policies: Arc<dyn PolicySource>,
        gate: AlertDebounceGate,
        dispatcher: Arc<Dispatcher>,
        window: Duration,
    ) -> Self {
        Self {
            store,
            policies,
            gate,
            dispatcher,
            remediator: None,
            window,
        }
    }

    pub fn with_remediator(mut self, remediator: Option<Arc<dyn Remediator>>) -> Self {
        self.remediator = remediator;
        self
    }

    /// Parse a raw queue body and process it.
    pub async fn handle_message(&self, body: &str) -> Result<AlertOutcome, NotifyError> {
        let candidate: AlertCandidate = serde_json::from_str(body)?;
        self.process(&candidate).await
    }

    pub async fn process(&self, candidate: &AlertCandidate) -> Result<AlertOutcome, NotifyError> {
        let key = StatusKey::new(candidate.resource_id.clone(), candidate.policy_id.clone());
        let current = self.store.get_status(&key).await?;
        if current.as_ref().map(|s| s.status) != Some(Status::Fail) {
            debug!(
                policy_id = %candidate.policy_id,
                resource_id = %candidate.resource_id,
                "candidate no longer failing"
            );
            return Ok(AlertOutcome::Resolved);
        }

        let notified = if candidate.should_alert {
            self.notify(candidate).await?
        } else {
            None
        };

        let remediated = match &self.remediator {
            Some(remediator) => {
                remediator
                    .remediate(&candidate.policy_id, &candidate.resource_id)
                    .await?;
                true
            }
            None => false,
        };

        Ok(match notified {
            Some((delivered, failed)) => AlertOutcome::Notified { delivered, failed, remediated },
            None => AlertOutcome::Debounced { remediated },
        })
    }

    /// Returns `(delivered, failed)` channel counts when this call won the
    /// window, `None` otherwise.
    async fn notify(&self, candidate: &AlertCandidate) -> Result<Option<(usize, usize)>, NotifyError> {
        let Some(policy) = self.policies.get_policy(&candidate.policy_id).await? else {
            warn!(policy_id = %candidate.policy_id, "policy not found, skipping notification");
            return Ok(None);
        };

        let mut config = AlertConfig::from(&policy);
        if !candidate.policy_version_id.is_empty() {
            config.policy_version_id = candidate.policy_version_id.clone();
        }

        if !self
            .gate
            .try_acquire_debounce_window(&candidate.policy_id, self.window, &config)
            .await?
        {
            return Ok(None);
        }

        let notification = Notification::for_candidate(candidate, config);
        let results = self.dispatcher.dispatch(&notification).await;
        let delivered = results.iter().filter(|r| r.success).count();
        let failed = results.len() - delivered;
        info!(
            policy_id = %candidate.policy_id,
            resource_id = %candidate.resource_id,
            delivered,
            failed,
            "alert dispatched"
        );
        Ok(Some((delivered, failed)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use warden_compliance::{MemoryComplianceTable, MemoryDebounceStore};
    use warden_core::{Policy, SetStatus, Severity, WardenError};

    use super::*;
    use crate::traits::Notifier;

    struct Policies(Vec<Policy>);

    #[async_trait]
    impl PolicySource for Policies {
        async fn enabled_policies(&self) -> Result<Vec<Policy>, WardenError> {
            Ok(self.0.clone())
        }
        async fn get_policy(&self, policy_id: &str) -> Result<Option<Policy>, WardenError> {
            Ok(self.0.iter().find(|p| p.id == policy_id).cloned())
        }
    }

    struct Recorder {
        sent: Arc<Mutex<Vec<Notification>>>,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
        fn channel_name(&self) -> &str {
            "recorder"
        }
    }

    #[derive(Default)]
    struct CountingRemediator {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Remediator for CountingRemediator {
        async fn remediate(&self, _policy_id: &str, _resource_id: &str) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(NotifyError::Rejected {
                    service: "remediation".into(),
                    status: 503,
                    body: String::new(),
                });
            }
            Ok(())
        }
    }

    struct Fixture {
        processor: AlertProcessor,
        store: Arc<ComplianceStore>,
        debounce: Arc<MemoryDebounceStore>,
        sent: Arc<Mutex<Vec<Notification>>>,
    }

    fn fixture(remediator: Option<Arc<dyn Remediator>>) -> Fixture {
        let store = Arc::new(ComplianceStore::with_settings(
            Arc::new(MemoryComplianceTable::new()),
            Duration::from_secs(3600),
            Duration::from_secs(1),
            Duration::from_secs(30),
        ));
        let debounce = Arc::new(MemoryDebounceStore::new());
        let sent = Arc::new(Mutex::new(Vec::new()));
        let recorder: Box<dyn Notifier> = Box::new(Recorder { sent: sent.clone() });
        let dispatcher = Dispatcher::with_defaults(vec![recorder]);

        let mut policy = Policy::new("p1", "body", Severity::Critical);
        policy.display_name = "Public buckets".into();
        policy.version_id = "v-current".into();

        let processor = AlertProcessor::new(
            store.clone(),
            Arc::new(Policies(vec![policy])),
            AlertDebounceGate::new(debounce.clone()),
            Arc::new(dispatcher),
            Duration::from_secs(3600),
        )
        .with_remediator(remediator);

        Fixture { processor, store, debounce, sent }
    }

    async fn record(store: &ComplianceStore, resource_id: &str, status: Status) {
        store
            .set_status(vec![SetStatus {
                resource_id: resource_id.into(),
                resource_type: "AWS.S3.Bucket".into(),
                integration_id: "i1".into(),
                policy_id: "p1".into(),
                severity: Severity::Critical,
                status,
                error_message: None,
                suppressed: false,
            }])
            .await
            .unwrap();
    }

    fn candidate(resource_id: &str) -> AlertCandidate {
        AlertCandidate {
            resource_id: resource_id.into(),
            policy_id: "p1".into(),
            policy_version_id: "v-queued".into(),
            timestamp: Utc::now(),
            should_alert: true,
        }
    }

    #[tokio::test]
    async fn fixed_resources_are_resolved() {
        let f = fixture(None);
        record(&f.store, "r1", Status::Pass).await;

        assert_eq!(f.processor.process(&candidate("r1")).await.unwrap(), AlertOutcome::Resolved);
        assert_eq!(f.processor.process(&candidate("missing")).await.unwrap(), AlertOutcome::Resolved);
        assert!(f.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_failure_notifies_then_window_holds() {
        let f = fixture(None);
        record(&f.store, "r1", Status::Fail).await;
        record(&f.store, "r2", Status::Fail).await;

        let first = f.processor.process(&candidate("r1")).await.unwrap();
        assert_eq!(first, AlertOutcome::Notified { delivered: 1, failed: 0, remediated: false });

        let second = f.processor.process(&candidate("r2")).await.unwrap();
        assert_eq!(second, AlertOutcome::Debounced { remediated: false });

        let sent = f.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].resource_id, "r1");
        assert_eq!(sent[0].alert.policy_version_id, "v-queued");
        assert_eq!(sent[0].subject, "[CRITICAL] Policy failure: Public buckets");

        let held = f.debounce.get("p1").unwrap();
        assert_eq!(held.snapshot["displayName"], "Public buckets");
    }

    #[tokio::test]
    async fn remediation_runs_regardless_of_debounce() {
        let remediator = Arc::new(CountingRemediator::default());
        let f = fixture(Some(remediator.clone() as Arc<dyn Remediator>));
        record(&f.store, "r1", Status::Fail).await;

        let mut quiet = candidate("r1");
        quiet.should_alert = false;
        assert_eq!(
            f.processor.process(&quiet).await.unwrap(),
            AlertOutcome::Debounced { remediated: true }
        );
        assert!(f.debounce.get("p1").is_none());

        f.processor.process(&candidate("r1")).await.unwrap();
        f.processor.process(&candidate("r1")).await.unwrap();
        assert_eq!(remediator.calls.load(Ordering::SeqCst), 3);
        assert_eq!(f.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remediation_failure_is_returned() {
        let remediator = Arc::new(CountingRemediator { fail: true, ..Default::default() });
        let f = fixture(Some(remediator as Arc<dyn Remediator>));
        record(&f.store, "r1", Status::Fail).await;

        let result = f.processor.process(&candidate("r1")).await;
        assert!(matches!(result, Err(NotifyError::Rejected { status: 503, .. })));
    }

    #[tokio::test]
    async fn malformed_messages_are_dead_lettered_not_retried() {
        let f = fixture(None);
        let result = f.processor.handle_message("{\"resourceId\": 7}").await;
        assert!(matches!(result, Err(NotifyError::Parse(_))));
        assert_eq!(Disposition::of(&result), Disposition::DeadLetter);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let remediator = Arc::new(CountingRemediator { fail: true, ..Default::default() });
        let f = fixture(Some(remediator as Arc<dyn Remediator>));
        record(&f.store, "r1", Status::Fail).await;

        let body = serde_json::to_string(&candidate("r1")).unwrap();
        let result = f.processor.handle_message(&body).await;
        assert_eq!(Disposition::of(&result), Disposition::Retry);

        record(&f.store, "r1", Status::Pass).await;
        let result = f.processor.handle_message(&body).await;
        assert_eq!(Disposition::of(&result), Disposition::Ack);
    }

    #[tokio::test]
    async fn unknown_policy_skips_notification() {
        let f = fixture(None);
        let mut orphan = candidate("r1");
        orphan.policy_id = "gone".into();
        f.store
            .set_status(vec![SetStatus {
                resource_id: "r1".into(),
                resource_type: "AWS.S3.Bucket".into(),
                integration_id: "i1".into(),
                policy_id: "gone".into(),
                severity: Severity::Low,
                status: Status::Fail,
                error_message: None,
                suppressed: false,
            }])
            .await
            .unwrap();

        let outcome = f.processor.process(&orphan).await.unwrap();
        assert_eq!(outcome, AlertOutcome::Debounced { remediated: false });
        assert!(f.sent.lock().unwrap().is_empty());
    }
}
