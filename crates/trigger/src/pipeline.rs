//! One change batch: classify, resolve the working set, evaluate, then record
//! verdicts and queue alert candidates for new failures.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use tracing::{error, info, warn};
use warden_compliance::SuppressionSet;
use warden_core::{AlertCandidate, Policy, Resource, SetStatus, Status, StatusKey};
use warden_queue::OutboundMessage;

use crate::context::TriggerContext;
use crate::engine::EvaluationRequest;
use crate::error::TriggerError;
use crate::event::{classify, ChangeEvent};

/// What one batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub resources: usize,
    pub policies: usize,
    pub unrecognized: usize,
    /// Distinct (resource, policy) verdicts written.
    pub statuses: usize,
    pub alerts: usize,
}

struct Verdict {
    entry: SetStatus,
    policy_version_id: String,
}

/// Verdicts keyed by (resource, policy); a later verdict for the same pair
/// replaces the earlier one.
#[derive(Default)]
struct Verdicts {
    entries: Vec<Verdict>,
    index: HashMap<StatusKey, usize>,
}

impl Verdicts {
    fn push(&mut self, verdict: Verdict) {
        let key = verdict.entry.key();
        match self.index.get(&key) {
            Some(&i) => self.entries[i] = verdict,
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push(verdict);
            }
        }
    }
}

/// Process one batch of raw change-event bodies.
///
/// Any inventory, evaluation or store failure aborts the whole batch so the
/// queue redelivers it; re-running a batch rewrites the same verdicts.
pub async fn handle_batch(ctx: &TriggerContext, bodies: &[String]) -> Result<BatchReport, TriggerError> {
    let mut resources: BTreeMap<String, Resource> = BTreeMap::new();
    let mut policies: BTreeMap<String, Policy> = BTreeMap::new();
    let mut unrecognized = Vec::new();

    for body in bodies {
        match classify(body) {
            ChangeEvent::Resource(resource) => {
                resources.insert(resource.id.clone(), resource);
            }
            ChangeEvent::Policy(policy) => {
                policies.insert(policy.id.clone(), policy);
            }
            ChangeEvent::Unrecognized(reason) => {
                error!(reason = %reason, body = %body, "failed to parse change event as resource or policy");
                unrecognized.push(body.clone());
            }
        }
    }

    let mut report = BatchReport {
        resources: resources.len(),
        policies: policies.len(),
        unrecognized: unrecognized.len(),
        ..BatchReport::default()
    };

    let mut verdicts = Verdicts::default();
    for policy in policies.values() {
        analyze_updated_policy(ctx, policy.clone(), &mut verdicts).await?;
    }

    if !resources.is_empty() {
        let mut enabled: BTreeMap<String, Policy> = ctx
            .policies
            .enabled_policies()
            .await?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        // The cached list may predate a policy change in this same batch.
        enabled.extend(policies);
        evaluate(ctx, &enabled, &resources, &mut verdicts).await?;
    }

    (report.statuses, report.alerts) = deliver(ctx, verdicts).await?;
    forward_unrecognized(ctx, unrecognized).await;

    info!(
        resources = report.resources,
        policies = report.policies,
        statuses = report.statuses,
        alerts = report.alerts,
        "change batch processed"
    );
    Ok(report)
}

/// Evaluate an updated policy against every resource of its types, a page
/// at a time.
async fn analyze_updated_policy(
    ctx: &TriggerContext,
    policy: Policy,
    verdicts: &mut Verdicts,
) -> Result<(), TriggerError> {
    let resource_types = policy.resource_types.clone();
    let single = BTreeMap::from([(policy.id.clone(), policy)]);

    let mut page = 1;
    let mut total_pages = 1;
    while page <= total_pages {
        let listing = ctx
            .resources
            .list_resources(&resource_types, page, ctx.resource_page_size)
            .await?;
        total_pages = listing.total_pages;

        let resources: BTreeMap<String, Resource> = listing
            .resources
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        evaluate(ctx, &single, &resources, verdicts).await?;
        page += 1;
    }
    Ok(())
}

async fn evaluate(
    ctx: &TriggerContext,
    policies: &BTreeMap<String, Policy>,
    resources: &BTreeMap<String, Resource>,
    verdicts: &mut Verdicts,
) -> Result<(), TriggerError> {
    if policies.is_empty() || resources.is_empty() {
        return Ok(());
    }

    let request = EvaluationRequest::new(policies.values(), resources.values());
    let output = ctx.engine.evaluate(&request).await?;

    let suppressions: HashMap<&str, SuppressionSet> = policies
        .iter()
        .map(|(id, p)| (id.as_str(), SuppressionSet::compile(&p.suppressions)))
        .collect();

    for result in output.resources {
        let Some(resource) = resources.get(&result.id) else {
            warn!(resource_id = %result.id, "engine returned a result for an unknown resource");
            continue;
        };

        let outcomes = result
            .errored
            .into_iter()
            .map(|e| (e.id, Status::Error, Some(e.message)))
            .chain(result.failed.into_iter().map(|id| (id, Status::Fail, None)))
            .chain(result.passed.into_iter().map(|id| (id, Status::Pass, None)));

        for (policy_id, status, error_message) in outcomes {
            let Some(policy) = policies.get(&policy_id) else {
                warn!(policy_id = %policy_id, resource_id = %resource.id, "engine returned an unknown policy");
                continue;
            };
            let suppressed = suppressions
                .get(policy_id.as_str())
                .is_some_and(|s| s.is_suppressed(&resource.id));

            verdicts.push(Verdict {
                entry: SetStatus {
                    resource_id: resource.id.clone(),
                    resource_type: resource.resource_type.clone(),
                    policy_id,
                    integration_id: resource.integration_id.clone(),
                    status,
                    severity: policy.severity,
                    suppressed,
                    error_message,
                },
                policy_version_id: policy.version_id.clone(),
            });
        }
    }
    Ok(())
}

/// Look up previous statuses of unsuppressed failures, write every verdict,
/// then queue a candidate for each pair newly failing. Returns the number of
/// verdicts written and candidates queued.
async fn deliver(ctx: &TriggerContext, verdicts: Verdicts) -> Result<(usize, usize), TriggerError> {
    if verdicts.entries.is_empty() {
        return Ok((0, 0));
    }

    let alertable = |v: &&Verdict| v.entry.status == Status::Fail && !v.entry.suppressed;

    // Must happen before the write below, which overwrites what we compare against.
    let failing: Vec<StatusKey> = verdicts.entries.iter().filter(alertable).map(|v| v.entry.key()).collect();
    let previous = if failing.is_empty() {
        HashMap::new()
    } else {
        ctx.store.previous_statuses(failing).await?
    };

    let now = Utc::now();
    let mut candidates = Vec::new();
    for verdict in verdicts.entries.iter().filter(alertable) {
        let key = verdict.entry.key();
        let before = previous.get(&key).copied().unwrap_or(Status::Pass);
        info!(
            policy_id = %key.policy_id,
            resource_id = %key.resource_id,
            previous = %before,
            "loaded previous compliance status"
        );
        if before == Status::Fail {
            continue;
        }
        candidates.push(AlertCandidate {
            resource_id: key.resource_id,
            policy_id: key.policy_id,
            policy_version_id: verdict.policy_version_id.clone(),
            timestamp: now,
            should_alert: true,
        });
    }

    let entries: Vec<SetStatus> = verdicts.entries.into_iter().map(|v| v.entry).collect();
    let statuses = entries.len();
    ctx.store.set_status(entries).await?;

    if !candidates.is_empty() {
        let messages = candidates
            .iter()
            .map(|c| OutboundMessage::json(c).map(|m| m.with_delay(ctx.alert_delay_secs)))
            .collect::<Result<Vec<_>, _>>()?;
        info!(candidates = messages.len(), "sending alert candidates");
        ctx.alerts.send_batch(messages).await?;
    }

    Ok((statuses, candidates.len()))
}

async fn forward_unrecognized(ctx: &TriggerContext, bodies: Vec<String>) {
    if bodies.is_empty() {
        return;
    }
    let Some(dead_letter) = &ctx.dead_letter else {
        return;
    };

    let count = bodies.len();
    let messages = bodies.into_iter().map(OutboundMessage::new).collect();
    match dead_letter.send_batch(messages).await {
        Ok(()) => info!(count, "forwarded unrecognized change events to dead-letter queue"),
        Err(e) => error!(count, error = %e, "failed to forward unrecognized change events"),
    }
}
