use std::sync::Arc;

use warden_compliance::ComplianceStore;
use warden_core::{PolicySource, ResourceSource};
use warden_queue::MessageSink;

use crate::engine::PolicyEngine;

pub const DEFAULT_ALERT_DELAY_SECS: u32 = 30;
pub const DEFAULT_RESOURCE_PAGE_SIZE: u64 = 1_000;

/// Everything one batch needs, built once per worker and passed to every
/// invocation.
#[derive(Clone)]
pub struct TriggerContext {
    pub store: Arc<ComplianceStore>,
    pub policies: Arc<dyn PolicySource>,
    pub resources: Arc<dyn ResourceSource>,
    pub engine: Arc<dyn PolicyEngine>,
    /// Destination of alert candidates.
    pub alerts: Arc<dyn MessageSink>,
    /// Where unrecognized change events are forwarded, if anywhere.
    pub dead_letter: Option<Arc<dyn MessageSink>>,
    /// Visibility delay on alert candidates, so the status write lands
    /// before the alert worker re-reads it.
    pub alert_delay_secs: u32,
    pub resource_page_size: u64,
}

impl TriggerContext {
    pub fn new(
        store: Arc<ComplianceStore>,
        policies: Arc<dyn PolicySource>,
        resources: Arc<dyn ResourceSource>,
        engine: Arc<dyn PolicyEngine>,
        alerts: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            store,
            policies,
            resources,
            engine,
            alerts,
            dead_letter: None,
            alert_delay_secs: DEFAULT_ALERT_DELAY_SECS,
            resource_page_size: DEFAULT_RESOURCE_PAGE_SIZE,
        }
    }

    pub fn with_dead_letter(mut self, sink: Option<Arc<dyn MessageSink>>) -> Self {
        self.dead_letter = sink;
        self
    }

    pub fn with_alert_delay(mut self, secs: u32) -> Self {
        self.alert_delay_secs = secs;
        self
    }

    pub fn with_resource_page_size(mut self, size: u64) -> Self {
        self.resource_page_size = size.max(1);
        self
    }
}
