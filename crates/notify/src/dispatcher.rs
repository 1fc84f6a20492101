//! Fan-out of one alert to every channel registered for its policy.

use std::collections::HashMap;
use std::time::Instant;

use futures::future::join_all;

use crate::traits::{DispatchResult, Notification, Notifier, NotifyError};

/// Channel registry keyed by policy ID, with a shared fallback list.
///
/// A policy with its own entry uses only those channels; every other policy
/// goes to the fallback list. Channels are driven concurrently and a failing
/// channel never prevents delivery on the others.
#[derive(Default)]
pub struct Dispatcher {
    routes: HashMap<String, Vec<Box<dyn Notifier>>>,
    fallback: Vec<Box<dyn Notifier>>,
}

impl Dispatcher {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_defaults(fallback: Vec<Box<dyn Notifier>>) -> Self {
        Self {
            routes: HashMap::new(),
            fallback,
        }
    }

    /// Route `policy_id` to `channels` instead of the fallback list.
    pub fn set_policy_channels(&mut self, policy_id: impl Into<String>, channels: Vec<Box<dyn Notifier>>) {
        self.routes.insert(policy_id.into(), channels);
    }

    pub fn channel_count(&self) -> usize {
        self.routes.values().chain(std::iter::once(&self.fallback)).map(Vec::len).sum()
    }

    fn channels_for(&self, policy_id: &str) -> &[Box<dyn Notifier>] {
        self.routes.get(policy_id).unwrap_or(&self.fallback)
    }

    pub async fn dispatch(&self, notification: &Notification) -> Vec<DispatchResult> {
        let policy_id = notification.alert.policy_id.as_str();
        let channels = self.channels_for(policy_id);
        if channels.is_empty() {
            tracing::debug!(policy_id, "alert has no channels");
            return Vec::new();
        }

        join_all(channels.iter().map(|channel| deliver(channel.as_ref(), notification))).await
    }

    /// Send a test notification through each fallback channel.
    pub async fn test_defaults(&self) -> Vec<(String, Result<(), NotifyError>)> {
        join_all(self.fallback.iter().map(|channel| async move {
            (channel.channel_name().to_string(), channel.test().await)
        }))
        .await
    }
}

async fn deliver(channel: &dyn Notifier, notification: &Notification) -> DispatchResult {
    let policy_id = notification.alert.policy_id.clone();
    let started = Instant::now();
    let outcome = channel.send(notification).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let error = match outcome {
        Ok(()) => {
            tracing::info!(%policy_id, channel = channel.channel_name(), duration_ms, "alert delivered");
            None
        }
        Err(e) => {
            tracing::warn!(%policy_id, channel = channel.channel_name(), error = %e, duration_ms, "alert delivery failed");
            Some(e.to_string())
        }
    };

    DispatchResult {
        channel: channel.channel_name().to_string(),
        policy_id,
        success: error.is_none(),
        error,
        duration_ms,
    }
}
