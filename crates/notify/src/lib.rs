//! Alert consumer for compliance failures.
//!
//! This crate provides:
//! - `Notifier` trait for pluggable notification channels
//! - Webhook notifier implementation
//! - Dispatcher that routes notifications to configured channels
//! - `AlertProcessor`, which re-checks candidates, applies the debounce gate
//!   and requests remediation

pub mod dispatcher;
pub mod processor;
pub mod remediation;
pub mod traits;
pub mod webhook;

pub use dispatcher::Dispatcher;
pub use processor::{AlertOutcome, AlertProcessor, Disposition};
pub use remediation::{HttpRemediator, Remediator};
pub use traits::{DispatchResult, Notification, Notifier, NotifyError};
pub use webhook::WebhookNotifier;
