//! Status counters and the derived-status rule shared by every aggregation.

use serde::{Deserialize, Serialize};
use warden_core::{Severity, Status};

/// Pass/fail/error tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub error: u64,
    pub fail: u64,
    pub pass: u64,
}

impl StatusCount {
    pub fn record(&mut self, status: Status) {
        match status {
            Status::Pass => self.pass += 1,
            Status::Fail => self.fail += 1,
            Status::Error => self.error += 1,
        }
    }

    /// Errors plus failures.
    pub fn failing(&self) -> u64 {
        self.error + self.fail
    }

    /// ERROR if anything errored, else FAIL if anything failed, else PASS.
    pub fn status(&self) -> Status {
        if self.error > 0 {
            Status::Error
        } else if self.fail > 0 {
            Status::Fail
        } else {
            Status::Pass
        }
    }
}

/// One [`StatusCount`] per policy severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCountBySeverity {
    pub info: StatusCount,
    pub low: StatusCount,
    pub medium: StatusCount,
    pub high: StatusCount,
    pub critical: StatusCount,
}

impl StatusCountBySeverity {
    pub fn bucket(&self, severity: Severity) -> &StatusCount {
        match severity {
            Severity::Info => &self.info,
            Severity::Low => &self.low,
            Severity::Medium => &self.medium,
            Severity::High => &self.high,
            Severity::Critical => &self.critical,
        }
    }

    fn bucket_mut(&mut self, severity: Severity) -> &mut StatusCount {
        match severity {
            Severity::Info => &mut self.info,
            Severity::Low => &mut self.low,
            Severity::Medium => &mut self.medium,
            Severity::High => &mut self.high,
            Severity::Critical => &mut self.critical,
        }
    }

    pub fn record(&mut self, severity: Severity, status: Status) {
        self.bucket_mut(severity).record(status);
    }

    /// Same dominance rule as [`StatusCount::status`], across all buckets.
    pub fn status(&self) -> Status {
        let buckets = Severity::DESCENDING.map(|s| *self.bucket(s));
        if buckets.iter().any(|c| c.error > 0) {
            Status::Error
        } else if buckets.iter().any(|c| c.fail > 0) {
            Status::Fail
        } else {
            Status::Pass
        }
    }
}

/// Totals split by whether the pair is suppressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSuppressedCount {
    pub active: StatusCount,
    pub suppressed: StatusCount,
}

impl ActiveSuppressedCount {
    pub fn record(&mut self, status: Status, suppressed: bool) {
        if suppressed {
            self.suppressed.record(status);
        } else {
            self.active.record(status);
        }
    }
}
