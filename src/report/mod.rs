//! Cycle report collection (C9).

use crate::models::{UpdateOutcome, UpdateStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Counters {
    containers_processed: u64,
    containers_skipped: u64,
    containers_updated: u64,
    containers_failed: u64,
    containers_deferred: Vec<String>,
    warnings: Vec<String>,
    errors: Vec<(String, String)>,
    updates: Vec<UpdateOutcome>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

/// Accumulates a single cycle's results. Append-only during the cycle
/// (§5's "shared mutable state (b)"), guarded by a plain `Mutex` since the
/// orchestrator never touches it from more than one task at a time.
pub struct ReportCollector {
    inner: Mutex<Counters>,
}

impl ReportCollector {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Counters::default()) }
    }

    pub fn mark_start(&self) {
        self.inner.lock().unwrap().started_at = Some(Utc::now());
    }

    pub fn mark_end(&self) {
        self.inner.lock().unwrap().ended_at = Some(Utc::now());
    }

    pub fn inc_processed(&self) {
        self.inner.lock().unwrap().containers_processed += 1;
    }

    pub fn inc_skipped(&self) {
        self.inner.lock().unwrap().containers_skipped += 1;
    }

    pub fn mark_deferred(&self, container: &str) {
        self.inner.lock().unwrap().containers_deferred.push(container.to_string());
    }

    pub fn add_warning(&self, message: &str) {
        self.inner.lock().unwrap().warnings.push(message.to_string());
    }

    pub fn add_error(&self, container: &str, message: &str) {
        self.inner.lock().unwrap().errors.push((container.to_string(), message.to_string()));
    }

    pub fn add_update(&self, outcome: UpdateOutcome) {
        let mut inner = self.inner.lock().unwrap();
        match outcome.status {
            UpdateStatus::Succeeded => inner.containers_updated += 1,
            UpdateStatus::Failed | UpdateStatus::RolledBack => inner.containers_failed += 1,
            UpdateStatus::Skipped | UpdateStatus::Deferred => {}
        }
        inner.updates.push(outcome);
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = Counters::default();
    }

    /// Produces the neutral record external notifiers consume.
    pub fn serialize(&self) -> CycleSummary {
        let inner = self.inner.lock().unwrap();
        CycleSummary {
            started_at: inner.started_at,
            ended_at: inner.ended_at,
            containers_processed: inner.containers_processed,
            containers_skipped: inner.containers_skipped,
            containers_updated: inner.containers_updated,
            containers_failed: inner.containers_failed,
            containers_deferred: inner.containers_deferred.clone(),
            warnings: inner.warnings.clone(),
            errors: inner.errors.iter().map(|(c, m)| ErrorEntry { container: c.clone(), message: m.clone() }).collect(),
            updates: inner.updates.clone(),
        }
    }
}

impl Default for ReportCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub container: String,
    pub message: String,
}

/// Serializable snapshot of a cycle, consumed by external notifiers. The
/// round-trip law `serialize -> deserialize -> serialize` is idempotent
/// (tested below).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSummary {
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub containers_processed: u64,
    pub containers_skipped: u64,
    pub containers_updated: u64,
    pub containers_failed: u64,
    pub containers_deferred: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<ErrorEntry>,
    pub updates: Vec<UpdateOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::ChangeCategory;

    #[test]
    fn counters_track_update_status() {
        let report = ReportCollector::new();
        report.add_update(UpdateOutcome {
            container: "web".to_string(),
            from: "1.0.0".to_string(),
            to: "1.1.0".to_string(),
            category: ChangeCategory::Minor,
            started_at: Utc::now(),
            duration: std::time::Duration::from_secs(1),
            status: UpdateStatus::Succeeded,
            reject_reason: None,
        });
        let summary = report.serialize();
        assert_eq!(summary.containers_updated, 1);
        assert_eq!(summary.containers_failed, 0);
    }

    #[test]
    fn serialize_deserialize_round_trip_is_idempotent() {
        let report = ReportCollector::new();
        report.mark_start();
        report.inc_processed();
        report.add_warning("low disk space");
        report.mark_end();

        let once = report.serialize();
        let json = serde_json::to_string(&once).unwrap();
        let restored: CycleSummary = serde_json::from_str(&json).unwrap();
        let twice = serde_json::to_string(&restored).unwrap();
        assert_eq!(json, twice);
    }
}
