//! Sync cycle results and status reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use offsync_common::{EntityId, EntryId, LogEntry, OperationKind};

/// One failed entry within a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub entry_id: EntryId,
    pub entity_id: EntityId,
    pub kind: OperationKind,
    pub message: String,
}

impl SyncFailure {
    /// Failure record for `entry`.
    pub fn new(entry: &LogEntry, message: impl Into<String>) -> Self {
        Self {
            entry_id: entry.id.clone(),
            entity_id: entry.entity_id.clone(),
            kind: entry.kind,
            message: message.into(),
        }
    }
}

/// Result of one sync cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncResult {
    /// True iff no entry failed and the cycle was not aborted.
    pub success: bool,
    /// Entries reconciled (successes and resolved conflicts).
    pub synced: usize,
    /// Entries handed to the failure tracker.
    pub failed: usize,
    /// Subset of `synced` that went through conflict resolution.
    pub conflicts: usize,
    /// Subset of `failed` whose retry budget ran out this cycle.
    pub exhausted: usize,
    /// Entries the authority did not answer; left untouched in the log.
    pub unanswered: usize,
    pub errors: Vec<SyncFailure>,
    /// Why the cycle stopped before dispatching, if it did.
    pub aborted: Option<String>,
    pub duration: Duration,
}

impl SyncResult {
    /// A cycle that stopped before touching the log.
    pub fn aborted(reason: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            aborted: Some(reason.into()),
            duration,
            ..Self::default()
        }
    }

    /// Count one failed entry.
    pub fn record_failure(&mut self, entry: &LogEntry, message: impl Into<String>) {
        self.failed += 1;
        self.errors.push(SyncFailure::new(entry, message));
    }

    /// Seal the result once every batch has been processed.
    pub fn finish(&mut self, duration: Duration) {
        self.success = self.aborted.is_none() && self.failed == 0;
        self.duration = duration;
    }
}

/// Read-only sync diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatusReport {
    /// Entries still eligible for dispatch.
    pub pending: usize,
    /// Completion time of the last successful cycle.
    pub last_sync_at: Option<DateTime<Utc>>,
    pub reachable: bool,
    /// All entries in the log, eligible or not.
    pub outstanding: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_common::Task;

    #[test]
    fn test_empty_result_finishes_successful() {
        let mut result = SyncResult::default();
        result.finish(Duration::from_millis(3));
        assert!(result.success);
        assert_eq!(result.synced, 0);
        assert_eq!(result.failed, 0);
    }

    #[test]
    fn test_any_failure_fails_cycle() {
        let task = Task::new("T1", None).unwrap();
        let entry = LogEntry::new(
            task.id.clone(),
            OperationKind::Create,
            serde_json::Value::Null,
            task.updated_at,
        );

        let mut result = SyncResult::default();
        result.synced = 4;
        result.record_failure(&entry, "boom");
        result.finish(Duration::ZERO);

        assert!(!result.success);
        assert_eq!(result.errors[0].entry_id, entry.id);
        assert_eq!(result.errors[0].kind, OperationKind::Create);
    }

    #[test]
    fn test_aborted_is_failure() {
        let result = SyncResult::aborted("offline", Duration::ZERO);
        assert!(!result.success);
        assert_eq!(result.aborted.as_deref(), Some("offline"));
        assert!(result.errors.is_empty());
    }
}
