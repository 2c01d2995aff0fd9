//! Per-entry retry and failure bookkeeping.
//!
//! This is the only place a log entry's retry count changes and the only
//! place a record is moved to `SyncStatus::Error`.

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use offsync_common::{LogEntry, Result};
use offsync_store::LocalStore;

/// What happened to an entry after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureDisposition {
    /// Kept in the log for the next cycle.
    Retained { retry_count: u32 },
    /// Budget spent: record marked `error`, entry removed.
    Exhausted { retry_count: u32 },
}

/// Applies the retry budget to failed log entries.
#[derive(Debug, Clone)]
pub struct FailureTracker {
    max_retries: u32,
}

impl FailureTracker {
    /// Create a tracker with the given retry budget.
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Retry budget; also the drain ceiling for the log.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Record one failed attempt for `entry`.
    ///
    /// Increments the retry count. When it reaches the budget the record
    /// is marked `error` and the entry is removed; otherwise the new count
    /// and `message` are stored on the entry.
    ///
    /// # Errors
    /// - Store failure; the entry is then left as it was
    pub fn handle_failure<S>(
        &self,
        store: &S,
        entry: &LogEntry,
        message: &str,
    ) -> Result<FailureDisposition>
    where
        S: LocalStore + ?Sized,
    {
        let retry_count = entry.retry_count.saturating_add(1);

        if retry_count < self.max_retries {
            store.record_failure(&entry.id, retry_count, message)?;
            warn!(
                "Entry {} ({} of {}) failed, attempt {}/{}: {}",
                entry.id, entry.kind, entry.entity_id, retry_count, self.max_retries, message
            );
            return Ok(FailureDisposition::Retained { retry_count });
        }

        match store.get(&entry.entity_id)? {
            Some(mut task) => {
                task.mark_failed();
                store.put(&task)?;
            }
            None => warn!(
                "Entity {} for exhausted entry {} no longer exists",
                entry.entity_id, entry.id
            ),
        }
        store.remove(&entry.id)?;

        error!(
            "Giving up on entry {} ({} of {}) after {} attempts: {}",
            entry.id, entry.kind, entry.entity_id, retry_count, message
        );
        Ok(FailureDisposition::Exhausted { retry_count })
    }
}

impl Default for FailureTracker {
    fn default() -> Self {
        Self::new(3)
    }
}
