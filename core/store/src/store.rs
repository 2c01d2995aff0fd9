//! Store trait definitions.

use chrono::{DateTime, Utc};

use offsync_common::{EntityId, EntryId, LogEntry, OperationKind, Result, SyncStatus, Task};

/// Durable table of synchronized records.
///
/// Reads here are raw: soft-deleted records are returned too, because the
/// sync engine must still address them. Filtering for user-facing reads
/// happens in `TaskRepository`.
pub trait RecordStore: Send + Sync {
    /// Get a record by identifier.
    fn get(&self, id: &EntityId) -> Result<Option<Task>>;

    /// Insert or replace a record.
    fn put(&self, task: &Task) -> Result<()>;

    /// List records, oldest first.
    fn list(&self, include_deleted: bool) -> Result<Vec<Task>>;

    /// List records with the given sync status, deleted ones included.
    fn list_by_status(&self, status: SyncStatus) -> Result<Vec<Task>>;
}

/// Ordered, durable queue of pending mutations.
pub trait OperationLog: Send + Sync {
    /// Append a new entry with retry count 0 and creation time now.
    ///
    /// # Postconditions
    /// - Other entries for the same entity are untouched
    ///
    /// # Errors
    /// - Storage I/O failure
    fn append(
        &self,
        entity_id: &EntityId,
        kind: OperationKind,
        payload: serde_json::Value,
    ) -> Result<LogEntry>;

    /// All entries with `retry_count < max_retry`, oldest first.
    ///
    /// Entries with equal creation time come back in admission order.
    fn drain(&self, max_retry: u32) -> Result<Vec<LogEntry>>;

    /// Remove an entry. Removing an absent entry is a no-op.
    fn remove(&self, entry_id: &EntryId) -> Result<()>;

    /// Get an entry by identifier.
    fn get_entry(&self, entry_id: &EntryId) -> Result<Option<LogEntry>>;

    /// Every entry for one entity regardless of retry count, oldest first.
    fn entries_for(&self, entity_id: &EntityId) -> Result<Vec<LogEntry>>;

    /// Persist a failed attempt on an entry that stays in the log.
    ///
    /// Only the failure tracker calls this. Absent entries are ignored.
    fn record_failure(&self, entry_id: &EntryId, retry_count: u32, message: &str) -> Result<()>;

    /// Number of entries still eligible for dispatch.
    fn pending_count(&self, max_retry: u32) -> Result<usize>;

    /// Total number of entries in the log.
    fn total_count(&self) -> Result<usize>;

    /// Completion time of the most recent successful sync cycle.
    fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>>;

    /// Record completion of a successful sync cycle.
    fn set_last_sync_at(&self, at: DateTime<Utc>) -> Result<()>;
}

/// A record store and operation log that share one durability domain.
pub trait LocalStore: RecordStore + OperationLog {
    /// Write `task` and append its log entry as a single unit.
    ///
    /// The entry's creation time is `task.updated_at` and its payload is
    /// the serialized task.
    ///
    /// # Postconditions
    /// - Either both writes are durable or neither is
    fn commit_mutation(&self, task: &Task, kind: OperationKind) -> Result<LogEntry>;
}
