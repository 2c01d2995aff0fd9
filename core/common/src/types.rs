//! Common types used throughout offsync.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier from a string.
            ///
            /// # Errors
            /// - Returns error if id is empty
            pub fn new(id: impl Into<String>) -> crate::Result<Self> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(crate::Error::InvalidInput(format!(
                        "{} cannot be empty",
                        stringify!($name)
                    )));
                }
                Ok(Self(id))
            }

            /// Get the inner string value.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Client-assigned, globally unique identifier of a synchronized record.
    EntityId
);

string_id!(
    /// Identifier of one operation log entry.
    ///
    /// Used for log bookkeeping and for correlating batch outcomes; never
    /// sent to the remote authority as the identity of a record.
    EntryId
);

string_id!(
    /// Identifier assigned by the remote authority on first successful sync.
    RemoteId
);

impl EntityId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl EntryId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Synchronization status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local mutation not yet reconciled.
    Pending,
    /// Reconciled with the remote authority.
    Synced,
    /// Retry budget exhausted; needs manual intervention.
    Error,
}

impl SyncStatus {
    /// Persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "error" => Ok(SyncStatus::Error),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown sync status: {}",
                other
            ))),
        }
    }
}

/// Kind of mutation recorded in the operation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    /// Persisted and wire string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown operation kind: {}",
                other
            ))),
        }
    }
}

/// The synchronized business record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Client-assigned identifier, immutable.
    pub id: EntityId,
    /// Assigned by the remote authority on first successful sync.
    pub remote_id: Option<RemoteId>,
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    /// Advances on every local mutation.
    pub updated_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Soft-delete flag. Deleted tasks stay addressable for sync.
    pub is_deleted: bool,
    pub sync_status: SyncStatus,
}

impl Task {
    /// Create a new, not yet synchronized task.
    ///
    /// # Errors
    /// - Returns error if the title is empty
    pub fn new(title: impl Into<String>, description: Option<String>) -> crate::Result<Self> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "Task title cannot be empty".to_string(),
            ));
        }
        let now = Utc::now();
        Ok(Self {
            id: EntityId::generate(),
            remote_id: None,
            title,
            description,
            completed: false,
            created_at: now,
            updated_at: now,
            last_synced_at: None,
            is_deleted: false,
            sync_status: SyncStatus::Pending,
        })
    }

    /// Record a local mutation at `now`.
    ///
    /// `updated_at` always moves strictly forward, even if the wall clock
    /// did not.
    pub fn mark_modified(&mut self, now: DateTime<Utc>) {
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::milliseconds(1)
        };
        self.sync_status = SyncStatus::Pending;
    }

    /// Record that the authority accepted one of this task's mutations.
    ///
    /// Leaves `sync_status` alone: later mutations may still be queued.
    /// A remote identifier, once set, is never replaced.
    pub fn acknowledge(&mut self, remote_id: Option<RemoteId>, at: DateTime<Utc>) {
        if self.remote_id.is_none() {
            self.remote_id = remote_id;
        }
        self.last_synced_at = Some(at);
    }

    /// Mark as reconciled with nothing left queued.
    pub fn mark_synced(&mut self, remote_id: Option<RemoteId>, at: DateTime<Utc>) {
        self.acknowledge(remote_id, at);
        self.sync_status = SyncStatus::Synced;
    }

    /// Mark as permanently failed.
    pub fn mark_failed(&mut self) {
        self.sync_status = SyncStatus::Error;
    }
}

/// One pending mutation awaiting reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: EntryId,
    /// Referenced record. The record may be gone while the entry remains.
    pub entity_id: EntityId,
    pub kind: OperationKind,
    /// Snapshot of the record at append time.
    pub payload: serde_json::Value,
    /// Admission time; drain order.
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl LogEntry {
    /// Create a fresh entry with retry count 0.
    pub fn new(
        entity_id: EntityId,
        kind: OperationKind,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntryId::generate(),
            entity_id,
            kind,
            payload,
            created_at,
            retry_count: 0,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_empty_fails() {
        assert!(EntityId::new("").is_err());
        assert!(EntryId::new("   ").is_err());
        assert_eq!(RemoteId::new("R1").unwrap().as_str(), "R1");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(EntityId::generate(), EntityId::generate());
        assert_ne!(EntryId::generate(), EntryId::generate());
    }

    #[test]
    fn test_status_string_mapping() {
        for status in [SyncStatus::Pending, SyncStatus::Synced, SyncStatus::Error] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("unknown".parse::<SyncStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&SyncStatus::Synced).unwrap(),
            "\"synced\""
        );
    }

    #[test]
    fn test_operation_kind_serde() {
        let kind: OperationKind = serde_json::from_str("\"delete\"").unwrap();
        assert_eq!(kind, OperationKind::Delete);
        assert_eq!("update".parse::<OperationKind>().unwrap(), OperationKind::Update);
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = Task::new("Buy milk", None).unwrap();
        assert_eq!(task.sync_status, SyncStatus::Pending);
        assert!(task.remote_id.is_none());
        assert!(!task.is_deleted);
        assert!(Task::new("  ", None).is_err());
    }

    #[test]
    fn test_mark_modified_advances_clock() {
        let mut task = Task::new("Buy milk", None).unwrap();
        task.sync_status = SyncStatus::Synced;
        let before = task.updated_at;

        // A clock that went backwards still moves updated_at forward.
        task.mark_modified(before - Duration::seconds(10));
        assert!(task.updated_at > before);
        assert_eq!(task.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn test_remote_id_is_immutable_once_set() {
        let mut task = Task::new("Buy milk", None).unwrap();
        task.mark_synced(Some(RemoteId::new("R1").unwrap()), Utc::now());
        task.mark_synced(Some(RemoteId::new("R2").unwrap()), Utc::now());

        assert_eq!(task.remote_id.unwrap().as_str(), "R1");
        assert_eq!(task.sync_status, SyncStatus::Synced);
        assert!(task.last_synced_at.is_some());
    }

    #[test]
    fn test_acknowledge_keeps_status() {
        let mut task = Task::new("Buy milk", None).unwrap();
        task.acknowledge(Some(RemoteId::new("R1").unwrap()), Utc::now());

        assert_eq!(task.sync_status, SyncStatus::Pending);
        assert_eq!(task.remote_id.unwrap().as_str(), "R1");
        assert!(task.last_synced_at.is_some());
    }

    #[test]
    fn test_log_entry_starts_at_zero_retries() {
        let task = Task::new("Buy milk", None).unwrap();
        let entry = LogEntry::new(
            task.id.clone(),
            OperationKind::Create,
            serde_json::to_value(&task).unwrap(),
            task.updated_at,
        );
        assert_eq!(entry.retry_count, 0);
        assert!(entry.last_error.is_none());
        assert_eq!(entry.entity_id, task.id);
    }
}
