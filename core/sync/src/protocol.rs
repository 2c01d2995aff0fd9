//! Batch exchange wire format.
//!
//! JSON over HTTP. Outcomes are correlated with requests by log entry
//! identifier only: one batch may carry several entries for the same
//! entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use offsync_common::{EntityId, EntryId, LogEntry, OperationKind, RemoteId, SyncStatus, Task};

/// Client → authority: one batch of log entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub client_timestamp: DateTime<Utc>,
    pub items: Vec<BatchItem>,
}

impl BatchRequest {
    /// Build a request from drained entries, keeping their order.
    pub fn from_entries(entries: &[LogEntry], client_timestamp: DateTime<Utc>) -> Self {
        Self {
            client_timestamp,
            items: entries.iter().map(BatchItem::from).collect(),
        }
    }
}

/// One mutation inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub entry_id: EntryId,
    pub entity_id: EntityId,
    pub operation: OperationKind,
    pub payload: serde_json::Value,
}

impl From<&LogEntry> for BatchItem {
    fn from(entry: &LogEntry) -> Self {
        Self {
            entry_id: entry.id.clone(),
            entity_id: entry.entity_id.clone(),
            operation: entry.kind,
            payload: entry.payload.clone(),
        }
    }
}

/// Authority → client: one outcome per answered entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub results: Vec<ItemOutcome>,
}

/// Per-item status reported by the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Conflict,
    Error,
}

/// Raw outcome record as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    /// Correlation key: the entry identifier the client sent.
    pub entry_id: EntryId,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<RemoteId>,
    /// Authority's version of the record (conflict, optionally success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemOutcome {
    /// Success outcome.
    pub fn success(entry_id: EntryId, remote_id: Option<RemoteId>) -> Self {
        Self {
            entry_id,
            status: OutcomeStatus::Success,
            remote_id,
            data: None,
            error: None,
        }
    }

    /// Conflict outcome carrying the authority's version.
    pub fn conflict(entry_id: EntryId, data: serde_json::Value) -> Self {
        Self {
            entry_id,
            status: OutcomeStatus::Conflict,
            remote_id: None,
            data: Some(data),
            error: None,
        }
    }

    /// Error outcome.
    pub fn error(entry_id: EntryId, message: impl Into<String>) -> Self {
        Self {
            entry_id,
            status: OutcomeStatus::Error,
            remote_id: None,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Interpret the wire record.
    ///
    /// A conflict whose `data` is missing or is not a task becomes an
    /// item error, so one bad record never fails the whole batch.
    pub fn into_outcome(self) -> (EntryId, Outcome) {
        let outcome = match self.status {
            OutcomeStatus::Success => Outcome::Success {
                remote_id: self.remote_id,
            },
            OutcomeStatus::Conflict => match self.data {
                Some(data) => match serde_json::from_value::<RemoteTask>(data) {
                    Ok(mut remote) => {
                        if remote.remote_id.is_none() {
                            remote.remote_id = self.remote_id;
                        }
                        Outcome::Conflict { remote }
                    }
                    Err(e) => Outcome::Error {
                        message: format!("Malformed conflict data: {}", e),
                    },
                },
                None => Outcome::Error {
                    message: "Conflict reported without server data".to_string(),
                },
            },
            OutcomeStatus::Error => Outcome::Error {
                message: self
                    .error
                    .unwrap_or_else(|| "Unspecified server error".to_string()),
            },
        };
        (self.entry_id, outcome)
    }
}

/// Typed per-entry result of one exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success { remote_id: Option<RemoteId> },
    Conflict { remote: RemoteTask },
    Error { message: String },
}

/// The authority's representation of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTask {
    #[serde(default, alias = "id")]
    pub remote_id: Option<RemoteId>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
}

impl RemoteTask {
    /// The remote version as a local record for `entity_id`.
    ///
    /// Local-only bookkeeping (creation time, last sync) is carried over
    /// from `local` when present.
    pub fn into_task(self, entity_id: &EntityId, local: Option<&Task>) -> Task {
        let created_at = local
            .map(|t| t.created_at)
            .or(self.created_at)
            .unwrap_or(self.updated_at);
        Task {
            id: entity_id.clone(),
            remote_id: self.remote_id.or_else(|| local.and_then(|t| t.remote_id.clone())),
            title: self.title,
            description: self.description,
            completed: self.completed,
            created_at,
            updated_at: self.updated_at,
            last_synced_at: local.and_then(|t| t.last_synced_at),
            is_deleted: self.is_deleted,
            sync_status: SyncStatus::Pending,
        }
    }
}
