//! In-memory store for testing.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use offsync_common::{
    EntityId, EntryId, Error, LogEntry, OperationKind, Result, SyncStatus, Task,
};

use crate::store::{LocalStore, OperationLog, RecordStore};

#[derive(Debug, Default)]
struct Inner {
    tasks: HashMap<EntityId, Task>,
    /// Admission order.
    log: Vec<LogEntry>,
    last_sync_at: Option<DateTime<Utc>>,
}

/// In-memory store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))
    }
}

fn sorted(mut tasks: Vec<Task>) -> Vec<Task> {
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    tasks
}

impl RecordStore for MemoryStore {
    fn get(&self, id: &EntityId) -> Result<Option<Task>> {
        Ok(self.read()?.tasks.get(id).cloned())
    }

    fn put(&self, task: &Task) -> Result<()> {
        self.write()?.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn list(&self, include_deleted: bool) -> Result<Vec<Task>> {
        let inner = self.read()?;
        Ok(sorted(
            inner
                .tasks
                .values()
                .filter(|t| include_deleted || !t.is_deleted)
                .cloned()
                .collect(),
        ))
    }

    fn list_by_status(&self, status: SyncStatus) -> Result<Vec<Task>> {
        let inner = self.read()?;
        Ok(sorted(
            inner
                .tasks
                .values()
                .filter(|t| t.sync_status == status)
                .cloned()
                .collect(),
        ))
    }
}

impl OperationLog for MemoryStore {
    fn append(
        &self,
        entity_id: &EntityId,
        kind: OperationKind,
        payload: serde_json::Value,
    ) -> Result<LogEntry> {
        let entry = LogEntry::new(entity_id.clone(), kind, payload, Utc::now());
        self.write()?.log.push(entry.clone());
        Ok(entry)
    }

    fn drain(&self, max_retry: u32) -> Result<Vec<LogEntry>> {
        let mut entries: Vec<LogEntry> = self
            .read()?
            .log
            .iter()
            .filter(|e| e.retry_count < max_retry)
            .cloned()
            .collect();
        // Stable: ties keep admission order.
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    fn remove(&self, entry_id: &EntryId) -> Result<()> {
        self.write()?.log.retain(|e| &e.id != entry_id);
        Ok(())
    }

    fn get_entry(&self, entry_id: &EntryId) -> Result<Option<LogEntry>> {
        Ok(self.read()?.log.iter().find(|e| &e.id == entry_id).cloned())
    }

    fn entries_for(&self, entity_id: &EntityId) -> Result<Vec<LogEntry>> {
        let mut entries: Vec<LogEntry> = self
            .read()?
            .log
            .iter()
            .filter(|e| &e.entity_id == entity_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    fn record_failure(&self, entry_id: &EntryId, retry_count: u32, message: &str) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(entry) = inner.log.iter_mut().find(|e| &e.id == entry_id) {
            entry.retry_count = retry_count;
            entry.last_error = Some(message.to_string());
        }
        Ok(())
    }

    fn pending_count(&self, max_retry: u32) -> Result<usize> {
        Ok(self
            .read()?
            .log
            .iter()
            .filter(|e| e.retry_count < max_retry)
            .count())
    }

    fn total_count(&self) -> Result<usize> {
        Ok(self.read()?.log.len())
    }

    fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.read()?.last_sync_at)
    }

    fn set_last_sync_at(&self, at: DateTime<Utc>) -> Result<()> {
        self.write()?.last_sync_at = Some(at);
        Ok(())
    }
}

impl LocalStore for MemoryStore {
    fn commit_mutation(&self, task: &Task, kind: OperationKind) -> Result<LogEntry> {
        let payload = serde_json::to_value(task)?;
        let entry = LogEntry::new(task.id.clone(), kind, payload, task.updated_at);

        let mut inner = self.write()?;
        inner.tasks.insert(task.id.clone(), task.clone());
        inner.log.push(entry.clone());
        Ok(entry)
    }
}
