//! SQLite-backed record store and operation log.
//!
//! Persists records and pending mutations in one database file so a
//! mutation and its log entry commit in the same transaction.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use offsync_common::{
    EntityId, EntryId, Error, LogEntry, OperationKind, RemoteId, Result, SyncStatus, Task,
};

use crate::store::{LocalStore, OperationLog, RecordStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    remote_id TEXT,
    title TEXT NOT NULL,
    description TEXT,
    completed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_synced_at TEXT,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    sync_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (sync_status IN ('pending', 'synced', 'error'))
);

CREATE TABLE IF NOT EXISTS sync_queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    entity_id TEXT NOT NULL,
    operation TEXT NOT NULL CHECK (operation IN ('create', 'update', 'delete')),
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);

CREATE TABLE IF NOT EXISTS sync_metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_sync_status ON tasks(sync_status);
CREATE INDEX IF NOT EXISTS idx_sync_queue_order ON sync_queue(created_at, seq);
CREATE INDEX IF NOT EXISTS idx_sync_queue_entity ON sync_queue(entity_id);
"#;

const TASK_COLUMNS: &str = "id, remote_id, title, description, completed, created_at, \
     updated_at, last_synced_at, is_deleted, sync_status";

const ENTRY_COLUMNS: &str =
    "id, entity_id, operation, payload, created_at, retry_count, last_error";

const LAST_SYNC_KEY: &str = "last_sync_at";

fn storage_err(err: rusqlite::Error) -> Error {
    Error::Storage(err.to_string())
}

/// Fixed-width RFC 3339 so text order matches time order.
fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("Invalid timestamp '{}': {}", value, e)))
}

/// Raw `tasks` row before validation.
struct TaskRow {
    id: String,
    remote_id: Option<String>,
    title: String,
    description: Option<String>,
    completed: bool,
    created_at: String,
    updated_at: String,
    last_synced_at: Option<String>,
    is_deleted: bool,
    sync_status: String,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            remote_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            completed: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            last_synced_at: row.get(7)?,
            is_deleted: row.get(8)?,
            sync_status: row.get(9)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        Ok(Task {
            id: EntityId::new(self.id)?,
            remote_id: self.remote_id.map(RemoteId::new).transpose()?,
            title: self.title,
            description: self.description,
            completed: self.completed,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            last_synced_at: self.last_synced_at.as_deref().map(parse_ts).transpose()?,
            is_deleted: self.is_deleted,
            sync_status: self.sync_status.parse()?,
        })
    }
}

/// Raw `sync_queue` row before validation.
struct EntryRow {
    id: String,
    entity_id: String,
    operation: String,
    payload: String,
    created_at: String,
    retry_count: u32,
    last_error: Option<String>,
}

impl EntryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entity_id: row.get(1)?,
            operation: row.get(2)?,
            payload: row.get(3)?,
            created_at: row.get(4)?,
            retry_count: row.get(5)?,
            last_error: row.get(6)?,
        })
    }

    fn into_entry(self) -> Result<LogEntry> {
        Ok(LogEntry {
            id: EntryId::new(self.id)?,
            entity_id: EntityId::new(self.entity_id)?,
            kind: self.operation.parse()?,
            payload: serde_json::from_str(&self.payload)?,
            created_at: parse_ts(&self.created_at)?,
            retry_count: self.retry_count,
            last_error: self.last_error,
        })
    }
}

fn upsert_task(conn: &Connection, task: &Task) -> Result<()> {
    conn.execute(
        r#"
        INSERT OR REPLACE INTO tasks
        (id, remote_id, title, description, completed, created_at,
         updated_at, last_synced_at, is_deleted, sync_status)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            task.id.as_str(),
            task.remote_id.as_ref().map(|r| r.as_str()),
            task.title,
            task.description,
            task.completed,
            ts(&task.created_at),
            ts(&task.updated_at),
            task.last_synced_at.as_ref().map(ts),
            task.is_deleted,
            task.sync_status.as_str(),
        ],
    )
    .map_err(storage_err)?;
    Ok(())
}

fn insert_entry(conn: &Connection, entry: &LogEntry) -> Result<()> {
    let payload = serde_json::to_string(&entry.payload)?;
    conn.execute(
        r#"
        INSERT INTO sync_queue
        (id, entity_id, operation, payload, created_at, retry_count, last_error)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            entry.id.as_str(),
            entry.entity_id.as_str(),
            entry.kind.as_str(),
            payload,
            ts(&entry.created_at),
            entry.retry_count,
            entry.last_error,
        ],
    )
    .map_err(storage_err)?;
    Ok(())
}

/// SQLite store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open a store database.
    ///
    /// # Errors
    /// - Database creation or schema initialization failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).map_err(storage_err)?;
        let store = Self::from_connection(conn)?;
        info!("Store opened at {}", db_path.as_ref().display());
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let conn = Self::init(conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: Connection) -> Result<Connection> {
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        Ok(conn)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("SQLite connection lock poisoned".to_string()))
    }

    fn query_tasks(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Task>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(storage_err)?;
        let rows = stmt
            .query_map(args, TaskRow::from_row)
            .map_err(storage_err)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.map_err(storage_err)?.into_task()?);
        }
        Ok(tasks)
    }
}

impl RecordStore for SqliteStore {
    fn get(&self, id: &EntityId) -> Result<Option<Task>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                [id.as_str()],
                TaskRow::from_row,
            )
            .optional()
            .map_err(storage_err)?;
        row.map(TaskRow::into_task).transpose()
    }

    fn put(&self, task: &Task) -> Result<()> {
        debug!("Writing task {} ({})", task.id, task.sync_status);
        upsert_task(&*self.conn()?, task)
    }

    fn list(&self, include_deleted: bool) -> Result<Vec<Task>> {
        let sql = if include_deleted {
            format!("SELECT {} FROM tasks ORDER BY created_at, id", TASK_COLUMNS)
        } else {
            format!(
                "SELECT {} FROM tasks WHERE is_deleted = 0 ORDER BY created_at, id",
                TASK_COLUMNS
            )
        };
        self.query_tasks(&sql, &[])
    }

    fn list_by_status(&self, status: SyncStatus) -> Result<Vec<Task>> {
        self.query_tasks(
            &format!(
                "SELECT {} FROM tasks WHERE sync_status = ?1 ORDER BY created_at, id",
                TASK_COLUMNS
            ),
            &[&status.as_str()],
        )
    }
}

impl OperationLog for SqliteStore {
    fn append(
        &self,
        entity_id: &EntityId,
        kind: OperationKind,
        payload: serde_json::Value,
    ) -> Result<LogEntry> {
        let entry = LogEntry::new(entity_id.clone(), kind, payload, Utc::now());
        insert_entry(&*self.conn()?, &entry)?;
        debug!("Appended {} entry {} for {}", kind, entry.id, entity_id);
        Ok(entry)
    }

    fn drain(&self, max_retry: u32) -> Result<Vec<LogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM sync_queue WHERE retry_count < ?1 ORDER BY created_at, seq",
                ENTRY_COLUMNS
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([max_retry], EntryRow::from_row)
            .map_err(storage_err)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(storage_err)?.into_entry()?);
        }
        Ok(entries)
    }

    fn remove(&self, entry_id: &EntryId) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM sync_queue WHERE id = ?1", [entry_id.as_str()])
            .map_err(storage_err)?;
        Ok(())
    }

    fn get_entry(&self, entry_id: &EntryId) -> Result<Option<LogEntry>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM sync_queue WHERE id = ?1", ENTRY_COLUMNS),
                [entry_id.as_str()],
                EntryRow::from_row,
            )
            .optional()
            .map_err(storage_err)?;
        row.map(EntryRow::into_entry).transpose()
    }

    fn entries_for(&self, entity_id: &EntityId) -> Result<Vec<LogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM sync_queue WHERE entity_id = ?1 ORDER BY created_at, seq",
                ENTRY_COLUMNS
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([entity_id.as_str()], EntryRow::from_row)
            .map_err(storage_err)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(storage_err)?.into_entry()?);
        }
        Ok(entries)
    }

    fn record_failure(&self, entry_id: &EntryId, retry_count: u32, message: &str) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE sync_queue SET retry_count = ?1, last_error = ?2 WHERE id = ?3",
                params![retry_count, message, entry_id.as_str()],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    fn pending_count(&self, max_retry: u32) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row(
                "SELECT COUNT(*) FROM sync_queue WHERE retry_count < ?1",
                [max_retry],
                |row| row.get(0),
            )
            .map_err(storage_err)?;
        Ok(count as usize)
    }

    fn total_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))
            .map_err(storage_err)?;
        Ok(count as usize)
    }

    fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        let value: Option<String> = self
            .conn()?
            .query_row(
                "SELECT value FROM sync_metadata WHERE key = ?1",
                [LAST_SYNC_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        value.as_deref().map(parse_ts).transpose()
    }

    fn set_last_sync_at(&self, at: DateTime<Utc>) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO sync_metadata (key, value) VALUES (?1, ?2)",
                params![LAST_SYNC_KEY, ts(&at)],
            )
            .map_err(storage_err)?;
        Ok(())
    }
}

impl LocalStore for SqliteStore {
    fn commit_mutation(&self, task: &Task, kind: OperationKind) -> Result<LogEntry> {
        let payload = serde_json::to_value(task)?;
        let entry = LogEntry::new(task.id.clone(), kind, payload, task.updated_at);

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(storage_err)?;
        upsert_task(&tx, task)?;
        insert_entry(&tx, &entry)?;
        tx.commit().map_err(storage_err)?;

        debug!("Committed {} of task {} as entry {}", kind, task.id, entry.id);
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn task(title: &str) -> Task {
        Task::new(title, Some("notes".to_string())).unwrap()
    }

    #[test]
    fn test_task_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        let mut t = task("write report");
        t.mark_synced(Some(RemoteId::new("R1").unwrap()), Utc::now());

        store.put(&t).unwrap();
        let loaded = store.get(&t.id).unwrap().unwrap();

        assert_eq!(loaded.id, t.id);
        assert_eq!(loaded.remote_id, t.remote_id);
        assert_eq!(loaded.sync_status, SyncStatus::Synced);
        assert_eq!(loaded.description.as_deref(), Some("notes"));
        assert_eq!(ts(&loaded.updated_at), ts(&t.updated_at));
    }

    #[test]
    fn test_missing_task_is_none() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get(&EntityId::generate()).unwrap().is_none());
    }

    #[test]
    fn test_commit_mutation_writes_both() {
        let store = SqliteStore::in_memory().unwrap();
        let t = task("a");

        let entry = store.commit_mutation(&t, OperationKind::Create).unwrap();

        assert!(store.get(&t.id).unwrap().is_some());
        let stored = store.get_entry(&entry.id).unwrap().unwrap();
        assert_eq!(stored.kind, OperationKind::Create);
        assert_eq!(stored.retry_count, 0);
        assert_eq!(stored.payload["title"], "a");
    }

    #[test]
    fn test_failed_append_rolls_back_record() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .conn()
            .unwrap()
            .execute_batch("DROP TABLE sync_queue")
            .unwrap();

        let t = task("a");
        assert!(store.commit_mutation(&t, OperationKind::Create).is_err());
        assert!(store.get(&t.id).unwrap().is_none());
    }

    #[test]
    fn test_drain_keeps_admission_order_on_equal_timestamps() {
        let store = SqliteStore::in_memory().unwrap();
        let t = task("a");
        let first = store.commit_mutation(&t, OperationKind::Create).unwrap();
        let second = store.commit_mutation(&t, OperationKind::Update).unwrap();
        assert_eq!(first.created_at, second.created_at);

        let drained = store.drain(3).unwrap();
        assert_eq!(drained[0].id, first.id);
        assert_eq!(drained[1].id, second.id);
    }

    #[test]
    fn test_record_failure_and_drain_threshold() {
        let store = SqliteStore::in_memory().unwrap();
        let entry = store
            .append(&EntityId::generate(), OperationKind::Update, serde_json::json!({"k": 1}))
            .unwrap();

        store.record_failure(&entry.id, 2, "timeout").unwrap();
        let stored = store.get_entry(&entry.id).unwrap().unwrap();
        assert_eq!(stored.retry_count, 2);
        assert_eq!(stored.last_error.as_deref(), Some("timeout"));

        assert_eq!(store.pending_count(3).unwrap(), 1);
        assert_eq!(store.pending_count(2).unwrap(), 0);
        assert!(store.drain(2).unwrap().is_empty());
        assert_eq!(store.total_count().unwrap(), 1);
    }

    #[test]
    fn test_entries_for_one_entity() {
        let store = SqliteStore::in_memory().unwrap();
        let mut t = task("a");
        let other = task("b");
        let first = store.commit_mutation(&t, OperationKind::Create).unwrap();
        store.commit_mutation(&other, OperationKind::Create).unwrap();
        t.mark_modified(Utc::now());
        let second = store.commit_mutation(&t, OperationKind::Update).unwrap();
        store.record_failure(&second.id, 5, "gave up").unwrap();

        let entries = store.entries_for(&t.id).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, first.id);
        assert_eq!(entries[1].id, second.id);
        assert_eq!(entries[1].retry_count, 5);
    }

    #[test]
    fn test_remove_absent_entry_is_noop() {
        let store = SqliteStore::in_memory().unwrap();
        store.remove(&EntryId::generate()).unwrap();
    }

    #[test]
    fn test_list_by_status() {
        let store = SqliteStore::in_memory().unwrap();
        let pending = task("p");
        let mut failed = task("f");
        failed.mark_failed();
        store.put(&pending).unwrap();
        store.put(&failed).unwrap();

        let errors = store.list_by_status(SyncStatus::Error).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].id, failed.id);
    }

    #[test]
    fn test_persistence() {
        let temp = TempDir::new().unwrap();
        let db_path = temp.path().join("offsync.db");
        let t = task("durable");

        {
            let store = SqliteStore::open(&db_path).unwrap();
            store.commit_mutation(&t, OperationKind::Create).unwrap();
            store.set_last_sync_at(Utc::now()).unwrap();
        }

        {
            let store = SqliteStore::open(&db_path).unwrap();
            assert!(store.get(&t.id).unwrap().is_some());
            assert_eq!(store.total_count().unwrap(), 1);
            assert!(store.last_sync_at().unwrap().is_some());
        }
    }
}
