//! Local persistence for offsync.
//!
//! This module provides the record store and the durable operation log
//! behind a trait-based interface, with two backends:
//! - `MemoryStore`: in-process, for tests and embedding
//! - `SqliteStore`: SQLite file via `rusqlite`
//!
//! `TaskRepository` is the CRUD layer on top: every mutation writes the
//! record and appends its log entry as one unit.

pub mod memory;
pub mod repository;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use repository::{TaskPatch, TaskRepository};
pub use sqlite::SqliteStore;
pub use store::{LocalStore, OperationLog, RecordStore};
