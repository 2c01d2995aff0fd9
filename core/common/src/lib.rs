//! Common utilities and types shared across offsync crates.
//!
//! This module provides the synchronized record, the operation log entry
//! and the identifiers that tie them together, plus the shared error type.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{EntityId, EntryId, LogEntry, OperationKind, RemoteId, SyncStatus, Task};
