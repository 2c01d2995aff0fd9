//! offsync sync engine
//!
//! This module reconciles locally queued mutations with a remote
//! authority:
//! - Batched dispatch of the operation log in admission order
//! - Outcome correlation by log entry identifier
//! - Last-write-wins conflict resolution
//! - Per-entry retry bookkeeping with a bounded budget
//! - Connectivity probing and serialized sync triggers

pub mod config;
pub mod conflict;
pub mod engine;
pub mod probe;
pub mod protocol;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod transport;

// Re-export main types
pub use config::SyncConfig;
pub use conflict::{ConflictResolver, Resolution, Winner};
pub use engine::SyncEngine;
pub use probe::ConnectivityProbe;
pub use protocol::{BatchItem, BatchRequest, BatchResponse, ItemOutcome, Outcome, OutcomeStatus, RemoteTask};
pub use retry::{FailureDisposition, FailureTracker};
pub use scheduler::{SyncMode, SyncRequest, SyncScheduler, SyncSchedulerHandle, SyncTarget};
pub use state::{SyncFailure, SyncResult, SyncStatusReport};
pub use transport::{HttpRemote, RemoteAuthority};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        // Verify all main types are accessible
        let _config = SyncConfig::default();
        let _tracker = FailureTracker::new(3);
        let _resolver = ConflictResolver::default();
        let _result = SyncResult::default();
    }
}
