//! Conflict resolution.

use serde::{Deserialize, Serialize};

use offsync_common::Task;

/// Which side of a conflict won.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Winner {
    Local,
    Remote,
}

/// Result of resolving one conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub winner: Winner,
    /// Winning version, to be persisted as the new local state.
    pub task: Task,
}

/// Last-write-wins resolver.
///
/// The version with the strictly later `updated_at` wins in full; there
/// is no per-field merge. Equal timestamps go to the remote version.
/// Deterministic and side-effect free.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    /// Create a resolver.
    pub fn new() -> Self {
        Self
    }

    /// Decide the winner for one conflict.
    pub fn winner(&self, local: &Task, remote: &Task) -> Winner {
        if local.updated_at > remote.updated_at {
            Winner::Local
        } else {
            Winner::Remote
        }
    }

    /// Resolve a conflict between the local and remote version of a task.
    ///
    /// The remote identifier is identity, not payload: whichever side
    /// knows it, the resolved task keeps it.
    pub fn resolve(&self, local: &Task, remote: &Task) -> Resolution {
        let winner = self.winner(local, remote);
        let mut task = match winner {
            Winner::Local => local.clone(),
            Winner::Remote => remote.clone(),
        };
        if task.remote_id.is_none() {
            task.remote_id = remote.remote_id.clone().or_else(|| local.remote_id.clone());
        }
        Resolution { winner, task }
    }
}
