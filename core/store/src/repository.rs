//! Task CRUD on top of a local store.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use offsync_common::{EntityId, Error, OperationKind, Result, SyncStatus, Task};

use crate::store::LocalStore;

/// Partial update for a task. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub completed: Option<bool>,
}

impl TaskPatch {
    /// Set a new title.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set or clear the description.
    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    /// Set the completion flag.
    pub fn completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.completed.is_none()
    }
}

/// CRUD layer for tasks.
///
/// Every mutation marks the task pending, advances `updated_at` and
/// appends an operation log entry in the same unit as the record write.
pub struct TaskRepository<S: LocalStore + ?Sized> {
    store: Arc<S>,
}

impl<S: LocalStore + ?Sized> TaskRepository<S> {
    /// Create a repository over a shared store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Create a task.
    pub fn create(&self, title: impl Into<String>, description: Option<String>) -> Result<Task> {
        let task = Task::new(title, description)?;
        self.store.commit_mutation(&task, OperationKind::Create)?;
        info!("Created task {}", task.id);
        Ok(task)
    }

    /// Apply a partial update.
    ///
    /// # Errors
    /// - `NotFound` if the task does not exist or is deleted
    /// - `InvalidInput` if the patch is empty or sets an empty title
    pub fn update(&self, id: &EntityId, patch: TaskPatch) -> Result<Task> {
        if patch.is_empty() {
            return Err(Error::InvalidInput("Nothing to update".to_string()));
        }
        let mut task = self.live(id)?;

        if let Some(title) = patch.title {
            if title.trim().is_empty() {
                return Err(Error::InvalidInput(
                    "Task title cannot be empty".to_string(),
                ));
            }
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(completed) = patch.completed {
            task.completed = completed;
        }

        task.mark_modified(Utc::now());
        self.store.commit_mutation(&task, OperationKind::Update)?;
        info!("Updated task {}", task.id);
        Ok(task)
    }

    /// Mark a task as completed.
    pub fn complete(&self, id: &EntityId) -> Result<Task> {
        self.update(id, TaskPatch::default().completed(true))
    }

    /// Soft-delete a task. Earlier log entries for it stay queued.
    pub fn delete(&self, id: &EntityId) -> Result<Task> {
        let mut task = self.live(id)?;
        task.is_deleted = true;
        task.mark_modified(Utc::now());
        self.store.commit_mutation(&task, OperationKind::Delete)?;
        info!("Deleted task {}", task.id);
        Ok(task)
    }

    /// Get a task, hiding soft-deleted ones.
    pub fn get(&self, id: &EntityId) -> Result<Option<Task>> {
        Ok(self.store.get(id)?.filter(|t| !t.is_deleted))
    }

    /// List tasks that are not deleted.
    pub fn list(&self) -> Result<Vec<Task>> {
        self.store.list(false)
    }

    /// Tasks whose sync permanently failed.
    pub fn failed(&self) -> Result<Vec<Task>> {
        self.store.list_by_status(SyncStatus::Error)
    }

    fn live(&self, id: &EntityId) -> Result<Task> {
        self.get(id)?
            .ok_or_else(|| Error::NotFound(format!("Task not found: {}", id)))
    }
}
