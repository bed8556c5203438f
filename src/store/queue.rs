//! Durable task queue persisted as a single JSON file.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

use super::{FileLock, load_json, save_json};

/// One inbound request, tracked until resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Monotonically assigned by the queue store, unique within it.
    pub id: i64,
    /// Where results and progress for this task are sent.
    pub chat_id: String,
    pub user: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// True once the worker has resolved the task — success or failure.
    pub processed: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueFile {
    tasks: Vec<Task>,
    /// High-water mark for idempotent ingestion from the chat transport.
    last_update_id: i64,
}

/// Lock-protected, atomically written task queue.
///
/// Ids are unique and insertion order is preserved; tasks are never
/// deleted, only flipped to processed.
#[derive(Debug, Clone)]
pub struct QueueStore {
    path: PathBuf,
}

impl QueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Append a new task, assigning the next id (max + 1, or 1 when empty).
    pub fn append(&self, chat_id: &str, user: &str, text: &str) -> Result<Task, StoreError> {
        let _lock = FileLock::acquire(&self.path)?;
        let mut data: QueueFile = load_json(&self.path);
        let task = Self::push_task(&mut data, chat_id, user, text);
        save_json(&self.path, &data)?;
        Ok(task)
    }

    /// Append an inbound chat update, advancing the high-water mark.
    ///
    /// Updates at or below the stored mark have already been ingested and
    /// yield `None`.
    pub fn append_update(
        &self,
        update_id: i64,
        chat_id: &str,
        user: &str,
        text: &str,
    ) -> Result<Option<Task>, StoreError> {
        let _lock = FileLock::acquire(&self.path)?;
        let mut data: QueueFile = load_json(&self.path);
        if update_id <= data.last_update_id {
            return Ok(None);
        }
        data.last_update_id = update_id;
        let task = Self::push_task(&mut data, chat_id, user, text);
        save_json(&self.path, &data)?;
        Ok(Some(task))
    }

    /// Tasks still awaiting a worker, in insertion order.
    pub fn list_unprocessed(&self) -> Result<Vec<Task>, StoreError> {
        let _lock = FileLock::acquire(&self.path)?;
        let data: QueueFile = load_json(&self.path);
        Ok(data.tasks.into_iter().filter(|t| !t.processed).collect())
    }

    pub fn has_unprocessed(&self) -> Result<bool, StoreError> {
        Ok(!self.list_unprocessed()?.is_empty())
    }

    pub fn first_unprocessed(&self) -> Result<Option<Task>, StoreError> {
        Ok(self.list_unprocessed()?.into_iter().next())
    }

    pub fn pending_ids(&self) -> Result<Vec<i64>, StoreError> {
        Ok(self.list_unprocessed()?.iter().map(|t| t.id).collect())
    }

    /// Flip a task to processed. Unknown ids are a successful no-op
    /// returning `None` — callers must check they obtained a record.
    pub fn mark_processed(&self, id: i64) -> Result<Option<Task>, StoreError> {
        let _lock = FileLock::acquire(&self.path)?;
        let mut data: QueueFile = load_json(&self.path);
        let Some(task) = data.tasks.iter_mut().find(|t| t.id == id) else {
            return Ok(None);
        };
        task.processed = true;
        let resolved = task.clone();
        save_json(&self.path, &data)?;
        Ok(Some(resolved))
    }

    pub fn last_update_id(&self) -> Result<i64, StoreError> {
        let _lock = FileLock::acquire(&self.path)?;
        let data: QueueFile = load_json(&self.path);
        Ok(data.last_update_id)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let _lock = FileLock::acquire(&self.path)?;
        let data: QueueFile = load_json(&self.path);
        Ok(data.tasks.len())
    }

    fn push_task(data: &mut QueueFile, chat_id: &str, user: &str, text: &str) -> Task {
        let next_id = data.tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        let task = Task {
            id: next_id,
            chat_id: chat_id.to_string(),
            user: user.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
            processed: false,
        };
        data.tasks.push(task.clone());
        task
    }
}
