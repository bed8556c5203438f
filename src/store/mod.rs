//! File-backed stores shared across orchestrator processes.
//!
//! Every store is a single JSON document guarded by an exclusive advisory
//! lock on a sibling `.lock` file and written via temp-file-plus-rename, so
//! a concurrent reader never observes a partially serialized document.

pub mod busy;
pub mod history;
pub mod queue;

pub use busy::{BusyState, BusyStore};
pub use history::{HistoryEntry, HistoryIndex};
pub use queue::{QueueStore, Task};

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Exclusive advisory lock on `<target>.lock`, released on drop.
///
/// The lock file is a separate sibling so the data file itself can be
/// atomically renamed over while the lock is held.
pub(crate) struct FileLock {
    file: File,
}

impl FileLock {
    pub(crate) fn acquire(target: &Path) -> Result<Self, StoreError> {
        let lock_path = lock_path_for(target);
        let file = open_lock_file(&lock_path).map_err(|source| StoreError::Lock {
            path: lock_path.clone(),
            source,
        })?;
        file.lock_exclusive().map_err(|source| StoreError::Lock {
            path: lock_path,
            source,
        })?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

fn lock_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    target.with_file_name(format!("{name}.lock"))
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().write(true).create(true).open(path)
}

/// Load a JSON document, degrading to the default on a missing or corrupt
/// file. Corruption is logged, never raised: the stores self-heal to empty
/// rather than take the submission path down.
pub(crate) fn load_json<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "store unreadable; treating as empty");
            return T::default();
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "store corrupt; treating as empty");
            T::default()
        }
    }
}

/// Serialize to a temp sibling and atomically rename over the target.
pub(crate) fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store.json".to_string());
    let tmp = path.with_file_name(format!("{name}.tmp"));

    let payload = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp, payload).map_err(|source| StoreError::Write {
        path: tmp.clone(),
        source,
    })?;
    std::fs::rename(&tmp, path).map_err(|source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Resolve a task: flip its processed flag and record it in the history
/// index. This is the single completion entry point — the history index is
/// only ever touched here, once per resolved task.
pub fn complete_task(
    queue: &QueueStore,
    history: &HistoryIndex,
    id: i64,
    result_summary: &str,
) -> Result<Option<Task>, StoreError> {
    let Some(task) = queue.mark_processed(id)? else {
        return Ok(None);
    };
    history.record(task.id, &task.text, result_summary)?;
    Ok(Some(task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        n: u32,
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        save_json(&path, &Doc { n: 7 }).unwrap();
        let loaded: Doc = load_json(&path);
        assert_eq!(loaded, Doc { n: 7 });
    }

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Doc = load_json(&dir.path().join("absent.json"));
        assert_eq!(loaded, Doc::default());
    }

    #[test]
    fn corrupt_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let loaded: Doc = load_json(&path);
        assert_eq!(loaded, Doc::default());
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        save_json(&path, &Doc { n: 1 }).unwrap();
        assert!(!dir.path().join("doc.json.tmp").exists());
    }

    #[test]
    fn lock_is_reentrant_across_instances_sequentially() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        {
            let _lock = FileLock::acquire(&path).unwrap();
        }
        // Released on drop; a second acquisition must succeed.
        let _lock = FileLock::acquire(&path).unwrap();
    }

    #[test]
    fn complete_task_flips_and_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let queue = QueueStore::new(dir.path().join("tasks.json"));
        let history = HistoryIndex::new(dir.path().join("history.json"));
        let task = queue.append("1", "tester", "build a cafe landing page").unwrap();

        let resolved = complete_task(&queue, &history, task.id, "shipped one page")
            .unwrap()
            .unwrap();
        assert!(resolved.processed);
        assert_eq!(history.search("cafe").unwrap().len(), 1);
    }

    #[test]
    fn complete_task_unknown_id_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let queue = QueueStore::new(dir.path().join("tasks.json"));
        let history = HistoryIndex::new(dir.path().join("history.json"));
        assert!(complete_task(&queue, &history, 42, "n/a").unwrap().is_none());
        assert!(history.recent(5).unwrap().is_empty());
    }
}
