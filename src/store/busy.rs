//! Busy-state store — the persisted "agent is working" flag.
//!
//! Advisory only: human-facing state for status queries. Double-dispatch is
//! prevented by the supervisor's slot and run lock, never by this file.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

use super::{FileLock, load_json, save_json};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusyState {
    pub active: bool,
    /// Task the current run is expected to pick up; `None` whenever
    /// `active` is false.
    pub task_id: Option<i64>,
    pub since: DateTime<Utc>,
}

impl Default for BusyState {
    fn default() -> Self {
        Self {
            active: false,
            task_id: None,
            since: Utc::now(),
        }
    }
}

/// Lock-protected, atomically written busy flag.
#[derive(Debug, Clone)]
pub struct BusyStore {
    path: PathBuf,
}

impl BusyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn set_busy(&self, task_id: Option<i64>) -> Result<(), StoreError> {
        self.write(BusyState {
            active: true,
            task_id,
            since: Utc::now(),
        })
    }

    pub fn clear_busy(&self) -> Result<(), StoreError> {
        self.write(BusyState {
            active: false,
            task_id: None,
            since: Utc::now(),
        })
    }

    pub fn is_busy(&self) -> Result<bool, StoreError> {
        Ok(self.read()?.active)
    }

    pub fn read(&self) -> Result<BusyState, StoreError> {
        let _lock = FileLock::acquire(&self.path)?;
        Ok(load_json(&self.path))
    }

    fn write(&self, state: BusyState) -> Result<(), StoreError> {
        let _lock = FileLock::acquire(&self.path)?;
        save_json(&self.path, &state)
    }
}
