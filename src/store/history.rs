//! Keyword-indexed record of completed tasks.
//!
//! Updated once per resolved task (see [`super::complete_task`]); queried
//! for recent context and keyword search. Never consulted during queueing
//! or supervision.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

use super::{FileLock, load_json, save_json};

const MAX_KEYWORDS: usize = 10;
const MAX_SEARCH_RESULTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub task_id: i64,
    pub instruction: String,
    pub keywords: Vec<String>,
    pub summary: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    entries: Vec<HistoryEntry>,
}

/// Lock-protected history index, newest entries first.
#[derive(Debug, Clone)]
pub struct HistoryIndex {
    path: PathBuf,
}

impl HistoryIndex {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Upsert the record for a task: same id overwrites, new ids are added.
    pub fn record(
        &self,
        task_id: i64,
        instruction: &str,
        summary: &str,
    ) -> Result<HistoryEntry, StoreError> {
        let entry = HistoryEntry {
            task_id,
            instruction: instruction.to_string(),
            keywords: extract_keywords(instruction),
            summary: summary.to_string(),
            recorded_at: Utc::now(),
        };

        let _lock = FileLock::acquire(&self.path)?;
        let mut data: HistoryFile = load_json(&self.path);
        match data.entries.iter_mut().find(|e| e.task_id == task_id) {
            Some(existing) => *existing = entry.clone(),
            None => data.entries.push(entry.clone()),
        }
        data.entries.sort_by(|a, b| b.task_id.cmp(&a.task_id));
        save_json(&self.path, &data)?;
        Ok(entry)
    }

    /// Score entries by how many query words appear in the instruction or
    /// summary; best matches first, capped at five.
    pub fn search(&self, query: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        let query_words: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let _lock = FileLock::acquire(&self.path)?;
        let data: HistoryFile = load_json(&self.path);

        let mut scored: Vec<(usize, HistoryEntry)> = data
            .entries
            .into_iter()
            .filter_map(|entry| {
                let content =
                    format!("{} {}", entry.instruction, entry.summary).to_lowercase();
                let score = query_words.iter().filter(|w| content.contains(*w)).count();
                (score > 0).then_some((score, entry))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(MAX_SEARCH_RESULTS)
            .map(|(_, e)| e)
            .collect())
    }

    /// Most recent entries, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let _lock = FileLock::acquire(&self.path)?;
        let data: HistoryFile = load_json(&self.path);
        Ok(data.entries.into_iter().take(limit).collect())
    }
}

/// Keyword extraction: distinct words of two or more characters, first
/// occurrence wins, capped at ten.
fn extract_keywords(instruction: &str) -> Vec<String> {
    let mut keywords = Vec::new();
    for word in instruction.split_whitespace() {
        if word.chars().count() < 2 {
            continue;
        }
        let word = word.to_lowercase();
        if !keywords.contains(&word) {
            keywords.push(word);
        }
        if keywords.len() == MAX_KEYWORDS {
            break;
        }
    }
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> (tempfile::TempDir, HistoryIndex) {
        let dir = tempfile::tempdir().unwrap();
        let index = HistoryIndex::new(dir.path().join("history.json"));
        (dir, index)
    }

    #[test]
    fn record_and_search() {
        let (_dir, index) = index();
        index
            .record(1, "build a cafe landing page", "done: minimal dark page")
            .unwrap();
        index.record(2, "render a tech logo", "done: one PNG").unwrap();

        let hits = index.search("cafe page").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].task_id, 1);
        assert!(index.search("nonexistent").unwrap().is_empty());
    }

    #[test]
    fn record_upserts_by_task_id() {
        let (_dir, index) = index();
        index.record(1, "first attempt", "failed").unwrap();
        index.record(1, "first attempt", "succeeded on retry").unwrap();
        let recent = index.recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].summary, "succeeded on retry");
    }

    #[test]
    fn recent_is_newest_first() {
        let (_dir, index) = index();
        for id in 1..=4 {
            index.record(id, &format!("task {id}"), "ok").unwrap();
        }
        let recent = index.recent(2).unwrap();
        let ids: Vec<i64> = recent.iter().map(|e| e.task_id).collect();
        assert_eq!(ids, [4, 3]);
    }

    #[test]
    fn keywords_are_deduped_and_capped() {
        let kws = extract_keywords("go go go build build a a a page now so we hit the cap yes");
        assert!(kws.len() <= MAX_KEYWORDS);
        assert_eq!(kws.iter().filter(|k| *k == "go").count(), 1);
        // Single-character words are dropped.
        assert!(!kws.contains(&"a".to_string()));
    }

    #[test]
    fn best_match_ranks_first() {
        let (_dir, index) = index();
        index.record(1, "cafe page", "ok").unwrap();
        index.record(2, "cafe page with cafe menu and cafe photos", "cafe done").unwrap();
        let hits = index.search("cafe menu photos").unwrap();
        assert_eq!(hits[0].task_id, 2);
    }
}
