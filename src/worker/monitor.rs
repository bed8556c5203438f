//! Progress monitor — tails the shared worker log into chat notifications.
//!
//! A cooperative poll loop, not an event subscription: the log is a plain
//! file appended to by an unrelated process. Each poll reads only the bytes
//! past the last offset, classifies new lines into stages, and notifies the
//! chat at most once per stage per run.

use std::collections::HashSet;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Child;
use tokio::sync::Mutex;

use crate::channels::Notifier;
use crate::worker::stage::{self, Stage};

/// How far back to scan for a diagnostic line after a nonzero exit.
const FAILURE_TAIL_LINES: usize = 30;
/// Diagnostic snippet cap in the failure notification.
const DIAGNOSTIC_SNIPPET_CHARS: usize = 180;

/// Terminal verdict of one worker run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunVerdict {
    /// Exit code 0.
    Completed,
    /// Nonzero exit, with a best-effort diagnostic line from the log tail.
    Failed {
        exit_code: Option<i32>,
        diagnostic: Option<String>,
    },
    /// The wall-clock budget expired and the worker was killed.
    TimedOut,
}

/// What one supervised run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub verdict: RunVerdict,
    /// Stages notified during the run, in emission order.
    pub stages: Vec<Stage>,
    pub elapsed: Duration,
}

/// Polls a running worker until exit or timeout, streaming stage events.
pub struct ProgressMonitor {
    log_path: PathBuf,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    task_timeout: Duration,
}

impl ProgressMonitor {
    pub fn new(
        log_path: PathBuf,
        poll_interval: Duration,
        heartbeat_interval: Duration,
        task_timeout: Duration,
    ) -> Self {
        Self {
            log_path,
            poll_interval,
            heartbeat_interval,
            task_timeout,
        }
    }

    /// Run the monitoring loop until the child exits or times out.
    ///
    /// `offset` is the log length at spawn time; everything before it
    /// belongs to earlier runs and is never re-read.
    pub async fn run(
        &self,
        child: Arc<Mutex<Child>>,
        mut offset: u64,
        chat_id: Option<&str>,
        notifier: &dyn Notifier,
    ) -> RunOutcome {
        let started = Instant::now();
        let mut last_heartbeat = Instant::now();
        let mut seen: HashSet<Stage> = HashSet::new();
        let mut emitted: Vec<Stage> = Vec::new();

        let exit_status = loop {
            let status = {
                let mut guard = child.lock().await;
                match guard.try_wait() {
                    Ok(status) => status,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to poll worker status");
                        None
                    }
                }
            };

            let (lines, new_offset) = read_log_increment(&self.log_path, offset).await;
            offset = new_offset;
            for line in &lines {
                if let Some(found) =
                    self.emit_stage(line, &mut seen, chat_id, notifier).await
                {
                    emitted.push(found);
                    last_heartbeat = Instant::now();
                }
            }

            // Hard wall-clock budget: enforced even while the worker is
            // still producing output, and even if it exited this poll.
            if started.elapsed() > self.task_timeout {
                {
                    let mut guard = child.lock().await;
                    if let Err(e) = guard.start_kill() {
                        tracing::warn!(error = %e, "timeout kill failed");
                    }
                    let _ = guard.wait().await;
                }
                self.send(
                    notifier,
                    chat_id,
                    &format!(
                        "Task timeout exceeded ({}s).",
                        self.task_timeout.as_secs()
                    ),
                )
                .await;
                return RunOutcome {
                    verdict: RunVerdict::TimedOut,
                    stages: emitted,
                    elapsed: started.elapsed(),
                };
            }

            if let Some(status) = status {
                break status;
            }

            if last_heartbeat.elapsed() >= self.heartbeat_interval {
                self.send(
                    notifier,
                    chat_id,
                    &format!("Task still running... ({}s)", started.elapsed().as_secs()),
                )
                .await;
                last_heartbeat = Instant::now();
            }

            tokio::time::sleep(self.poll_interval).await;
        };

        // The worker may have written its final lines after the last poll
        // but before exiting; drain them before computing the verdict.
        let (lines, _) = read_log_increment(&self.log_path, offset).await;
        for line in &lines {
            if let Some(found) = self.emit_stage(line, &mut seen, chat_id, notifier).await {
                emitted.push(found);
            }
        }

        let verdict = if exit_status.success() {
            self.send(notifier, chat_id, "Automated task completed.").await;
            RunVerdict::Completed
        } else {
            let tail = tail_log(&self.log_path, FAILURE_TAIL_LINES).await;
            let diagnostic = tail
                .iter()
                .rev()
                .find(|line| stage::is_failure_marker(line))
                .or_else(|| tail.last())
                .cloned();
            let message = match &diagnostic {
                Some(line) => format!(
                    "Task failed: {}",
                    clip_chars(line, DIAGNOSTIC_SNIPPET_CHARS)
                ),
                None => "Task failed. Check the execution log for details.".to_string(),
            };
            self.send(notifier, chat_id, &message).await;
            RunVerdict::Failed {
                exit_code: exit_status.code(),
                diagnostic,
            }
        };

        RunOutcome {
            verdict,
            stages: emitted,
            elapsed: started.elapsed(),
        }
    }

    /// Classify one line; notify and record the stage if unseen this run.
    async fn emit_stage(
        &self,
        line: &str,
        seen: &mut HashSet<Stage>,
        chat_id: Option<&str>,
        notifier: &dyn Notifier,
    ) -> Option<Stage> {
        let found = stage::classify(line)?;
        if !seen.insert(found) {
            return None;
        }
        self.send(notifier, chat_id, found.message()).await;
        Some(found)
    }

    async fn send(&self, notifier: &dyn Notifier, chat_id: Option<&str>, text: &str) {
        let Some(chat_id) = chat_id else { return };
        if let Err(e) = notifier.notify(chat_id, text).await {
            tracing::warn!(error = %e, "progress notification failed");
        }
    }
}

/// Read the bytes appended past `offset`, returning the new lines and the
/// advanced offset. A missing or unreadable log yields nothing and leaves
/// the offset untouched.
pub(crate) async fn read_log_increment(path: &Path, offset: u64) -> (Vec<String>, u64) {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(_) => return (Vec::new(), offset),
    };
    if file.seek(SeekFrom::Start(offset)).await.is_err() {
        return (Vec::new(), offset);
    }
    let mut buf = Vec::new();
    match file.read_to_end(&mut buf).await {
        Ok(0) | Err(_) => (Vec::new(), offset),
        Ok(read) => {
            let text = String::from_utf8_lossy(&buf);
            let lines = text.lines().map(str::to_string).collect();
            (lines, offset + read as u64)
        }
    }
}

/// Last `max_lines` lines of the log, lossily decoded.
pub(crate) async fn tail_log(path: &Path, max_lines: usize) -> Vec<String> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(_) => return Vec::new(),
    };
    let text = String::from_utf8_lossy(&raw);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].iter().map(|s| s.to_string()).collect()
}

/// Append one line to the shared log. Best-effort: the log is telemetry,
/// not a source of truth.
pub(crate) fn append_log_line(path: &Path, line: &str) {
    use std::io::Write;
    let result = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .and_then(|mut file| writeln!(file, "{}", line.trim_end()));
    if let Err(e) = result {
        tracing::warn!(path = %path.display(), error = %e, "failed to append to execution log");
    }
}

fn clip_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
