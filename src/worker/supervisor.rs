//! Worker supervision — single-slot spawn, guards, and re-trigger logic.
//!
//! One worker at a time: the in-memory slot rejects duplicate triggers
//! within this process, and an exclusive lock on `worker.lock`, held for
//! the whole run, keeps independent orchestrator processes on the same
//! host from double-spawning.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use fs2::FileExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::channels::Notifier;
use crate::config::{SESSION_MARKER_VARS, WorkerConfig};
use crate::store::{BusyStore, QueueStore};
use crate::worker::command::{self, LaunchMode};
use crate::worker::monitor::{self, ProgressMonitor, RunVerdict};

/// Outcome of a trigger request. Structured, never an error: guard
/// rejections are informational no-ops the caller should not retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started { pid: u32 },
    /// A worker is already running (here or in another orchestrator).
    AlreadyRunning,
    /// This process is itself inside a worker invocation; spawning
    /// another would corrupt the parent's execution context.
    Blocked,
    /// No worker command could be resolved, or the spawn failed.
    Unavailable { reason: String },
}

impl TriggerOutcome {
    pub fn triggered(&self) -> bool {
        matches!(self, Self::Started { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Started { .. } => None,
            Self::AlreadyRunning => Some("already_running"),
            Self::Blocked => Some("nested_invocation_blocked"),
            Self::Unavailable { reason } => Some(reason),
        }
    }
}

/// Outcome of an operator stop request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { pid: u32 },
    NotRunning,
}

/// The currently tracked run, present only while a worker is alive.
struct RunSlot {
    child: Arc<Mutex<Child>>,
    pid: u32,
}

/// A freshly spawned worker handed to the drain loop.
struct ActiveRun {
    child: Arc<Mutex<Child>>,
    pid: u32,
    log_offset: u64,
}

/// Exclusive cross-process lock held for the lifetime of a worker run.
struct RunLock {
    file: std::fs::File,
}

impl RunLock {
    fn try_acquire(path: &Path) -> std::io::Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

struct Inner {
    cfg: WorkerConfig,
    queue: QueueStore,
    busy: BusyStore,
    notifier: Arc<dyn Notifier>,
    slot: Mutex<Option<RunSlot>>,
}

/// Decides whether a worker may be started, spawns it, and supervises the
/// run until the queue is drained or a run fails.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        cfg: WorkerConfig,
        queue: QueueStore,
        busy: BusyStore,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cfg,
                queue,
                busy,
                notifier,
                slot: Mutex::new(None),
            }),
        }
    }

    /// Start a worker if none is running. Returns after the spawn (or after
    /// determining no spawn is needed) — never waits for completion.
    pub async fn trigger(&self, chat_id: Option<String>) -> TriggerOutcome {
        let inner = &self.inner;

        if inner.cfg.nested_session {
            tracing::warn!("nested worker invocation blocked");
            monitor::append_log_line(
                &inner.cfg.log_path(),
                "[error] nested worker invocation blocked",
            );
            self.notify(
                chat_id.as_deref(),
                "Nested worker invocation blocked. Run the agent from a normal \
                 terminal or set RELAYBOT_ALLOW_NESTED=1.",
            )
            .await;
            return TriggerOutcome::Blocked;
        }

        let mut slot = inner.slot.lock().await;
        if slot.is_some() {
            tracing::info!("worker already running; skipping duplicate trigger");
            return TriggerOutcome::AlreadyRunning;
        }

        let run_lock = match RunLock::try_acquire(&inner.cfg.run_lock_path()) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                tracing::info!("another orchestrator holds the worker run lock");
                return TriggerOutcome::AlreadyRunning;
            }
            Err(e) => {
                drop(slot);
                let reason = format!("run lock unavailable: {e}");
                tracing::error!(%reason);
                return TriggerOutcome::Unavailable { reason };
            }
        };

        let run = match self.spawn_worker() {
            Ok(run) => run,
            Err(reason) => {
                drop(slot);
                tracing::error!(%reason, "worker start refused");
                monitor::append_log_line(&inner.cfg.log_path(), &format!("[error] {reason}"));
                self.notify(chat_id.as_deref(), &format!("Worker unavailable: {reason}"))
                    .await;
                return TriggerOutcome::Unavailable { reason };
            }
        };

        let pid = run.pid;
        *slot = Some(RunSlot {
            child: run.child.clone(),
            pid,
        });
        drop(slot);

        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.drain(run, chat_id, run_lock).await });

        TriggerOutcome::Started { pid }
    }

    /// Operator-level kill of the tracked worker. The monitor loop observes
    /// the exit and finishes the run as failed.
    pub async fn stop(&self) -> StopOutcome {
        let slot = self.inner.slot.lock().await;
        let Some(active) = slot.as_ref() else {
            return StopOutcome::NotRunning;
        };
        let pid = active.pid;
        let mut child = active.child.lock().await;
        match child.start_kill() {
            Ok(()) => {
                tracing::info!(pid, "worker stop requested");
                StopOutcome::Stopped { pid }
            }
            Err(e) => {
                tracing::warn!(pid, error = %e, "stop requested but worker had already exited");
                StopOutcome::NotRunning
            }
        }
    }

    pub async fn running_pid(&self) -> Option<u32> {
        self.inner.slot.lock().await.as_ref().map(|run| run.pid)
    }

    pub async fn is_running(&self) -> bool {
        self.running_pid().await.is_some()
    }

    /// Supervise runs back to back until the backlog is drained or a run
    /// does not complete cleanly. Holds the run lock the whole time.
    async fn drain(self, mut run: ActiveRun, chat_id: Option<String>, run_lock: RunLock) {
        let inner = &self.inner;
        loop {
            let progress = ProgressMonitor::new(
                inner.cfg.log_path(),
                inner.cfg.poll_interval,
                inner.cfg.heartbeat_interval,
                inner.cfg.task_timeout,
            );
            let outcome = progress
                .run(
                    run.child.clone(),
                    run.log_offset,
                    chat_id.as_deref(),
                    inner.notifier.as_ref(),
                )
                .await;

            if let Err(e) = inner.busy.clear_busy() {
                tracing::warn!(error = %e, "failed to clear busy state");
            }

            match outcome.verdict {
                RunVerdict::Completed => {}
                RunVerdict::Failed { exit_code, .. } => {
                    // Circuit breaker: a failed run is never retried
                    // automatically; the next drain waits for an external
                    // trigger.
                    tracing::warn!(?exit_code, "worker run failed; waiting for next trigger");
                    break;
                }
                RunVerdict::TimedOut => {
                    tracing::warn!("worker run timed out; queue entry left unprocessed");
                    break;
                }
            }

            if !inner.queue.has_unprocessed().unwrap_or(false) {
                break;
            }

            match self.spawn_worker() {
                Ok(next) => {
                    tracing::info!(pid = next.pid, "backlog remains; worker re-spawned");
                    let mut slot = inner.slot.lock().await;
                    if let Some(active) = slot.as_mut() {
                        active.child = next.child.clone();
                        active.pid = next.pid;
                    }
                    run = next;
                }
                Err(reason) => {
                    tracing::error!(%reason, "re-spawn failed; drain stopped");
                    monitor::append_log_line(
                        &inner.cfg.log_path(),
                        &format!("[error] re-spawn failed: {reason}"),
                    );
                    break;
                }
            }
        }

        *inner.slot.lock().await = None;
        drop(run_lock);
    }

    /// Resolve and spawn one worker, recording the log offset and marking
    /// the busy state. Session markers from this process's own invocation
    /// context are stripped from the child environment.
    fn spawn_worker(&self) -> Result<ActiveRun, String> {
        let inner = &self.inner;
        let cmd = command::resolve(&inner.cfg)?;
        let log_path = inner.cfg.log_path();
        let log_offset = std::fs::metadata(&log_path).map(|m| m.len()).unwrap_or(0);

        let mut invocation = Command::new(&cmd.program);
        invocation.args(&cmd.args);
        invocation.current_dir(&inner.cfg.state_dir);
        for var in SESSION_MARKER_VARS {
            invocation.env_remove(var);
        }

        if cmd.mode == LaunchMode::Direct {
            // Direct CLI mode must write the shared log itself for the
            // monitor to have anything to tail.
            let stdout = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(&log_path)
                .map_err(|e| format!("cannot open log for redirection: {e}"))?;
            let stderr = stdout
                .try_clone()
                .map_err(|e| format!("cannot clone log handle: {e}"))?;
            invocation.stdout(Stdio::from(stdout));
            invocation.stderr(Stdio::from(stderr));
        }

        let child = invocation
            .spawn()
            .map_err(|e| format!("failed to spawn '{}': {e}", cmd.program))?;
        let pid = child.id().unwrap_or_default();

        let busy_task = inner.queue.first_unprocessed().ok().flatten();
        if let Err(e) = inner.busy.set_busy(busy_task.map(|t| t.id)) {
            tracing::warn!(error = %e, "failed to persist busy state");
        }

        tracing::info!(pid, mode = ?cmd.mode, "worker started");
        Ok(ActiveRun {
            child: Arc::new(Mutex::new(child)),
            pid,
            log_offset,
        })
    }

    async fn notify(&self, chat_id: Option<&str>, text: &str) {
        let Some(chat_id) = chat_id else { return };
        if let Err(e) = self.inner.notifier.notify(chat_id, text).await {
            tracing::warn!(error = %e, "supervisor notification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_outcome_reasons() {
        assert!(TriggerOutcome::Started { pid: 1 }.triggered());
        assert_eq!(TriggerOutcome::Started { pid: 1 }.reason(), None);
        assert_eq!(
            TriggerOutcome::AlreadyRunning.reason(),
            Some("already_running")
        );
        assert_eq!(
            TriggerOutcome::Blocked.reason(),
            Some("nested_invocation_blocked")
        );
        assert_eq!(
            TriggerOutcome::Unavailable {
                reason: "no bash".into()
            }
            .reason(),
            Some("no bash")
        );
    }

    #[test]
    fn run_lock_excludes_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.lock");
        let first = RunLock::try_acquire(&path).unwrap();
        assert!(first.is_some());
        // Same-process second open gets its own file description, so the
        // advisory lock applies.
        let second = RunLock::try_acquire(&path).unwrap();
        assert!(second.is_none());
        drop(first);
        assert!(RunLock::try_acquire(&path).unwrap().is_some());
    }
}
