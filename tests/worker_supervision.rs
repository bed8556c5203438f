//! End-to-end supervision tests: spawn real (shell) workers against a
//! temp state dir and observe queue, busy-state, and outbox effects.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use relaybot::channels::{Notifier, OutboxNotifier};
use relaybot::config::WorkerConfig;
use relaybot::intake::Intake;
use relaybot::store::{BusyStore, QueueStore};
use relaybot::worker::{StopOutcome, Supervisor, TriggerOutcome};

struct Harness {
    _dir: tempfile::TempDir,
    queue: QueueStore,
    busy: BusyStore,
    outbox: Arc<OutboxNotifier>,
    supervisor: Supervisor,
}

impl Harness {
    /// Build a supervisor whose worker is the given shell snippet, run via
    /// the command override. `$STATE` in the snippet expands to the state
    /// dir.
    fn with_worker(script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::with_worker_in(dir, script, |cfg| cfg)
    }

    fn with_worker_in(
        dir: tempfile::TempDir,
        script: &str,
        tweak: impl FnOnce(WorkerConfig) -> WorkerConfig,
    ) -> Self {
        let state = dir.path();
        let script = script.replace("$STATE", &state.display().to_string());
        let cfg = tweak(WorkerConfig {
            state_dir: state.to_path_buf(),
            command_override: Some(vec!["sh".into(), "-c".into(), script]),
            poll_interval: Duration::from_millis(50),
            heartbeat_interval: Duration::from_secs(30),
            task_timeout: Duration::from_secs(20),
            ..WorkerConfig::default()
        });

        let queue = QueueStore::new(state.join("tasks.json"));
        let busy = BusyStore::new(state.join("working.json"));
        let outbox = Arc::new(OutboxNotifier::new(state.join("outbox.json")));
        let notifier: Arc<dyn Notifier> = outbox.clone();
        let supervisor = Supervisor::new(cfg, queue.clone(), busy.clone(), notifier);

        Self {
            _dir: dir,
            queue,
            busy,
            outbox,
            supervisor,
        }
    }

    fn intake(&self) -> Intake {
        Intake::new(self.queue.clone(), self.supervisor.clone())
    }

    fn state_dir(&self) -> &Path {
        self._dir.path()
    }

    fn outbox_texts(&self) -> Vec<String> {
        self.outbox.messages().into_iter().map(|m| m.text).collect()
    }

    fn run_count(&self) -> usize {
        std::fs::read_to_string(self.state_dir().join("runs.txt"))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }
}

/// Poll until the condition holds or the deadline passes.
async fn wait_until(mut cond: impl FnMut() -> bool, deadline: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    cond()
}

/// A worker body that records the run and resolves the first pending task
/// by editing the queue file in place, like the real worker contract does.
const MARKING_WORKER: &str = r#"echo run >> $STATE/runs.txt; \
sed -i '0,/"processed": false/s//"processed": true/' $STATE/tasks.json; \
exit 0"#;

#[tokio::test]
async fn duplicate_trigger_reports_already_running() {
    let h = Harness::with_worker("sleep 5");
    h.queue.append("1", "u", "task one").unwrap();

    let first = h.supervisor.trigger(Some("1".into())).await;
    assert!(first.triggered());

    let second = h.supervisor.trigger(Some("1".into())).await;
    assert_eq!(second, TriggerOutcome::AlreadyRunning);

    // Exactly one live worker.
    assert!(h.supervisor.is_running().await);
    match h.supervisor.stop().await {
        StopOutcome::Stopped { .. } => {}
        other => panic!("expected a running worker to stop, got {other:?}"),
    }
}

#[tokio::test]
async fn drain_on_success_respawns_until_backlog_empty() {
    let h = Harness::with_worker(MARKING_WORKER);
    h.queue.append("1", "u", "first task").unwrap();
    h.queue.append("1", "u", "second task").unwrap();

    let outcome = h.supervisor.trigger(Some("1".into())).await;
    assert!(outcome.triggered());

    assert!(
        wait_until(
            || !h.queue.has_unprocessed().unwrap_or(true) && h.run_count() == 2,
            Duration::from_secs(10)
        )
        .await,
        "expected two runs to drain both tasks, got {} runs, pending={:?}",
        h.run_count(),
        h.queue.pending_ids().unwrap()
    );

    // The slot frees once the drain ends.
    let mut freed = false;
    for _ in 0..100 {
        if !h.supervisor.is_running().await {
            freed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(freed, "run slot should clear after the drain ends");
}

#[tokio::test]
async fn halt_on_failure_does_not_respawn() {
    let h = Harness::with_worker("echo run >> $STATE/runs.txt; echo 'boom failed' >> $STATE/execution.log; exit 3");
    h.queue.append("1", "u", "first task").unwrap();
    h.queue.append("1", "u", "second task").unwrap();

    let outcome = h.supervisor.trigger(Some("1".into())).await;
    assert!(outcome.triggered());

    assert!(
        wait_until(
            || h.outbox_texts().iter().any(|t| t.starts_with("Task failed")),
            Duration::from_secs(10)
        )
        .await
    );
    // Give a would-be respawn time to happen, then check it never did.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.run_count(), 1);
    assert_eq!(h.queue.pending_ids().unwrap().len(), 2);
}

#[tokio::test]
async fn timeout_kills_long_running_worker() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::with_worker_in(dir, "sleep 60", |cfg| WorkerConfig {
        task_timeout: Duration::from_millis(400),
        ..cfg
    });
    h.queue.append("1", "u", "slow task").unwrap();

    let started = Instant::now();
    let outcome = h.supervisor.trigger(Some("1".into())).await;
    assert!(outcome.triggered());

    assert!(
        wait_until(
            || h.outbox_texts().iter().any(|t| t.contains("timeout")),
            Duration::from_secs(10)
        )
        .await
    );
    assert!(started.elapsed() < Duration::from_secs(8));
    // Timed-out tasks stay queued for a future trigger.
    assert_eq!(h.queue.pending_ids().unwrap(), vec![1]);
}

#[tokio::test]
async fn busy_state_tracks_run_lifecycle() {
    let h = Harness::with_worker("sleep 0.6");
    h.queue.append("1", "u", "task").unwrap();

    h.supervisor.trigger(Some("1".into())).await;
    assert!(h.busy.is_busy().unwrap());
    assert_eq!(h.busy.read().unwrap().task_id, Some(1));

    assert!(
        wait_until(|| !h.busy.is_busy().unwrap_or(true), Duration::from_secs(10)).await,
        "busy flag should clear when the run ends"
    );
}

#[tokio::test]
async fn nested_session_blocks_trigger() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::with_worker_in(dir, "exit 0", |cfg| WorkerConfig {
        nested_session: true,
        ..cfg
    });

    let outcome = h.supervisor.trigger(Some("1".into())).await;
    assert_eq!(outcome, TriggerOutcome::Blocked);
    assert!(
        h.outbox_texts()
            .iter()
            .any(|t| t.contains("Nested worker invocation blocked"))
    );
    assert!(!h.supervisor.is_running().await);
}

#[tokio::test]
async fn unresolved_command_reports_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::with_worker_in(dir, "unused", |cfg| WorkerConfig {
        command_override: None,
        cli: "definitely-not-a-real-binary-xyzzy".to_string(),
        ..cfg
    });

    let outcome = h.supervisor.trigger(Some("1".into())).await;
    match outcome {
        TriggerOutcome::Unavailable { reason } => assert!(reason.contains("unavailable")),
        other => panic!("expected Unavailable, got {other:?}"),
    }
    assert!(!h.supervisor.is_running().await);
}

#[tokio::test]
async fn submitted_landing_page_task_completes_end_to_end() {
    let script = r#"echo run >> $STATE/runs.txt; \
echo '[builder] assembling page' >> $STATE/execution.log; \
sed -i '0,/"processed": false/s//"processed": true/' $STATE/tasks.json; \
echo '[done] pipeline complete' >> $STATE/execution.log; \
exit 0"#;
    let h = Harness::with_worker(script);
    let intake = h.intake();

    let submission = intake
        .submit("build a landing page", "1", "tester")
        .await
        .unwrap();
    assert_eq!(submission.task.id, 1);
    assert!(!submission.task.processed);
    assert!(submission.trigger.triggered());

    assert!(
        wait_until(
            || {
                h.outbox_texts()
                    .iter()
                    .any(|t| t == "Automated task completed.")
            },
            Duration::from_secs(10)
        )
        .await
    );

    // Task 1 resolved, and every notification went to chat 1.
    assert!(h.queue.pending_ids().unwrap().is_empty());
    let messages = h.outbox.messages();
    assert!(messages.iter().all(|m| m.chat_id == "1"));
    assert!(
        messages
            .iter()
            .any(|m| m.text == "Building the web package.")
    );
    assert!(
        messages
            .iter()
            .any(|m| m.text == "Generation pipeline completed.")
    );
}

#[tokio::test]
async fn second_submission_while_busy_reports_already_running() {
    let h = Harness::with_worker("sleep 5");
    let intake = h.intake();

    let first = intake.submit("build a landing page", "1", "tester").await.unwrap();
    assert!(first.trigger.triggered());

    let second = intake.submit("another page please", "1", "tester").await.unwrap();
    assert_eq!(second.trigger, TriggerOutcome::AlreadyRunning);

    // Both tasks queued; only one worker observed.
    assert_eq!(h.queue.pending_ids().unwrap(), vec![1, 2]);
    assert!(h.supervisor.is_running().await);
    h.supervisor.stop().await;
}

#[tokio::test]
async fn empty_text_is_rejected_without_enqueueing() {
    let h = Harness::with_worker("exit 0");
    let intake = h.intake();

    let err = intake.submit("   \n ", "1", "tester").await.unwrap_err();
    assert!(matches!(
        err,
        relaybot::error::Error::Intake(relaybot::error::IntakeError::EmptyText)
    ));
    assert_eq!(h.queue.len().unwrap(), 0);
    assert!(!h.supervisor.is_running().await);
}

#[tokio::test]
async fn duplicate_update_is_ingested_once() {
    use relaybot::channels::InboundMessage;

    let h = Harness::with_worker("sleep 2");
    let intake = h.intake();
    let msg = InboundMessage {
        update_id: 500,
        chat_id: "1".into(),
        user: "tester".into(),
        text: "build a page".into(),
    };

    let first = intake.submit_update(&msg).await.unwrap();
    assert!(first.is_some());
    let second = intake.submit_update(&msg).await.unwrap();
    assert!(second.is_none());

    assert_eq!(h.queue.len().unwrap(), 1);
    assert_eq!(h.queue.last_update_id().unwrap(), 500);
    h.supervisor.stop().await;
}
