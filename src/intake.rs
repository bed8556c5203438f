//! Task intake — validation, enqueue, and worker trigger.

use crate::channels::InboundMessage;
use crate::error::{Error, IntakeError};
use crate::store::{QueueStore, Task};
use crate::worker::{Supervisor, TriggerOutcome};

/// What a submission produced: the created task plus the trigger outcome,
/// returned together so the transport can reply immediately without
/// waiting for completion.
#[derive(Debug)]
pub struct Submission {
    pub task: Task,
    pub trigger: TriggerOutcome,
}

/// Accepts new tasks from the chat transport or the control surface.
pub struct Intake {
    queue: QueueStore,
    supervisor: Supervisor,
}

impl Intake {
    pub fn new(queue: QueueStore, supervisor: Supervisor) -> Self {
        Self { queue, supervisor }
    }

    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    /// Enqueue one task and ask the supervisor to (re)trigger.
    ///
    /// Text that is empty after trimming is a client error; nothing is
    /// enqueued.
    pub async fn submit(&self, text: &str, chat_id: &str, user: &str) -> Result<Submission, Error> {
        let text = text.trim();
        if text.is_empty() {
            return Err(IntakeError::EmptyText.into());
        }

        let task = self.queue.append(chat_id, user, text)?;
        tracing::info!(task_id = task.id, chat_id, "task enqueued");

        let trigger = self.supervisor.trigger(Some(task.chat_id.clone())).await;
        Ok(Submission { task, trigger })
    }

    /// Idempotent variant for chat transport updates: an update at or below
    /// the queue's high-water mark enqueues nothing and triggers nothing.
    pub async fn submit_update(&self, msg: &InboundMessage) -> Result<Option<Submission>, Error> {
        let text = msg.text.trim();
        if text.is_empty() {
            tracing::debug!(update_id = msg.update_id, "skipping empty inbound message");
            return Ok(None);
        }

        let Some(task) = self
            .queue
            .append_update(msg.update_id, &msg.chat_id, &msg.user, text)?
        else {
            tracing::debug!(update_id = msg.update_id, "duplicate update ignored");
            return Ok(None);
        };
        tracing::info!(task_id = task.id, update_id = msg.update_id, "task enqueued");

        let trigger = self.supervisor.trigger(Some(task.chat_id.clone())).await;
        Ok(Some(Submission { task, trigger }))
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }
}
