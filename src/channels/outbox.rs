//! File-backed outbox notifier.
//!
//! Used in webmock mode (no bot token) and by tests: notifications are
//! appended to a lock-protected JSON file instead of leaving the host.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channels::Notifier;
use crate::error::ChannelError;
use crate::store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub chat_id: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OutboxFile {
    messages: Vec<OutboxMessage>,
}

/// Notifier that appends to an on-disk outbox instead of a chat service.
pub struct OutboxNotifier {
    path: PathBuf,
}

impl OutboxNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// All captured notifications, oldest first.
    pub fn messages(&self) -> Vec<OutboxMessage> {
        let data: OutboxFile = store::load_json(&self.path);
        data.messages
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    fn name(&self) -> &str {
        "outbox"
    }

    async fn notify(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let append = || -> Result<(), crate::error::StoreError> {
            let _lock = store::FileLock::acquire(&self.path)?;
            let mut data: OutboxFile = store::load_json(&self.path);
            data.messages.push(OutboxMessage {
                chat_id: chat_id.to_string(),
                text: text.to_string(),
                sent_at: Utc::now(),
            });
            store::save_json(&self.path, &data)
        };
        append().map_err(|e| ChannelError::SendFailed {
            name: "outbox".into(),
            reason: e.to_string(),
        })
    }
}
