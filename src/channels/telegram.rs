//! Telegram transport — long-polls the Bot API for updates and sends
//! plain-text notifications.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::channels::{InboundMessage, Notifier};
use crate::error::ChannelError;
use crate::intake::Intake;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Pause between long-poll rounds.
const POLL_PAUSE: Duration = Duration::from_millis(100);
/// Back-off after a polling error.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

fn api_url(bot_token: &str, method: &str) -> String {
    format!("https://api.telegram.org/bot{bot_token}/{method}")
}

/// Check whether any of the provided identities is in the allowlist.
/// `*` allows everyone.
pub fn check_user_allowed<'a, I>(allowed_users: &[String], identities: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    identities
        .into_iter()
        .any(|id| allowed_users.iter().any(|u| u == "*" || u == id))
}

// ── Outbound ────────────────────────────────────────────────────────

/// Sends notifications through the Bot API, Markdown-first with a single
/// plain-text fallback attempt per chunk.
pub struct TelegramNotifier {
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    /// Send a single chunk (≤4096 chars), Markdown first with fallback.
    async fn send_chunk(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let markdown_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });

        let markdown_resp = self
            .client
            .post(api_url(&self.bot_token, "sendMessage"))
            .json(&markdown_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if markdown_resp.status().is_success() {
            return Ok(());
        }

        let markdown_status = markdown_resp.status();
        tracing::warn!(
            status = ?markdown_status,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        let plain_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        let plain_resp = self
            .client
            .post(api_url(&self.bot_token, "sendMessage"))
            .json(&plain_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!(
                    "sendMessage failed (markdown: {markdown_status}, plain: {plain_err})"
                ),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_chunk(chat_id, &chunk).await?;
        }
        Ok(())
    }
}

/// Split a message into chunks that fit the Telegram limit, on char
/// boundaries.
fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

// ── Inbound ─────────────────────────────────────────────────────────

/// Long-polls `getUpdates` and feeds accepted messages through the intake.
pub struct TelegramPoller {
    bot_token: String,
    allowed_users: Vec<String>,
    client: reqwest::Client,
}

impl TelegramPoller {
    pub fn new(bot_token: String, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            client: reqwest::Client::new(),
        }
    }

    /// One long-poll round: updates strictly after `after`, filtered by the
    /// allowlist. Non-text updates are dropped.
    pub async fn fetch_updates(&self, after: i64) -> Result<Vec<InboundMessage>, ChannelError> {
        let body = serde_json::json!({
            "offset": after + 1,
            "timeout": 30,
            "allowed_updates": ["message"]
        });

        let resp = self
            .client
            .post(api_url(&self.bot_token, "getUpdates"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::PollFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        let data: serde_json::Value =
            resp.json().await.map_err(|e| ChannelError::PollFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        let Some(results) = data.get("result").and_then(serde_json::Value::as_array) else {
            return Err(ChannelError::InvalidMessage(
                "getUpdates response without result array".to_string(),
            ));
        };

        let mut messages = Vec::new();
        for update in results {
            let Some(update_id) = update.get("update_id").and_then(serde_json::Value::as_i64)
            else {
                continue;
            };
            let Some(message) = update.get("message") else {
                continue;
            };

            let text = message
                .get("text")
                .or_else(|| message.get("caption"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();
            if text.is_empty() {
                continue;
            }

            let username = message
                .get("from")
                .and_then(|f| f.get("username"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown");
            let user_id = message
                .get("from")
                .and_then(|f| f.get("id"))
                .and_then(serde_json::Value::as_i64)
                .map(|id| id.to_string());
            let first_name = message
                .get("from")
                .and_then(|f| f.get("first_name"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or(username);

            if !self.allowed_users.is_empty() {
                let mut identities = vec![username];
                if let Some(ref id) = user_id {
                    identities.push(id.as_str());
                }
                if !check_user_allowed(&self.allowed_users, identities.iter().copied()) {
                    tracing::warn!(
                        username,
                        user_id = user_id.as_deref().unwrap_or("unknown"),
                        "ignoring message from unauthorized user"
                    );
                    continue;
                }
            }

            let chat_id = message
                .get("chat")
                .and_then(|c| c.get("id"))
                .and_then(serde_json::Value::as_i64)
                .map(|id| id.to_string())
                .unwrap_or_default();

            messages.push(InboundMessage {
                update_id,
                chat_id,
                user: first_name.to_string(),
                text: text.to_string(),
            });
        }

        Ok(messages)
    }

    /// Poll forever, submitting each accepted message through the intake.
    ///
    /// The in-memory cursor tracks every fetched update so filtered ones
    /// are not re-fetched; the queue's persisted mark only advances for
    /// appended tasks and reseeds the cursor across restarts.
    pub async fn run(self, intake: Arc<Intake>) {
        let mut after = intake.queue().last_update_id().unwrap_or(0);
        tracing::info!("Telegram channel listening for messages...");

        loop {
            match self.fetch_updates(after).await {
                Ok(messages) => {
                    for message in messages {
                        after = after.max(message.update_id);
                        match intake.submit_update(&message).await {
                            Ok(Some(submission)) => {
                                tracing::info!(
                                    task_id = submission.task.id,
                                    trigger = ?submission.trigger,
                                    "inbound message enqueued"
                                );
                            }
                            Ok(None) => {}
                            Err(e) => {
                                tracing::error!(error = %e, "failed to ingest inbound message");
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Telegram poll error");
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                }
            }
            tokio::time::sleep(POLL_PAUSE).await;
        }
    }
}
