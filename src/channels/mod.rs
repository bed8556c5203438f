//! Chat transport — outbound notifications and inbound polling.

pub mod outbox;
pub mod telegram;

pub use outbox::OutboxNotifier;
pub use telegram::{TelegramNotifier, TelegramPoller};

use async_trait::async_trait;

use crate::error::ChannelError;

/// One inbound chat message, as delivered by a transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Transport-level update id, used as the ingestion high-water mark.
    pub update_id: i64,
    pub chat_id: String,
    pub user: String,
    pub text: String,
}

/// Outbound notification seam. One implementation per transport; all
/// notifications are plain text keyed by chat id.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, chat_id: &str, text: &str) -> Result<(), ChannelError>;
}
