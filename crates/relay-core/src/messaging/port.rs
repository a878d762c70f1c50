use async_trait::async_trait;

use crate::{
    domain::ChatId,
    messaging::types::{MessagingCapabilities, OutgoingDocument},
    Result,
};

/// Outbound messenger port.
///
/// Telegram is the only implementation; capability flags let the dispatcher
/// adapt message size and grouping without knowing the concrete API.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<()>;

    async fn send_document(&self, chat_id: ChatId, doc: &OutgoingDocument) -> Result<()>;

    /// Send 2..=`max_group_size` documents as one grouped message.
    async fn send_document_group(&self, chat_id: ChatId, docs: &[OutgoingDocument])
        -> Result<()>;
}
