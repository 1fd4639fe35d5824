//! Boundary to the external messaging engine.
//!
//! The windowing store never talks to storage or the network itself; everything it needs
//! about a chat comes through [`MessagingBackend`], and change notifications come back as
//! [`BackendEvent`]s.

mod memory;
mod types;

use async_trait::async_trait;

pub use memory::{FetchGate, InMemoryBackend};
pub use types::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("chat {0} not found")]
    ChatNotFound(ChatId),
    #[error("message {0} not found")]
    MessageNotFound(MessageId),
    #[error("index range {start}..={end} out of range for {len} messages")]
    IndexOutOfRange { start: usize, end: usize, len: usize },
    #[error("messaging engine unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait MessagingBackend: Send + Sync + 'static {
    /// Full ordered id sequence of a chat, day markers included.
    async fn get_message_id_sequence(&self, chat_id: ChatId)
        -> Result<Vec<MessageId>, BackendError>;

    async fn get_unread_message_ids(&self, chat_id: ChatId)
        -> Result<Vec<MessageId>, BackendError>;

    /// Records for the positions `start..=end` of the id sequence, in order.
    async fn get_messages_by_index_range(
        &self,
        chat_id: ChatId,
        start: usize,
        end: usize,
        marker_one: &MarkerOne,
    ) -> Result<Vec<MessageRecord>, BackendError>;

    async fn mark_seen(&self, message_ids: &[MessageId]) -> Result<(), BackendError>;

    /// Returns message id `0` when the engine could not create the message.
    async fn send_message(
        &self,
        chat_id: ChatId,
        params: SendMessageParams,
    ) -> Result<(MessageId, MessageRecord), BackendError>;

    async fn delete_message(&self, message_id: MessageId) -> Result<(), BackendError>;
}
