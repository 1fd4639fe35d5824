use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type ChatId = u32;
pub type MessageId = u32;

/// Ids up to this value are engine sentinels rather than real messages.
pub const LAST_SPECIAL_MESSAGE_ID: MessageId = 9;
/// Sentinel id the engine places in a chat's id sequence where a new day starts.
/// It can appear many times in one sequence.
pub const DAYMARKER_MESSAGE_ID: MessageId = 9;

/// Message id -> unread count, rendered as an "N unread" divider above that message.
pub type MarkerOne = BTreeMap<MessageId, usize>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    InFresh,
    InNoticed,
    InSeen,
    OutPreparing,
    OutDraft,
    OutPending,
    OutFailed,
    OutDelivered,
    OutMdnRcvd,
}

impl MessageState {
    pub fn is_unread(self) -> bool {
        matches!(self, MessageState::InFresh | MessageState::InNoticed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub from_id: u32,
    pub text: String,
    pub timestamp: i64,
    pub direction: Direction,
    pub state: MessageState,
    pub quote_message_id: Option<MessageId>,
}

/// One entry of a chat's id sequence as delivered by the messaging engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageRecord {
    DayMarker { timestamp: i64 },
    Message(Message),
}

impl MessageRecord {
    pub fn message(&self) -> Option<&Message> {
        match self {
            MessageRecord::Message(m) => Some(m),
            MessageRecord::DayMarker { .. } => None,
        }
    }

    /// Copy of this record with a new delivery state. Day markers carry no state.
    pub fn with_state(&self, state: MessageState) -> Option<MessageRecord> {
        let m = self.message()?;
        Some(MessageRecord::Message(Message {
            state,
            ..m.clone()
        }))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageParams {
    pub text: String,
    pub file: Option<String>,
    pub quote_message_id: Option<MessageId>,
}

impl SendMessageParams {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Change notifications pushed by the messaging engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BackendEvent {
    MessageDelivered {
        chat_id: ChatId,
        message_id: MessageId,
    },
    MessageFailed {
        chat_id: ChatId,
        message_id: MessageId,
    },
    MessageRead {
        chat_id: ChatId,
        message_id: MessageId,
    },
    MessagesChanged {
        chat_id: ChatId,
    },
    IncomingMessage {
        chat_id: ChatId,
        message_id: MessageId,
    },
}

impl BackendEvent {
    pub fn chat_id(&self) -> ChatId {
        match self {
            BackendEvent::MessageDelivered { chat_id, .. }
            | BackendEvent::MessageFailed { chat_id, .. }
            | BackendEvent::MessageRead { chat_id, .. }
            | BackendEvent::MessagesChanged { chat_id }
            | BackendEvent::IncomingMessage { chat_id, .. } => *chat_id,
        }
    }

    /// Log-safe event tag.
    pub fn tag(&self) -> &'static str {
        match self {
            BackendEvent::MessageDelivered { .. } => "MessageDelivered",
            BackendEvent::MessageFailed { .. } => "MessageFailed",
            BackendEvent::MessageRead { .. } => "MessageRead",
            BackendEvent::MessagesChanged { .. } => "MessagesChanged",
            BackendEvent::IncomingMessage { .. } => "IncomingMessage",
        }
    }
}
