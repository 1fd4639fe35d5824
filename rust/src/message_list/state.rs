use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::backend::{ChatId, MarkerOne, MessageId, MessageRecord};
use crate::error::WindowError;

pub const PAGE_SIZE: usize = 20;

/// Identifies a page by the sequence positions it covers. Renders as `page-{first}-{last}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageKey {
    pub first_index: usize,
    pub last_index: usize,
}

impl PageKey {
    pub fn new(first_index: usize, last_index: usize) -> Self {
        Self {
            first_index,
            last_index,
        }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page-{}-{}", self.first_index, self.last_index)
    }
}

impl FromStr for PageKey {
    type Err = WindowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WindowError::InvalidPageKey(s.to_string());
        let mut parts = s.split('-');
        if parts.next() != Some("page") {
            return Err(invalid());
        }
        let first_index = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let last_index = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        if parts.next().is_some() || last_index < first_index {
            return Err(invalid());
        }
        Ok(Self::new(first_index, last_index))
    }
}

/// Identifies one rendered message. Renders as `{page_key}-{message_id}-{message_index}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub page_key: PageKey,
    pub message_id: MessageId,
    pub message_index: usize,
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.page_key, self.message_id, self.message_index)
    }
}

impl FromStr for MessageKey {
    type Err = WindowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WindowError::InvalidMessageKey(s.to_string());
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 5 || parts[0] != "page" {
            return Err(invalid());
        }
        let page_key = PageKey::from_str(&parts[..3].join("-")).map_err(|_| invalid())?;
        let message_id = parts[3].parse().map_err(|_| invalid())?;
        let message_index = parts[4].parse().map_err(|_| invalid())?;
        Ok(Self {
            page_key,
            message_id,
            message_index,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePage {
    pub key: PageKey,
    pub first_message_index: usize,
    pub last_message_index: usize,
    pub message_ids: Vec<MessageId>,
    pub messages: Vec<MessageRecord>,
}

impl MessagePage {
    pub fn len(&self) -> usize {
        self.message_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.message_ids.is_empty()
    }

    pub fn contains_index(&self, message_index: usize) -> bool {
        (self.first_message_index..=self.last_message_index).contains(&message_index)
    }

    pub fn message_key(&self, index_on_page: usize) -> Option<MessageKey> {
        let message_id = *self.message_ids.get(index_on_page)?;
        Some(MessageKey {
            page_key: self.key,
            message_id,
            message_index: self.first_message_index + index_on_page,
        })
    }

    pub fn message_keys(&self) -> impl Iterator<Item = MessageKey> + '_ {
        (0..self.len()).filter_map(|i| self.message_key(i))
    }
}

/// Window over the active chat. Replaced wholesale on every commit, never mutated in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageListState {
    pub pages: BTreeMap<PageKey, Arc<MessagePage>>,
    pub page_ordering: Vec<PageKey>,
    /// `None` until a chat is selected.
    pub chat_id: Option<ChatId>,
    pub message_ids: Arc<Vec<MessageId>>,
    pub marker_one: MarkerOne,
    pub unread_message_ids: Vec<MessageId>,
}

impl MessageListState {
    pub fn is_chat(&self, chat_id: ChatId) -> bool {
        self.chat_id == Some(chat_id)
    }

    pub fn first_page(&self) -> Option<&Arc<MessagePage>> {
        self.page_ordering.first().and_then(|k| self.pages.get(k))
    }

    pub fn last_page(&self) -> Option<&Arc<MessagePage>> {
        self.page_ordering.last().and_then(|k| self.pages.get(k))
    }

    /// Mounted pages in display order.
    pub fn ordered_pages(&self) -> impl Iterator<Item = &Arc<MessagePage>> + '_ {
        self.page_ordering.iter().filter_map(|k| self.pages.get(k))
    }

    pub fn mounted_len(&self) -> usize {
        self.ordered_pages().map(|p| p.len()).sum()
    }
}
