use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::{
    BackendError, ChatId, MarkerOne, MessageId, MessageRecord, MessagingBackend,
};
use crate::error::WindowError;

use super::indexes::{calculate_indexes_for_page_with_message_id_in_middle, IndexRange};
use super::state::{MessageKey, MessageListState, MessagePage, PageKey};

/// Fetch the records for `range` and build a page from them.
pub async fn load_page_with_first_message_index<B: MessagingBackend + ?Sized>(
    backend: &B,
    chat_id: ChatId,
    message_ids: &[MessageId],
    range: IndexRange,
    marker_one: &MarkerOne,
) -> Result<Arc<MessagePage>, WindowError> {
    let len = message_ids.len();
    if range.first >= len || range.last < range.first || range.last >= len {
        return Err(WindowError::RangeOutOfBounds {
            start: range.first,
            end: range.last,
            len,
        });
    }
    let page_message_ids = message_ids[range.first..=range.last].to_vec();
    let messages = backend
        .get_messages_by_index_range(chat_id, range.first, range.last, marker_one)
        .await?;
    if messages.len() != page_message_ids.len() {
        return Err(WindowError::PageLengthMismatch {
            expected: page_message_ids.len(),
            got: messages.len(),
        });
    }
    Ok(Arc::new(MessagePage {
        key: range.page_key(),
        first_message_index: range.first,
        last_message_index: range.last,
        message_ids: page_message_ids,
        messages,
    }))
}

pub async fn load_page_with_message_index_in_middle<B: MessagingBackend + ?Sized>(
    backend: &B,
    chat_id: ChatId,
    message_ids: &[MessageId],
    middle_index: usize,
    marker_one: &MarkerOne,
    page_size: usize,
) -> Result<Arc<MessagePage>, WindowError> {
    let range =
        calculate_indexes_for_page_with_message_id_in_middle(message_ids, middle_index, page_size)?;
    load_page_with_first_message_index(backend, chat_id, message_ids, range, marker_one).await
}

/// Page map and ordering for a window holding exactly `page`.
pub fn single_page_window(
    page: Arc<MessagePage>,
) -> (BTreeMap<PageKey, Arc<MessagePage>>, Vec<PageKey>) {
    let key = page.key;
    (BTreeMap::from([(key, page)]), vec![key])
}

/// `state` without the given pages. Returns the same `Arc` when none of them is mounted.
pub fn without_pages(
    state: &Arc<MessageListState>,
    without_page_keys: &[PageKey],
) -> Arc<MessageListState> {
    if !state
        .page_ordering
        .iter()
        .any(|k| without_page_keys.contains(k))
    {
        return state.clone();
    }
    let page_ordering: Vec<PageKey> = state
        .page_ordering
        .iter()
        .filter(|k| !without_page_keys.contains(k))
        .copied()
        .collect();
    let pages = page_ordering
        .iter()
        .filter_map(|k| state.pages.get(k).map(|p| (*k, p.clone())))
        .collect();
    Arc::new(MessageListState {
        pages,
        page_ordering,
        ..(**state).clone()
    })
}

pub fn index_of_message_id(
    state: &MessageListState,
    message_id: MessageId,
    iterate_from_back: bool,
) -> Option<usize> {
    if iterate_from_back {
        state.message_ids.iter().rposition(|id| *id == message_id)
    } else {
        state.message_ids.iter().position(|id| *id == message_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLocation {
    pub page_key: PageKey,
    pub index_on_page: usize,
    pub message_index: usize,
    pub message_key: MessageKey,
}

/// Locate the mounted page holding `message_id`. With `iterate_from_back` the id sequence
/// is scanned newest first.
pub fn find_page_with_message_id(
    state: &MessageListState,
    message_id: MessageId,
    iterate_from_back: bool,
) -> Option<PageLocation> {
    let message_index = index_of_message_id(state, message_id, iterate_from_back)?;
    find_page_with_message_index(state, message_index)
}

pub fn find_page_with_message_index(
    state: &MessageListState,
    message_index: usize,
) -> Option<PageLocation> {
    let message_id = *state.message_ids.get(message_index)?;
    let page = state
        .ordered_pages()
        .find(|p| p.contains_index(message_index))?;
    Some(PageLocation {
        page_key: page.key,
        index_on_page: message_index - page.first_message_index,
        message_index,
        message_key: MessageKey {
            page_key: page.key,
            message_id,
            message_index,
        },
    })
}

/// Copy of `state` with one record replaced. `None` when the page or slot doesn't exist.
pub fn update_message(
    state: &MessageListState,
    page_key: PageKey,
    index_on_page: usize,
    updated: MessageRecord,
) -> Option<MessageListState> {
    let page = state.pages.get(&page_key)?;
    if index_on_page >= page.messages.len() {
        return None;
    }
    let mut messages = page.messages.clone();
    messages[index_on_page] = updated;
    let mut pages = state.pages.clone();
    pages.insert(
        page_key,
        Arc::new(MessagePage {
            messages,
            ..(**page).clone()
        }),
    );
    Some(MessageListState {
        pages,
        ..state.clone()
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadAndMarkerOne {
    pub unread_message_ids: Vec<MessageId>,
    pub first_unread_message_id: Option<MessageId>,
    pub marker_one: MarkerOne,
}

/// Unread ids of a chat, and `old_marker_one` extended with an "N unread" divider above the
/// first unread message (keyed by 0 when nothing is unread).
pub async fn get_unread_message_ids_and_marker_one<B: MessagingBackend + ?Sized>(
    backend: &B,
    chat_id: ChatId,
    old_marker_one: &MarkerOne,
) -> Result<UnreadAndMarkerOne, BackendError> {
    let unread_message_ids = backend.get_unread_message_ids(chat_id).await?;
    let first_unread_message_id = unread_message_ids.first().copied();
    let mut marker_one = old_marker_one.clone();
    marker_one.insert(
        first_unread_message_id.unwrap_or(0),
        unread_message_ids.len(),
    );
    Ok(UnreadAndMarkerOne {
        unread_message_ids,
        first_unread_message_id,
        marker_one,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub unread: UnreadAndMarkerOne,
    pub message_ids: Vec<MessageId>,
}

pub async fn get_unread_message_ids_marker_one_and_message_ids<
    B: MessagingBackend + ?Sized,
>(
    backend: &B,
    chat_id: ChatId,
    old_marker_one: &MarkerOne,
) -> Result<ChatSnapshot, BackendError> {
    let unread = get_unread_message_ids_and_marker_one(backend, chat_id, old_marker_one).await?;
    let message_ids = backend.get_message_id_sequence(chat_id).await?;
    Ok(ChatSnapshot {
        unread,
        message_ids,
    })
}
