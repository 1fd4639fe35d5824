//! Page boundary arithmetic over a chat's ordered id sequence. Pages are slices by
//! position, never by id value.

use crate::backend::MessageId;
use crate::error::WindowError;

use super::state::{MessagePage, PageKey};

/// Context rows kept above the anchor of a centered page.
const CONTEXT_ABOVE_ANCHOR: usize = 3;

/// Inclusive range of sequence positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRange {
    pub first: usize,
    pub last: usize,
}

impl IndexRange {
    pub fn new(first: usize, last: usize) -> Self {
        Self { first, last }
    }

    pub fn len(&self) -> usize {
        self.last - self.first + 1
    }

    pub fn page_key(&self) -> PageKey {
        PageKey::new(self.first, self.last)
    }
}

/// The newest `page_size` positions. `None` for an empty sequence.
pub fn calculate_indexes_for_last_page(
    message_ids: &[MessageId],
    page_size: usize,
) -> Option<IndexRange> {
    let len = message_ids.len();
    if len == 0 {
        return None;
    }
    let first = len.saturating_sub(page_size.max(1));
    Some(IndexRange::new(first, len - 1))
}

/// A page around `middle_index`, starting a few rows above it and filled up to
/// `page_size` without leaving the sequence.
pub fn calculate_indexes_for_page_with_message_id_in_middle(
    message_ids: &[MessageId],
    middle_index: usize,
    page_size: usize,
) -> Result<IndexRange, WindowError> {
    let len = message_ids.len();
    if middle_index >= len {
        return Err(WindowError::RangeOutOfBounds {
            start: middle_index,
            end: middle_index,
            len,
        });
    }
    let page_size = page_size.max(1);
    let mut first = middle_index.saturating_sub(CONTEXT_ABOVE_ANCHOR.min(page_size - 1));
    let last = first.saturating_add(page_size - 1).min(len - 1);
    if last - first + 1 < page_size {
        first = (last + 1).saturating_sub(page_size);
    }
    Ok(IndexRange::new(first, last))
}

/// The block directly above `page`, or `None` when `page` already starts at position 0.
pub fn calculate_indexes_for_page_before(
    page: &MessagePage,
    page_size: usize,
) -> Option<IndexRange> {
    let first_on_page = page.first_message_index;
    if first_on_page == 0 {
        return None;
    }
    Some(IndexRange::new(
        first_on_page.saturating_sub(page_size.max(1)),
        first_on_page - 1,
    ))
}

/// The block directly below `page`, or `None` when `page` already ends at the newest
/// position.
pub fn calculate_indexes_for_page_after(
    page: &MessagePage,
    message_ids: &[MessageId],
    page_size: usize,
) -> Option<IndexRange> {
    let first_after = page.last_message_index + 1;
    if first_after >= message_ids.len() {
        return None;
    }
    let last_after = page
        .last_message_index
        .saturating_add(page_size.max(1))
        .min(message_ids.len() - 1);
    Some(IndexRange::new(first_after, last_after))
}

/// Clamp a possibly negative or too large position into `0..len`.
pub fn safe_message_id_index(message_index: i64, len: usize) -> usize {
    if message_index < 0 || len == 0 {
        return 0;
    }
    (message_index as usize).min(len - 1)
}
