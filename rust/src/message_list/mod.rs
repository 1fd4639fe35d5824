//! Message page windowing store.
//!
//! Keeps a bounded window of pages over the active chat's id sequence. Every operation is
//! a dispatch on the versioned [`Store`]; operations that replace the whole window
//! (`select_chat`, `jump_to_message`, `send_message`, `refresh`) drop their commit if a
//! dispatch started after them has already committed a window; edge loads re-check the
//! live window before committing.

pub mod helpers;
pub mod indexes;
mod state;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::{
    BackendError, ChatId, MarkerOne, MessageId, MessageState, MessagingBackend,
    SendMessageParams, DAYMARKER_MESSAGE_ID,
};
use crate::store::{
    generation_is_newer, only_dispatch_if_currently_dispatched_counter_equals_zero,
    only_set_state_if_incrementing_dispatched_counter_didnt_increase, DispatchCtx, DispatchOutcome, Snapshot, Store,
};

use helpers::*;
use indexes::*;

pub use state::{MessageKey, MessageListState, MessagePage, PageKey, PAGE_SIZE};

/// Deferred coordination steps the store schedules for after a render.
#[derive(Debug, Clone, PartialEq)]
pub enum ListAction {
    ScrollToBottomAndCheckIfWeNeedToLoadMore {
        chat_id: ChatId,
    },
    ScrollToMessageAndCheckIfWeNeedToLoadMore {
        chat_id: ChatId,
        page_key: PageKey,
        message_index: usize,
    },
    /// Put the message's top `relative_offset` px above the viewport top.
    ScrollToMessage {
        chat_id: ChatId,
        message_key: MessageKey,
        relative_offset: f64,
    },
}

impl ListAction {
    pub fn chat_id(&self) -> ChatId {
        match self {
            ListAction::ScrollToBottomAndCheckIfWeNeedToLoadMore { chat_id }
            | ListAction::ScrollToMessageAndCheckIfWeNeedToLoadMore { chat_id, .. }
            | ListAction::ScrollToMessage { chat_id, .. } => *chat_id,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            ListAction::ScrollToBottomAndCheckIfWeNeedToLoadMore { .. } => {
                "ScrollToBottomAndCheckIfWeNeedToLoadMore"
            }
            ListAction::ScrollToMessageAndCheckIfWeNeedToLoadMore { .. } => {
                "ScrollToMessageAndCheckIfWeNeedToLoadMore"
            }
            ListAction::ScrollToMessage { .. } => "ScrollToMessage",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchAfter {
    pub action: ListAction,
    pub is_layout_effect: bool,
}

impl DispatchAfter {
    pub fn layout(action: ListAction) -> Self {
        Self {
            action,
            is_layout_effect: true,
        }
    }

    pub fn effect(action: ListAction) -> Self {
        Self {
            action,
            is_layout_effect: false,
        }
    }
}

pub type ListStore = Store<MessageListState, ListAction>;
type ListCtx = DispatchCtx<MessageListState, ListAction>;

pub struct MessageListStore<B> {
    store: ListStore,
    backend: Arc<B>,
    page_size: usize,
    last_window_commit: Arc<Mutex<Option<u64>>>,
    ignore_messages_changed: Arc<AtomicUsize>,
}

impl<B> Clone for MessageListStore<B> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            backend: self.backend.clone(),
            page_size: self.page_size,
            last_window_commit: self.last_window_commit.clone(),
            ignore_messages_changed: self.ignore_messages_changed.clone(),
        }
    }
}

/// Position to focus when a chat opens on its first unread message: the row above it,
/// stepping back over day markers but staying on `page`.
fn focus_index(message_ids: &[MessageId], first_unread_index: usize, page: &MessagePage) -> usize {
    let mut focus = first_unread_index.saturating_sub(1);
    while focus > page.first_message_index && message_ids.get(focus) == Some(&DAYMARKER_MESSAGE_ID)
    {
        focus -= 1;
    }
    focus.max(page.first_message_index)
}

impl<B: MessagingBackend> MessageListStore<B> {
    pub fn new(backend: Arc<B>, page_size: usize) -> Self {
        Self {
            store: Store::new("MessageListStore", MessageListState::default()),
            backend,
            page_size: page_size.max(1),
            last_window_commit: Arc::new(Mutex::new(None)),
            ignore_messages_changed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn store(&self) -> &ListStore {
        &self.store
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn state(&self) -> Arc<MessageListState> {
        self.store.state()
    }

    pub fn snapshot(&self) -> Snapshot<MessageListState> {
        self.store.snapshot()
    }

    /// Consume one pending "ignore the next messages-changed event" token.
    pub fn take_ignored_messages_changed(&self) -> bool {
        self.ignore_messages_changed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn ignored_messages_changed(&self) -> usize {
        self.ignore_messages_changed.load(Ordering::SeqCst)
    }

    /// Replace the whole window unless a dispatch started after this one already committed
    /// a window. The follow-up action is queued only once the state has landed.
    fn commit_window(&self, ctx: &ListCtx, next: MessageListState, action: ListAction) -> DispatchOutcome {
        let mut last_committed = match self.last_window_commit.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        if let Some(last) = *last_committed {
            if generation_is_newer(last, ctx.generation()) {
                tracing::debug!(
                    dispatch = ctx.name(),
                    generation = ctx.generation(),
                    committed = last,
                    "window replaced by a newer dispatch, dropping"
                );
                ctx.mark_stale();
                return DispatchOutcome::Stale;
            }
        }
        let outcome = ctx.set_state(Arc::new(next));
        if outcome.is_committed() {
            *last_committed = Some(ctx.generation());
            ctx.push_layout_effect(action);
        }
        outcome
    }

    fn dispatches_after(&self, ctx: &ListCtx, dispatches_after: Vec<DispatchAfter>) {
        for d in dispatches_after {
            if d.is_layout_effect {
                ctx.push_layout_effect(d.action);
            } else {
                ctx.push_effect(d.action);
            }
        }
    }

    pub async fn select_chat(&self, chat_id: ChatId) -> DispatchOutcome {
        let this = self.clone();
        self.store
            .dispatch(
                "selectChat",
                move |ctx| async move { this.select_chat_effect(ctx, chat_id).await },
                None,
                None,
            )
            .await
    }

    async fn select_chat_effect(&self, ctx: ListCtx, chat_id: ChatId) -> anyhow::Result<()> {
        tracing::info!(chat_id, "selecting chat");
        let ChatSnapshot {
            unread,
            message_ids,
        } = get_unread_message_ids_marker_one_and_message_ids(
            &*self.backend,
            chat_id,
            &MarkerOne::new(),
        )
        .await?;
        let message_ids = Arc::new(message_ids);

        let empty = MessageListState {
            chat_id: Some(chat_id),
            message_ids: message_ids.clone(),
            marker_one: unread.marker_one.clone(),
            unread_message_ids: unread.unread_message_ids.clone(),
            ..MessageListState::default()
        };
        let Some(last_page) = calculate_indexes_for_last_page(&message_ids, self.page_size) else {
            self.commit_window(
                &ctx,
                empty,
                ListAction::ScrollToBottomAndCheckIfWeNeedToLoadMore { chat_id },
            );
            return Ok(());
        };

        let first_unread_index = unread
            .first_unread_message_id
            .and_then(|id| message_ids.iter().position(|m| *m == id));
        let (page, action) = match first_unread_index {
            Some(first_unread_index) => {
                let page = load_page_with_message_index_in_middle(
                    &*self.backend,
                    chat_id,
                    &message_ids,
                    first_unread_index,
                    &unread.marker_one,
                    self.page_size,
                )
                .await?;
                let message_index = focus_index(&message_ids, first_unread_index, &page);
                let action = ListAction::ScrollToMessageAndCheckIfWeNeedToLoadMore {
                    chat_id,
                    page_key: page.key,
                    message_index,
                };
                (page, action)
            }
            None => {
                let page = load_page_with_first_message_index(
                    &*self.backend,
                    chat_id,
                    &message_ids,
                    last_page,
                    &unread.marker_one,
                )
                .await?;
                (
                    page,
                    ListAction::ScrollToBottomAndCheckIfWeNeedToLoadMore { chat_id },
                )
            }
        };

        let (pages, page_ordering) = single_page_window(page);
        self.commit_window(
            &ctx,
            MessageListState {
                pages,
                page_ordering,
                ..empty
            },
            action,
        );
        Ok(())
    }

    pub async fn jump_to_message(&self, chat_id: ChatId, message_id: MessageId) -> DispatchOutcome {
        let this = self.clone();
        self.store
            .dispatch(
                "jumpToMessage",
                move |ctx| async move { this.jump_to_message_effect(ctx, chat_id, message_id).await },
                None,
                None,
            )
            .await
    }

    async fn jump_to_message_effect(
        &self,
        ctx: ListCtx,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> anyhow::Result<()> {
        tracing::debug!(chat_id, message_id, "jump to message");
        let old_marker_one = if ctx.state().is_chat(chat_id) {
            ctx.state().marker_one.clone()
        } else {
            MarkerOne::new()
        };
        let ChatSnapshot {
            unread,
            message_ids,
        } = get_unread_message_ids_marker_one_and_message_ids(
            &*self.backend,
            chat_id,
            &old_marker_one,
        )
        .await?;
        let jump_index = message_ids
            .iter()
            .position(|id| *id == message_id)
            .ok_or(BackendError::MessageNotFound(message_id))?;

        let page = load_page_with_message_index_in_middle(
            &*self.backend,
            chat_id,
            &message_ids,
            jump_index,
            &unread.marker_one,
            self.page_size,
        )
        .await?;
        let action = ListAction::ScrollToMessageAndCheckIfWeNeedToLoadMore {
            chat_id,
            page_key: page.key,
            message_index: jump_index,
        };
        let (pages, page_ordering) = single_page_window(page);
        self.commit_window(
            &ctx,
            MessageListState {
                pages,
                page_ordering,
                chat_id: Some(chat_id),
                message_ids: Arc::new(message_ids),
                marker_one: unread.marker_one,
                unread_message_ids: unread.unread_message_ids,
            },
            action,
        );
        Ok(())
    }

    /// Prepend the block above the first mounted page, evicting `without_page_keys`.
    /// Refused while any other dispatch is in flight.
    pub async fn load_page_before(
        &self,
        chat_id: ChatId,
        without_page_keys: Vec<PageKey>,
        dispatches_after: Vec<DispatchAfter>,
    ) -> DispatchOutcome {
        let this = self.clone();
        self.store
            .dispatch(
                "loadPageBefore",
                move |ctx| async move {
                    this.load_adjacent_page(ctx, chat_id, Edge::Top, without_page_keys, dispatches_after)
                        .await
                },
                Some(only_dispatch_if_currently_dispatched_counter_equals_zero),
                None,
            )
            .await
    }

    /// Append the block below the last mounted page, evicting `without_page_keys`.
    /// Refused while any other dispatch is in flight.
    pub async fn load_page_after(
        &self,
        chat_id: ChatId,
        without_page_keys: Vec<PageKey>,
        dispatches_after: Vec<DispatchAfter>,
    ) -> DispatchOutcome {
        let this = self.clone();
        self.store
            .dispatch(
                "loadPageAfter",
                move |ctx| async move {
                    this.load_adjacent_page(
                        ctx,
                        chat_id,
                        Edge::Bottom,
                        without_page_keys,
                        dispatches_after,
                    )
                    .await
                },
                Some(only_dispatch_if_currently_dispatched_counter_equals_zero),
                None,
            )
            .await
    }

    async fn load_adjacent_page(
        &self,
        ctx: ListCtx,
        chat_id: ChatId,
        edge: Edge,
        without_page_keys: Vec<PageKey>,
        dispatches_after: Vec<DispatchAfter>,
    ) -> anyhow::Result<()> {
        let state = ctx.state().clone();
        if !state.is_chat(chat_id) {
            tracing::debug!(dispatch = ctx.name(), chat_id, live = ?state.chat_id, "chat changed, returning");
            return Ok(());
        }
        let edge_page = match edge {
            Edge::Top => state.first_page(),
            Edge::Bottom => state.last_page(),
        };
        let Some(edge_page) = edge_page.cloned() else {
            tracing::debug!(dispatch = ctx.name(), chat_id, "no mounted page, returning");
            return Ok(());
        };
        let range = match edge {
            Edge::Top => calculate_indexes_for_page_before(&edge_page, self.page_size),
            Edge::Bottom => {
                calculate_indexes_for_page_after(&edge_page, &state.message_ids, self.page_size)
            }
        };
        let Some(range) = range else {
            tracing::debug!(dispatch = ctx.name(), chat_id, page_key = %edge_page.key, "no more pages, returning");
            return Ok(());
        };
        tracing::debug!(dispatch = ctx.name(), chat_id, first = range.first, last = range.last, "loading page");

        let page = load_page_with_first_message_index(
            &*self.backend,
            chat_id,
            &state.message_ids,
            range,
            &state.marker_one,
        )
        .await?;

        let latest = ctx.current_snapshot();
        let live_edge = match edge {
            Edge::Top => latest.state.page_ordering.first(),
            Edge::Bottom => latest.state.page_ordering.last(),
        };
        if !latest.state.is_chat(chat_id) {
            tracing::debug!(dispatch = ctx.name(), chat_id, live = ?latest.state.chat_id, "chat changed while loading, dropping page");
            return Ok(());
        }
        if live_edge != Some(&edge_page.key) || range.last >= latest.state.message_ids.len() {
            tracing::debug!(dispatch = ctx.name(), chat_id, "window moved while loading, dropping page");
            return Ok(());
        }

        let modified = without_pages(&latest.state, &without_page_keys);
        let mut next = (*modified).clone();
        match edge {
            Edge::Top => next.page_ordering.insert(0, page.key),
            Edge::Bottom => next.page_ordering.push(page.key),
        }
        next.pages.insert(page.key, page);

        self.dispatches_after(&ctx, dispatches_after);
        ctx.set_state_from(&latest, Arc::new(next));
        Ok(())
    }

    pub fn can_load_page_before(&self, page_key: PageKey) -> bool {
        self.state()
            .pages
            .get(&page_key)
            .is_some_and(|p| p.first_message_index > 0)
    }

    pub fn can_load_page_after(&self, page_key: PageKey) -> bool {
        let state = self.state();
        state
            .pages
            .get(&page_key)
            .is_some_and(|p| p.last_message_index + 1 < state.message_ids.len())
    }

    pub async fn remove_page(&self, page_key: PageKey) -> DispatchOutcome {
        self.store
            .dispatch(
                "removePage",
                move |ctx| async move {
                    ctx.set_state(without_pages(ctx.state(), &[page_key]));
                    Ok(())
                },
                None,
                None,
            )
            .await
    }

    /// Send through the backend, then reload the newest page and stick to the bottom.
    pub async fn send_message(&self, chat_id: ChatId, params: SendMessageParams) -> DispatchOutcome {
        let this = self.clone();
        self.store
            .dispatch(
                "sendMessage",
                move |ctx| async move { this.send_message_effect(ctx, chat_id, params).await },
                None,
                None,
            )
            .await
    }

    async fn send_message_effect(
        &self,
        ctx: ListCtx,
        chat_id: ChatId,
        params: SendMessageParams,
    ) -> anyhow::Result<()> {
        self.ignore_messages_changed.fetch_add(1, Ordering::SeqCst);
        let (message_id, _record) = match self.backend.send_message(chat_id, params).await {
            Ok(sent) => sent,
            Err(e) => {
                self.take_ignored_messages_changed();
                return Err(e.into());
            }
        };

        if !ctx.current().is_chat(chat_id) {
            tracing::debug!(chat_id, "sendMessage: chat changed, returning");
            return Ok(());
        }
        if message_id == 0 {
            tracing::warn!(chat_id, "sendMessage: backend could not create the message");
            return Ok(());
        }

        let marker_one = ctx.state().marker_one.clone();
        let ChatSnapshot {
            unread,
            message_ids,
        } = get_unread_message_ids_marker_one_and_message_ids(&*self.backend, chat_id, &marker_one)
            .await?;
        let range = calculate_indexes_for_last_page(&message_ids, self.page_size)
            .ok_or(BackendError::MessageNotFound(message_id))?;
        let page = load_page_with_first_message_index(
            &*self.backend,
            chat_id,
            &message_ids,
            range,
            &unread.marker_one,
        )
        .await?;

        let (pages, page_ordering) = single_page_window(page);
        self.commit_window(
            &ctx,
            MessageListState {
                pages,
                page_ordering,
                chat_id: Some(chat_id),
                message_ids: Arc::new(message_ids),
                marker_one,
                unread_message_ids: unread.unread_message_ids,
            },
            ListAction::ScrollToBottomAndCheckIfWeNeedToLoadMore { chat_id },
        );
        Ok(())
    }

    /// Rebuild the window from a new id sequence, centered on `anchor_index`. With a
    /// `relative_scroll_position` the anchor message is restored to that offset, otherwise
    /// the view sticks to the bottom.
    pub async fn refresh(
        &self,
        chat_id: ChatId,
        message_ids: Vec<MessageId>,
        anchor_index: usize,
        relative_scroll_position: Option<f64>,
    ) -> DispatchOutcome {
        let this = self.clone();
        self.store
            .dispatch(
                "refresh",
                move |ctx| async move {
                    this.refresh_effect(ctx, chat_id, message_ids, anchor_index, relative_scroll_position)
                        .await
                },
                None,
                Some(only_set_state_if_incrementing_dispatched_counter_didnt_increase),
            )
            .await
    }

    async fn refresh_effect(
        &self,
        ctx: ListCtx,
        chat_id: ChatId,
        message_ids: Vec<MessageId>,
        anchor_index: usize,
        relative_scroll_position: Option<f64>,
    ) -> anyhow::Result<()> {
        let state = ctx.state().clone();
        if !state.is_chat(chat_id) {
            tracing::debug!(chat_id, "refresh: chat changed, returning");
            return Ok(());
        }
        if ctx.is_superseded() {
            tracing::debug!(chat_id, "refresh: superseded, returning");
            return Ok(());
        }

        let unread =
            get_unread_message_ids_and_marker_one(&*self.backend, chat_id, &state.marker_one)
                .await?;
        if ctx.is_superseded() {
            tracing::debug!(chat_id, "refresh: superseded, returning");
            return Ok(());
        }

        let message_ids = Arc::new(message_ids);
        let anchor_index = anchor_index.min(message_ids.len().saturating_sub(1));
        let mut next = MessageListState {
            chat_id: Some(chat_id),
            message_ids: message_ids.clone(),
            marker_one: unread.marker_one.clone(),
            unread_message_ids: unread.unread_message_ids,
            ..MessageListState::default()
        };
        if !message_ids.is_empty() {
            let page = load_page_with_message_index_in_middle(
                &*self.backend,
                chat_id,
                &message_ids,
                anchor_index,
                &unread.marker_one,
                self.page_size,
            )
            .await?;
            if ctx.is_superseded() {
                tracing::debug!(chat_id, "refresh: superseded, returning");
                return Ok(());
            }
            let (pages, page_ordering) = single_page_window(page);
            next.pages = pages;
            next.page_ordering = page_ordering;
        }

        let action = match relative_scroll_position
            .zip(find_page_with_message_index(&next, anchor_index))
        {
            Some((relative_offset, location)) => ListAction::ScrollToMessage {
                chat_id,
                message_key: location.message_key,
                relative_offset,
            },
            None => ListAction::ScrollToBottomAndCheckIfWeNeedToLoadMore { chat_id },
        };
        self.commit_window(&ctx, next, action);
        Ok(())
    }

    pub async fn on_message_delivered(&self, chat_id: ChatId, message_id: MessageId) -> DispatchOutcome {
        self.patch_message_state("onMessageDelivered", chat_id, message_id, MessageState::OutDelivered)
            .await
    }

    pub async fn on_message_failed(&self, chat_id: ChatId, message_id: MessageId) -> DispatchOutcome {
        self.patch_message_state("onMessageFailed", chat_id, message_id, MessageState::OutFailed)
            .await
    }

    pub async fn on_message_read(&self, chat_id: ChatId, message_id: MessageId) -> DispatchOutcome {
        self.patch_message_state("onMessageRead", chat_id, message_id, MessageState::OutMdnRcvd)
            .await
    }

    async fn patch_message_state(
        &self,
        name: &'static str,
        chat_id: ChatId,
        message_id: MessageId,
        new_state: MessageState,
    ) -> DispatchOutcome {
        self.store
            .dispatch(
                name,
                move |ctx| async move {
                    let state = ctx.state();
                    if !state.is_chat(chat_id) {
                        tracing::debug!(dispatch = name, chat_id, live = ?state.chat_id, "chat doesn't match, returning");
                        return Ok(());
                    }
                    let Some(location) = find_page_with_message_id(state, message_id, true) else {
                        tracing::debug!(dispatch = name, message_id, "message not in any mounted page, returning");
                        return Ok(());
                    };
                    let patched = state
                        .pages
                        .get(&location.page_key)
                        .and_then(|p| p.messages.get(location.index_on_page))
                        .and_then(|record| record.with_state(new_state));
                    let Some(next) = patched.and_then(|record| {
                        update_message(state, location.page_key, location.index_on_page, record)
                    }) else {
                        return Ok(());
                    };
                    ctx.set_state_from(ctx.snapshot(), Arc::new(next));
                    Ok(())
                },
                None,
                None,
            )
            .await
    }

    /// Mark ids seen in the backend, then drop them from the unread set of whatever state
    /// is live once the call resolves.
    pub async fn mark_messages_seen(&self, chat_id: ChatId, message_ids: Vec<MessageId>) -> DispatchOutcome {
        let backend = self.backend.clone();
        self.store
            .dispatch(
                "markMessagesSeen",
                move |ctx| async move {
                    let state = ctx.state().clone();
                    if !state.is_chat(chat_id) {
                        tracing::debug!(chat_id, live = ?state.chat_id, "markMessagesSeen: chat doesn't match, returning");
                        return Ok(());
                    }
                    let any_mounted = message_ids
                        .iter()
                        .any(|id| find_page_with_message_id(&state, *id, true).is_some());

                    backend.mark_seen(&message_ids).await?;
                    if !any_mounted {
                        return Ok(());
                    }

                    let latest = ctx.current_snapshot();
                    let unread_message_ids: Vec<MessageId> = latest
                        .state
                        .unread_message_ids
                        .iter()
                        .filter(|id| !message_ids.contains(id))
                        .copied()
                        .collect();
                    if unread_message_ids.len() == latest.state.unread_message_ids.len() {
                        return Ok(());
                    }
                    ctx.set_state_from(
                        &latest,
                        Arc::new(MessageListState {
                            unread_message_ids,
                            ..(*latest.state).clone()
                        }),
                    );
                    Ok(())
                },
                None,
                None,
            )
            .await
    }

    /// Delete through the backend. The window follows through the messages-changed event.
    pub async fn delete_message(&self, message_id: MessageId) -> DispatchOutcome {
        let backend = self.backend.clone();
        self.store
            .dispatch(
                "deleteMessage",
                move |_ctx| async move {
                    tracing::debug!(message_id, "deleting message");
                    backend.delete_message(message_id).await?;
                    Ok(())
                },
                None,
                None,
            )
            .await
    }

    /// Pick up messages appended to the active chat. Commits only when the new sequence
    /// extends the current one, so mounted pages stay valid.
    pub async fn sync_message_ids(&self, chat_id: ChatId) -> DispatchOutcome {
        let backend = self.backend.clone();
        self.store
            .dispatch(
                "syncMessageIds",
                move |ctx| async move {
                    if !ctx.state().is_chat(chat_id) {
                        return Ok(());
                    }
                    let unread_message_ids = backend.get_unread_message_ids(chat_id).await?;
                    let message_ids = backend.get_message_id_sequence(chat_id).await?;

                    let latest = ctx.current_snapshot();
                    if !latest.state.is_chat(chat_id)
                        || !message_ids.starts_with(&latest.state.message_ids)
                    {
                        tracing::debug!(chat_id, "syncMessageIds: sequence not an extension, returning");
                        return Ok(());
                    }
                    if message_ids.len() == latest.state.message_ids.len()
                        && unread_message_ids == latest.state.unread_message_ids
                    {
                        return Ok(());
                    }
                    ctx.set_state_from(
                        &latest,
                        Arc::new(MessageListState {
                            message_ids: Arc::new(message_ids),
                            unread_message_ids,
                            ..(*latest.state).clone()
                        }),
                    );
                    Ok(())
                },
                None,
                None,
            )
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Top,
    Bottom,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryBackend, MessageRecord};
    use crate::store::RenderBinding;

    fn setup(len: usize) -> (Arc<InMemoryBackend>, Vec<MessageId>, MessageListStore<InMemoryBackend>) {
        let backend = Arc::new(InMemoryBackend::new());
        let ids = backend.seed_chat(1, len);
        let store = MessageListStore::new(backend.clone(), PAGE_SIZE);
        (backend, ids, store)
    }

    #[tokio::test]
    async fn select_empty_chat_commits_empty_window() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.create_chat(4);
        let store = MessageListStore::new(backend, PAGE_SIZE);
        assert!(store.select_chat(4).await.is_committed());
        let state = store.state();
        assert_eq!(state.chat_id, Some(4));
        assert!(state.page_ordering.is_empty());
        assert!(state.message_ids.is_empty());
    }

    #[tokio::test]
    async fn select_unknown_chat_fails_without_touching_state() {
        let (_backend, _ids, store) = setup(5);
        let before = store.state();
        assert_eq!(store.select_chat(99).await, DispatchOutcome::Failed);
        assert!(Arc::ptr_eq(&before, &store.state()));
        assert_eq!(store.store().currently_dispatched_counter(), 0);
    }

    #[tokio::test]
    async fn focus_steps_back_over_day_markers() {
        let backend = Arc::new(InMemoryBackend::new().with_day_markers(true));
        // two messages on day one, then a new day starting with an unread message
        backend.add_outgoing(1, "a", 10);
        backend.add_outgoing(1, "b", 20);
        let unread = backend.add_incoming(1, "c", 86_400 + 10);
        let store = MessageListStore::new(backend.clone(), PAGE_SIZE);
        let binding = RenderBinding::new(store.store());

        store.select_chat(1).await;
        let state = store.state();
        assert_eq!(*state.message_ids, vec![9, 10, 11, 9, unread]);
        assert_eq!(
            binding.drain_layout_effects(),
            vec![ListAction::ScrollToMessageAndCheckIfWeNeedToLoadMore {
                chat_id: 1,
                page_key: PageKey::new(0, 4),
                message_index: 2,
            }]
        );
    }

    #[tokio::test]
    async fn load_page_before_prepends_and_evicts() {
        let (_backend, _ids, store) = setup(70);
        store.select_chat(1).await;
        assert_eq!(store.state().page_ordering, vec![PageKey::new(50, 69)]);

        let outcome = store
            .load_page_before(
                1,
                Vec::new(),
                vec![DispatchAfter::layout(
                    ListAction::ScrollToBottomAndCheckIfWeNeedToLoadMore { chat_id: 1 },
                )],
            )
            .await;
        assert!(outcome.is_committed());
        assert_eq!(
            store.state().page_ordering,
            vec![PageKey::new(30, 49), PageKey::new(50, 69)]
        );

        store
            .load_page_before(1, vec![PageKey::new(50, 69)], Vec::new())
            .await;
        let state = store.state();
        assert_eq!(
            state.page_ordering,
            vec![PageKey::new(10, 29), PageKey::new(30, 49)]
        );
        assert!(!state.pages.contains_key(&PageKey::new(50, 69)));
        assert!(store.can_load_page_before(PageKey::new(10, 29)));
        assert!(store.can_load_page_after(PageKey::new(30, 49)));

        store.load_page_before(1, Vec::new(), Vec::new()).await;
        assert!(!store.can_load_page_before(PageKey::new(0, 9)));
        assert_eq!(
            store.load_page_before(1, Vec::new(), Vec::new()).await,
            DispatchOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn status_events_patch_mounted_messages_only() {
        let (backend, ids, store) = setup(30);
        store.select_chat(1).await;
        let newest = *ids.last().expect("seeded");

        assert!(store.on_message_read(1, newest).await.is_committed());
        let loc = find_page_with_message_id(&store.state(), newest, true).expect("mounted");
        let state = store.state();
        let record = &state.pages[&loc.page_key].messages[loc.index_on_page];
        assert_eq!(record.message().map(|m| m.state), Some(MessageState::OutMdnRcvd));

        let before = store.state();
        assert_eq!(store.on_message_failed(1, ids[0]).await, DispatchOutcome::Unchanged);
        assert_eq!(store.on_message_delivered(2, newest).await, DispatchOutcome::Unchanged);
        assert!(Arc::ptr_eq(&before, &store.state()));
        assert!(!backend.fetch_log().is_empty());
    }

    #[tokio::test]
    async fn mark_seen_updates_unread_set() {
        let (backend, ids, store) = setup(10);
        backend.mark_unread(&ids[8..]);
        store.select_chat(1).await;
        assert_eq!(store.state().unread_message_ids, vec![ids[8]]);

        assert!(store.mark_messages_seen(1, vec![ids[8]]).await.is_committed());
        assert!(store.state().unread_message_ids.is_empty());
        assert_eq!(backend.seen_log(), vec![vec![ids[8]]]);
    }

    #[tokio::test]
    async fn send_reloads_newest_page_and_failed_send_is_a_noop() {
        let (backend, _ids, store) = setup(25);
        let binding = RenderBinding::new(store.store());
        store.select_chat(1).await;
        binding.drain_layout_effects();
        binding.drain_effects();

        assert!(store.send_message(1, SendMessageParams::text("hello")).await.is_committed());
        let state = store.state();
        assert_eq!(state.message_ids.len(), 26);
        assert_eq!(state.page_ordering, vec![PageKey::new(6, 25)]);
        let newest = state.last_page().and_then(|p| p.messages.last()).and_then(MessageRecord::message);
        assert_eq!(newest.map(|m| m.text.as_str()), Some("hello"));
        assert_eq!(store.ignored_messages_changed(), 1);
        assert!(store.take_ignored_messages_changed());
        assert!(!store.take_ignored_messages_changed());
        binding.drain_effects();

        backend.fail_sends_in(1);
        let before = store.state();
        assert_eq!(
            store.send_message(1, SendMessageParams::text("nope")).await,
            DispatchOutcome::Unchanged
        );
        assert!(Arc::ptr_eq(&before, &store.state()));
    }

    #[tokio::test]
    async fn refresh_restores_anchor_with_offset() {
        let (backend, ids, store) = setup(40);
        let binding = RenderBinding::new(store.store());
        store.select_chat(1).await;
        binding.drain_layout_effects();
        binding.drain_effects();

        backend.delete_message(ids[5]).await.expect("delete");
        let new_ids = backend.get_message_id_sequence(1).await.expect("ids");
        assert!(store.refresh(1, new_ids, 24, Some(-12.0)).await.is_committed());

        let state = store.state();
        assert_eq!(state.page_ordering, vec![PageKey::new(19, 38)]);
        let actions = binding.drain_layout_effects();
        assert!(matches!(
            actions.as_slice(),
            [ListAction::ScrollToMessage { message_key, relative_offset, .. }]
                if message_key.message_index == 24 && *relative_offset == -12.0
        ));
    }

    #[tokio::test]
    async fn remove_page_and_sync_ids() {
        let (backend, _ids, store) = setup(30);
        store.select_chat(1).await;
        store.load_page_before(1, Vec::new(), Vec::new()).await;
        assert_eq!(store.state().page_ordering.len(), 2);

        assert!(store.remove_page(PageKey::new(0, 9)).await.is_committed());
        assert_eq!(store.state().page_ordering, vec![PageKey::new(10, 29)]);

        let incoming = backend.receive(1, "ping");
        assert!(store.sync_message_ids(1).await.is_committed());
        let state = store.state();
        assert_eq!(state.message_ids.last(), Some(&incoming));
        assert_eq!(state.unread_message_ids, vec![incoming]);
        assert_eq!(store.sync_message_ids(1).await, DispatchOutcome::Unchanged);
    }

    #[tokio::test]
    async fn failed_send_does_not_drop_a_parked_jump() {
        let (backend, ids, store) = setup(100);
        store.select_chat(1).await;
        backend.fail_sends_in(1);

        let gate = backend.hold_fetches();
        let send = async {
            while gate.waiting() == 0 {
                tokio::task::yield_now().await;
            }
            backend.open_fetches();
            let outcome = store.send_message(1, SendMessageParams::text("lost")).await;
            gate.release(1);
            outcome
        };
        let (jump, send) = tokio::join!(store.jump_to_message(1, ids[10]), send);

        assert_eq!(send, DispatchOutcome::Unchanged);
        assert_eq!(jump, DispatchOutcome::Committed);
        assert_eq!(store.state().page_ordering, vec![PageKey::new(7, 26)]);
    }

    #[tokio::test]
    async fn older_window_loses_to_a_newer_commit_without_queueing_its_action() {
        let (backend, _ids, store) = setup(40);
        backend.seed_chat(2, 15);
        let binding = RenderBinding::new(store.store());

        let gate = backend.hold_fetches();
        let switch = async {
            while gate.waiting() == 0 {
                tokio::task::yield_now().await;
            }
            backend.open_fetches();
            let outcome = store.select_chat(2).await;
            let actions = binding.drain_layout_effects();
            gate.release(1);
            (outcome, actions)
        };
        let (first, (second, actions)) = tokio::join!(store.select_chat(1), switch);

        assert_eq!(second, DispatchOutcome::Committed);
        assert_eq!(first, DispatchOutcome::Stale);
        assert!(matches!(actions.as_slice(), [action] if action.chat_id() == 2));
        assert!(binding.drain_layout_effects().is_empty());
        assert_eq!(store.state().chat_id, Some(2));
    }

    #[tokio::test]
    async fn refresh_gives_way_to_a_dispatch_started_during_its_fetch() {
        let (backend, ids, store) = setup(40);
        let binding = RenderBinding::new(store.store());
        store.select_chat(1).await;
        binding.drain_layout_effects();
        binding.drain_effects();
        let newest = *ids.last().expect("seeded");
        let message_ids = backend.get_message_id_sequence(1).await.expect("ids");

        let gate = backend.hold_fetches();
        let patch = async {
            while gate.waiting() == 0 {
                tokio::task::yield_now().await;
            }
            let outcome = store.on_message_read(1, newest).await;
            gate.release(1);
            outcome
        };
        let (refresh, patched) =
            tokio::join!(store.refresh(1, message_ids, 10, Some(0.0)), patch);

        assert_eq!(patched, DispatchOutcome::Committed);
        assert_eq!(refresh, DispatchOutcome::Unchanged);
        let state = store.state();
        assert_eq!(state.message_ids.len(), 40);
        assert_eq!(state.page_ordering, vec![PageKey::new(20, 39)]);
        assert!(binding.drain_layout_effects().is_empty());
    }
}
