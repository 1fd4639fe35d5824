//! Scroll/effect coordination.
//!
//! Runs the deferred [`ListAction`]s after the viewport has laid out a commit, decides
//! when to extend the window at either edge and restores scroll anchors. Loops that
//! chain page loads are bounded by `max_load_rounds` and stop as soon as the window covers
//! the viewport or no adjacent page exists.

use crate::backend::{ChatId, MessagingBackend, LAST_SPECIAL_MESSAGE_ID};
use crate::config::AppConfig;
use crate::message_list::helpers::find_page_with_message_index;
use crate::message_list::{
    DispatchAfter, ListAction, MessageKey, MessageListState, MessageListStore, PageKey,
};
use crate::store::{DispatchOutcome, RenderBinding};
use crate::viewport::{
    is_scrolled_to_bottom, messages_in_view, rotate_away_from_index, without_bottom_pages,
    without_top_pages, ViewportGeometry,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinatorConfig {
    pub eviction_screens: f64,
    pub max_load_rounds: usize,
    pub near_edge_px: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for CoordinatorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            eviction_screens: config.eviction_screens(),
            max_load_rounds: config.max_load_rounds(),
            near_edge_px: config.near_edge_px(),
        }
    }
}

pub struct ScrollCoordinator<B, G> {
    list: MessageListStore<B>,
    binding: RenderBinding<MessageListState, ListAction>,
    viewport: G,
    config: CoordinatorConfig,
}

impl<B: MessagingBackend, G: ViewportGeometry> ScrollCoordinator<B, G> {
    pub fn new(list: MessageListStore<B>, viewport: G, config: CoordinatorConfig) -> Self {
        let binding = RenderBinding::new(list.store());
        Self {
            list,
            binding,
            viewport,
            config,
        }
    }

    pub fn list(&self) -> &MessageListStore<B> {
        &self.list
    }

    pub fn binding(&self) -> &RenderBinding<MessageListState, ListAction> {
        &self.binding
    }

    pub fn viewport(&self) -> &G {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut G {
        &mut self.viewport
    }

    pub fn config(&self) -> CoordinatorConfig {
        self.config
    }

    /// Lay out pending commits and run deferred actions until nothing is left: layout
    /// effects first, then effects, once per pass.
    pub async fn render(&mut self) -> usize {
        let max_passes = self.config.max_load_rounds * 2 + 2;
        let mut passes = 0;
        while self.binding.has_pending_work() {
            if passes == max_passes {
                tracing::warn!(passes, "render: pass limit reached with work pending");
                break;
            }
            passes += 1;
            if let Some(snapshot) = self.binding.take_render() {
                self.viewport.commit(&snapshot.state);
            }
            for action in self.binding.drain_layout_effects() {
                self.handle_action(action).await;
            }
            for action in self.binding.drain_effects() {
                self.handle_action(action).await;
            }
        }
        passes
    }

    /// Bring geometry up to date with the latest commit and settle in-flight counters of
    /// dispatches whose commit has been laid out.
    fn sync(&mut self) {
        self.binding.settle_dispatch_counters();
        if let Some(snapshot) = self.binding.take_render() {
            self.viewport.commit(&snapshot.state);
        }
    }

    async fn handle_action(&mut self, action: ListAction) {
        tracing::debug!(action = action.tag(), chat_id = action.chat_id(), "deferred action");
        match action {
            ListAction::ScrollToBottomAndCheckIfWeNeedToLoadMore { chat_id } => {
                self.scroll_to_bottom_and_check_if_we_need_to_load_more(chat_id)
                    .await;
            }
            ListAction::ScrollToMessageAndCheckIfWeNeedToLoadMore {
                chat_id,
                page_key,
                message_index,
            } => {
                self.scroll_to_message_and_check_if_we_need_to_load_more(
                    chat_id,
                    page_key,
                    message_index,
                )
                .await;
            }
            ListAction::ScrollToMessage {
                chat_id,
                message_key,
                relative_offset,
            } => self.scroll_to_message(chat_id, &message_key, relative_offset),
        }
    }

    /// Stick to the bottom; while the content doesn't fill the viewport, pull in older
    /// pages.
    pub async fn scroll_to_bottom_and_check_if_we_need_to_load_more(&mut self, chat_id: ChatId) {
        for _ in 0..self.config.max_load_rounds {
            self.sync();
            let state = self.list.state();
            if !state.is_chat(chat_id) {
                tracing::debug!(chat_id, live = ?state.chat_id, "scrollToBottom: chat changed, returning");
                return;
            }
            let scroll_height = self.viewport.list_metrics().scroll_height;
            self.viewport.set_scroll_top(scroll_height);

            let metrics = self.viewport.list_metrics();
            let fits_in_viewport = metrics.scroll_top <= self.config.near_edge_px;
            let Some(first_page) = state.first_page() else {
                return;
            };
            if !fits_in_viewport || !self.list.can_load_page_before(first_page.key) {
                return;
            }
            tracing::debug!(chat_id, "scrollToBottom: content shorter than viewport, loading page before");
            let outcome = self
                .list
                .load_page_before(chat_id, Vec::new(), Vec::new())
                .await;
            if !outcome.is_committed() {
                return;
            }
        }
        tracing::warn!(chat_id, "scrollToBottom: load round limit reached");
    }

    /// Scroll `message_index` to the top of the viewport; extend the window while the view
    /// touches an edge that has more pages.
    pub async fn scroll_to_message_and_check_if_we_need_to_load_more(
        &mut self,
        chat_id: ChatId,
        page_key: PageKey,
        message_index: usize,
    ) {
        for _ in 0..self.config.max_load_rounds {
            self.sync();
            let state = self.list.state();
            if !state.is_chat(chat_id) {
                tracing::debug!(chat_id, live = ?state.chat_id, "scrollToMessage: chat changed, returning");
                return;
            }
            let Some(location) = find_page_with_message_index(&state, message_index) else {
                tracing::warn!(chat_id, page_key = %page_key, message_index, "scrollToMessage: message not mounted");
                return;
            };
            let Some(bounds) = self.viewport.message_bounds(&location.message_key) else {
                tracing::warn!(message_key = %location.message_key, "scrollToMessage: message element not rendered");
                return;
            };
            self.viewport.set_scroll_top(bounds.offset_top);

            let metrics = self.viewport.list_metrics();
            let (Some(first_page), Some(last_page)) = (state.first_page(), state.last_page()) else {
                return;
            };
            let outcome = if metrics.scroll_top <= self.config.near_edge_px
                && self.list.can_load_page_before(first_page.key)
            {
                self.list
                    .load_page_before(chat_id, Vec::new(), Vec::new())
                    .await
            } else if metrics.distance_to_bottom() <= metrics.client_height
                && self.list.can_load_page_after(last_page.key)
            {
                self.list
                    .load_page_after(chat_id, Vec::new(), Vec::new())
                    .await
            } else {
                return;
            };
            if !outcome.is_committed() {
                return;
            }
        }
        tracing::warn!(chat_id, message_index, "scrollToMessage: load round limit reached");
    }

    /// Place `message_key`'s top `relative_offset` px above the viewport top.
    pub fn scroll_to_message(&mut self, chat_id: ChatId, message_key: &MessageKey, relative_offset: f64) {
        if !self.list.state().is_chat(chat_id) {
            tracing::debug!(chat_id, "scrollToMessage: chat changed, returning");
            return;
        }
        let Some(bounds) = self.viewport.message_bounds(message_key) else {
            tracing::warn!(message_key = %message_key, "scrollToMessage: message element not rendered");
            return;
        };
        self.viewport.set_scroll_top(bounds.offset_top + relative_offset);
    }

    /// React to a user scroll: at an edge with more pages, evict from the far side, load the
    /// adjacent page and keep the first visible message where it was.
    pub async fn on_scroll(&mut self) -> Option<DispatchOutcome> {
        self.sync();
        let state = self.list.state();
        let chat_id = state.chat_id?;
        let (first_page, last_page) = (state.first_page()?, state.last_page()?);
        let metrics = self.viewport.list_metrics();

        let anchor: Vec<DispatchAfter> = messages_in_view(&self.viewport)
            .first()
            .map(|el| {
                DispatchAfter::layout(ListAction::ScrollToMessage {
                    chat_id,
                    message_key: el.key,
                    relative_offset: metrics.scroll_top - el.bounds.offset_top,
                })
            })
            .into_iter()
            .collect();

        let outcome = if metrics.scroll_top <= self.config.near_edge_px
            && self.list.can_load_page_before(first_page.key)
        {
            let evict = without_bottom_pages(&state, &self.viewport, self.config.eviction_screens);
            tracing::debug!(chat_id, evicting = evict.len(), "onScroll: top reached, loading page before");
            self.list.load_page_before(chat_id, evict, anchor).await
        } else if metrics.distance_to_bottom() <= metrics.client_height
            && self.list.can_load_page_after(last_page.key)
        {
            let evict = without_top_pages(&state, &self.viewport, self.config.eviction_screens);
            tracing::debug!(chat_id, evicting = evict.len(), "onScroll: bottom near, loading page after");
            self.list.load_page_after(chat_id, evict, anchor).await
        } else {
            return None;
        };
        self.render().await;
        Some(outcome)
    }

    /// A message arrived in `chat_id`. If the view sits at the bottom of a window that ends
    /// at the newest message, follow it.
    pub async fn incoming_messages(&mut self, chat_id: ChatId) {
        self.sync();
        let before = self.list.state();
        if !before.is_chat(chat_id) {
            tracing::debug!(chat_id, live = ?before.chat_id, "incomingMessages: not the selected chat");
            return;
        }
        let metrics = self.viewport.list_metrics();
        let at_bottom = is_scrolled_to_bottom(
            metrics.scroll_top,
            metrics.scroll_height,
            self.viewport.wrapper_height(),
        );
        let old_len = before.message_ids.len();

        if !self.list.sync_message_ids(chat_id).await.is_committed() {
            return;
        }
        self.sync();
        let state = self.list.state();
        let contiguous = match state.last_page() {
            Some(page) => page.last_message_index + 1 == old_len,
            None => true,
        };
        if at_bottom && contiguous {
            if state.page_ordering.is_empty() {
                self.list.select_chat(chat_id).await;
            } else {
                let evict = without_top_pages(&state, &self.viewport, self.config.eviction_screens);
                self.list
                    .load_page_after(
                        chat_id,
                        evict,
                        vec![DispatchAfter::layout(
                            ListAction::ScrollToBottomAndCheckIfWeNeedToLoadMore { chat_id },
                        )],
                    )
                    .await;
            }
        }
        self.render().await;
    }

    /// The backend reports that a chat's messages changed in some unspecified way. Keep the
    /// first visible message that still exists where it is, or jump to the nearest
    /// survivor.
    pub async fn on_messages_changed(&mut self, chat_id: ChatId) {
        if self.list.take_ignored_messages_changed() {
            tracing::debug!(chat_id, "onMessagesChanged: announced by a local send, ignoring");
            return;
        }
        self.sync();
        let state = self.list.state();
        if !state.is_chat(chat_id) {
            return;
        }
        let metrics = self.viewport.list_metrics();
        if is_scrolled_to_bottom(
            metrics.scroll_top,
            metrics.scroll_height,
            self.viewport.wrapper_height(),
        ) {
            self.list.select_chat(chat_id).await;
            self.render().await;
            return;
        }

        let message_ids = match self.list.backend().get_message_id_sequence(chat_id).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(chat_id, %e, "onMessagesChanged: failed to fetch message ids");
                return;
            }
        };

        let in_view = messages_in_view(&self.viewport);
        for el in &in_view {
            let message_index = message_ids.iter().position(|id| *id == el.key.message_id);
            if el.key.message_id <= LAST_SPECIAL_MESSAGE_ID
                && message_index != Some(el.key.message_index)
            {
                continue;
            }
            let Some(message_index) = message_index else {
                continue;
            };
            if self.list.store().currently_dispatched_counter() > 0 {
                tracing::debug!(chat_id, "onMessagesChanged: dispatch in flight, skipping refresh");
                return;
            }
            let relative = metrics.scroll_top - el.bounds.offset_top;
            self.list
                .refresh(chat_id, message_ids, message_index, Some(relative))
                .await;
            self.render().await;
            return;
        }

        let Some(first_in_view) = in_view.first() else {
            tracing::debug!(chat_id, "onMessagesChanged: no message in view, reselecting chat");
            self.list.select_chat(chat_id).await;
            self.render().await;
            return;
        };

        let old_ids = state.message_ids.clone();
        for old_index in rotate_away_from_index(first_in_view.key.message_index, message_ids.len()) {
            let Some(&message_id) = old_ids.get(old_index) else {
                continue;
            };
            let real_index = message_ids.iter().position(|id| *id == message_id);
            if message_id <= LAST_SPECIAL_MESSAGE_ID && real_index != Some(old_index) {
                continue;
            }
            if real_index.is_none() {
                continue;
            }
            self.list.jump_to_message(chat_id, message_id).await;
            self.render().await;
            return;
        }

        tracing::debug!(chat_id, "onMessagesChanged: nothing to restore from, reselecting chat");
        self.list.select_chat(chat_id).await;
        self.render().await;
    }

    /// Mark the unread messages currently on screen as seen.
    pub async fn mark_visible_messages_seen(&mut self) -> Option<DispatchOutcome> {
        let state = self.list.state();
        let chat_id = state.chat_id?;
        let ids: Vec<_> = messages_in_view(&self.viewport)
            .iter()
            .map(|el| el.key.message_id)
            .filter(|id| state.unread_message_ids.contains(id))
            .collect();
        if ids.is_empty() {
            return None;
        }
        let outcome = self.list.mark_messages_seen(chat_id, ids).await;
        self.render().await;
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::message_list::PAGE_SIZE;
    use crate::viewport::HeadlessViewport;

    fn coordinator(
        messages: usize,
        client_height: f64,
    ) -> (Arc<InMemoryBackend>, ScrollCoordinator<InMemoryBackend, HeadlessViewport>) {
        let backend = Arc::new(InMemoryBackend::new());
        backend.seed_chat(1, messages);
        let list = MessageListStore::new(backend.clone(), PAGE_SIZE);
        let viewport = HeadlessViewport::new(client_height, 10.0);
        (backend, ScrollCoordinator::new(list, viewport, CoordinatorConfig::default()))
    }

    #[tokio::test]
    async fn bottom_chain_loads_until_viewport_is_filled() {
        let (_backend, mut coord) = coordinator(100, 500.0);
        coord.list().select_chat(1).await;
        coord.render().await;

        let state = coord.list().state();
        assert_eq!(
            state.page_ordering,
            vec![PageKey::new(40, 59), PageKey::new(60, 79), PageKey::new(80, 99)]
        );
        let metrics = coord.viewport().list_metrics();
        assert_eq!(metrics.scroll_height, 600.0);
        assert_eq!(metrics.scroll_top, 100.0);
        assert_eq!(coord.list().store().currently_dispatched_counter(), 0);
    }

    #[tokio::test]
    async fn unread_focus_loads_page_after_when_bottom_is_close() {
        let (backend, mut coord) = coordinator(100, 150.0);
        let ids = backend.get_message_id_sequence(1).await.expect("ids");
        backend.mark_unread(&[ids[50]]);
        coord.list().select_chat(1).await;
        coord.render().await;

        let state = coord.list().state();
        assert_eq!(
            state.page_ordering,
            vec![PageKey::new(47, 66), PageKey::new(67, 86)]
        );
        // index 49 sits two rows into the first page
        assert_eq!(coord.viewport().list_metrics().scroll_top, 20.0);
    }

    #[tokio::test]
    async fn scrolling_to_top_loads_older_page_and_keeps_anchor() {
        let (_backend, mut coord) = coordinator(200, 100.0);
        coord.list().select_chat(1).await;
        coord.render().await;
        assert_eq!(coord.list().state().page_ordering, vec![PageKey::new(180, 199)]);

        coord.viewport_mut().set_scroll_top(0.0);
        let outcome = coord.on_scroll().await;
        assert_eq!(outcome, Some(DispatchOutcome::Committed));

        let state = coord.list().state();
        assert_eq!(
            state.page_ordering,
            vec![PageKey::new(160, 179), PageKey::new(180, 199)]
        );
        // message 180 was at the top before the load and still is
        assert_eq!(coord.viewport().list_metrics().scroll_top, 200.0);
    }

    #[tokio::test]
    async fn mark_visible_unread_as_seen() {
        let (backend, mut coord) = coordinator(30, 100.0);
        let ids = backend.get_message_id_sequence(1).await.expect("ids");
        backend.mark_unread(&[ids[28]]);
        coord.list().select_chat(1).await;
        coord.render().await;
        assert_eq!(coord.list().state().unread_message_ids, vec![ids[28]]);

        coord.viewport_mut().scroll_to_bottom();
        let outcome = coord.mark_visible_messages_seen().await;
        assert_eq!(outcome, Some(DispatchOutcome::Committed));
        assert!(coord.list().state().unread_message_ids.is_empty());
        assert_eq!(coord.mark_visible_messages_seen().await, None);
    }
}
