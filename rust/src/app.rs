use std::sync::Arc;

use flume::Receiver;
use serde::Serialize;

use crate::backend::{BackendEvent, ChatId, MessageId, MessagingBackend, SendMessageParams};
use crate::config::AppConfig;
use crate::coordinator::{CoordinatorConfig, ScrollCoordinator};
use crate::message_list::{MessageListState, MessageListStore};
use crate::store::DispatchOutcome;
use crate::viewport::{
    is_one_page_or_more_away_from_newest_message, messages_in_view, ViewportGeometry,
};

/// One chat's message view: the windowing store, its render binding and the scroll
/// coordinator wired to a viewport. Every entry point renders before returning, so
/// callers always observe laid-out geometry.
pub struct ChatView<B, G> {
    coordinator: ScrollCoordinator<B, G>,
}

/// Flat description of the current window, for logs and the CLI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSummary {
    pub chat_id: Option<ChatId>,
    pub pages: Vec<String>,
    pub mounted: usize,
    pub total: usize,
    pub unread: Vec<MessageId>,
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
    pub first_visible: Option<MessageId>,
    /// The newest message is unmounted or more than half a screen below the view.
    pub away_from_newest: bool,
}

impl<B: MessagingBackend, G: ViewportGeometry> ChatView<B, G> {
    pub fn new(backend: Arc<B>, viewport: G, config: &AppConfig) -> Self {
        let list = MessageListStore::new(backend, config.page_size());
        let coordinator = ScrollCoordinator::new(list, viewport, CoordinatorConfig::from(config));
        tracing::info!(page_size = config.page_size(), "chat view ready");
        Self { coordinator }
    }

    pub fn list(&self) -> &MessageListStore<B> {
        self.coordinator.list()
    }

    pub fn coordinator(&mut self) -> &mut ScrollCoordinator<B, G> {
        &mut self.coordinator
    }

    pub fn state(&self) -> Arc<MessageListState> {
        self.coordinator.list().state()
    }

    pub fn viewport(&self) -> &G {
        self.coordinator.viewport()
    }

    pub async fn select_chat(&mut self, chat_id: ChatId) -> DispatchOutcome {
        let outcome = self.coordinator.list().select_chat(chat_id).await;
        self.settle().await;
        outcome
    }

    pub async fn jump_to_message(&mut self, chat_id: ChatId, message_id: MessageId) -> DispatchOutcome {
        let outcome = self
            .coordinator
            .list()
            .jump_to_message(chat_id, message_id)
            .await;
        self.settle().await;
        outcome
    }

    pub async fn send_message(&mut self, chat_id: ChatId, text: impl Into<String>) -> DispatchOutcome {
        let outcome = self
            .coordinator
            .list()
            .send_message(chat_id, SendMessageParams::text(text))
            .await;
        self.settle().await;
        outcome
    }

    pub async fn delete_message(&mut self, message_id: MessageId) -> DispatchOutcome {
        let outcome = self.coordinator.list().delete_message(message_id).await;
        self.settle().await;
        outcome
    }

    /// Move the list by `delta` px the way a user would, then react to the new position.
    pub async fn scroll_by(&mut self, delta: f64) -> Option<DispatchOutcome> {
        let viewport = self.coordinator.viewport_mut();
        let scroll_top = viewport.list_metrics().scroll_top;
        viewport.set_scroll_top(scroll_top + delta);
        self.on_scroll().await
    }

    pub async fn on_scroll(&mut self) -> Option<DispatchOutcome> {
        let outcome = self.coordinator.on_scroll().await;
        self.settle().await;
        outcome
    }

    pub async fn render(&mut self) {
        self.coordinator.render().await;
    }

    async fn settle(&mut self) {
        self.coordinator.render().await;
        self.coordinator.mark_visible_messages_seen().await;
    }

    pub async fn handle_event(&mut self, event: BackendEvent) {
        tracing::debug!(event = event.tag(), chat_id = event.chat_id(), "backend event");
        let list = self.coordinator.list().clone();
        match event {
            BackendEvent::MessageDelivered {
                chat_id,
                message_id,
            } => {
                list.on_message_delivered(chat_id, message_id).await;
            }
            BackendEvent::MessageFailed {
                chat_id,
                message_id,
            } => {
                list.on_message_failed(chat_id, message_id).await;
            }
            BackendEvent::MessageRead {
                chat_id,
                message_id,
            } => {
                list.on_message_read(chat_id, message_id).await;
            }
            BackendEvent::MessagesChanged { chat_id } => {
                self.coordinator.on_messages_changed(chat_id).await;
            }
            BackendEvent::IncomingMessage { chat_id, .. } => {
                self.coordinator.incoming_messages(chat_id).await;
            }
        }
        self.settle().await;
    }

    /// Handle every event already queued on `events`. Returns how many were handled.
    pub async fn drain_events(&mut self, events: &Receiver<BackendEvent>) -> usize {
        let mut handled = 0;
        while let Ok(event) = events.try_recv() {
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Handle events until every sender is gone.
    pub async fn run_events(&mut self, events: Receiver<BackendEvent>) {
        while let Ok(event) = events.recv_async().await {
            self.handle_event(event).await;
        }
        tracing::info!("event channel closed");
    }

    pub fn summary(&self) -> WindowSummary {
        let state = self.state();
        let viewport = self.coordinator.viewport();
        let metrics = viewport.list_metrics();
        WindowSummary {
            chat_id: state.chat_id,
            pages: state.page_ordering.iter().map(|k| k.to_string()).collect(),
            mounted: state.mounted_len(),
            total: state.message_ids.len(),
            unread: state.unread_message_ids.clone(),
            scroll_top: metrics.scroll_top,
            scroll_height: metrics.scroll_height,
            client_height: metrics.client_height,
            first_visible: messages_in_view(viewport)
                .first()
                .map(|el| el.key.message_id),
            away_from_newest: is_one_page_or_more_away_from_newest_message(&state, metrics),
        }
    }
}
