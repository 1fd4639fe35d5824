use std::collections::{HashMap, HashSet};

use crate::backend::{MessageId, MessageRecord};
use crate::message_list::{MessageKey, MessageListState, PageKey};

use super::{ElementBounds, ListMetrics, MessageElement, ViewportGeometry};

/// Deterministic geometry for tests and the CLI: pages are stacked in window order and
/// every record has a fixed height. Like a browser, `scroll_top` is kept as a number
/// across re-layouts and only clamped to the new content height.
#[derive(Debug, Clone)]
pub struct HeadlessViewport {
    client_height: f64,
    message_height: f64,
    day_marker_height: f64,
    height_overrides: HashMap<MessageId, f64>,
    hidden_pages: HashSet<PageKey>,
    scroll_top: f64,
    scroll_height: f64,
    pages: Vec<(PageKey, ElementBounds)>,
    messages: Vec<MessageElement>,
}

impl HeadlessViewport {
    pub fn new(client_height: f64, message_height: f64) -> Self {
        Self {
            client_height,
            message_height,
            day_marker_height: message_height,
            height_overrides: HashMap::new(),
            hidden_pages: HashSet::new(),
            scroll_top: 0.0,
            scroll_height: 0.0,
            pages: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn with_day_marker_height(mut self, height: f64) -> Self {
        self.day_marker_height = height;
        self
    }

    pub fn with_message_height(mut self, message_id: MessageId, height: f64) -> Self {
        self.height_overrides.insert(message_id, height);
        self
    }

    /// Treat `page_key` as not rendered: its bounds and messages become unavailable.
    pub fn hide_page(&mut self, page_key: PageKey) {
        self.hidden_pages.insert(page_key);
    }

    pub fn scroll_by(&mut self, delta: f64) {
        self.set_scroll_top(self.scroll_top + delta);
    }

    pub fn scroll_to_top(&mut self) {
        self.set_scroll_top(0.0);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.set_scroll_top(self.scroll_height);
    }

    fn record_height(&self, record: &MessageRecord) -> f64 {
        match record {
            MessageRecord::DayMarker { .. } => self.day_marker_height,
            MessageRecord::Message(m) => self
                .height_overrides
                .get(&m.id)
                .copied()
                .unwrap_or(self.message_height),
        }
    }

    fn max_scroll_top(&self) -> f64 {
        (self.scroll_height - self.client_height).max(0.0)
    }
}

impl ViewportGeometry for HeadlessViewport {
    fn commit(&mut self, state: &MessageListState) {
        self.pages.clear();
        self.messages.clear();
        let mut offset = 0.0;
        for page in state.ordered_pages() {
            let page_top = offset;
            for (index_on_page, record) in page.messages.iter().enumerate() {
                let height = self.record_height(record);
                if let Some(key) = page.message_key(index_on_page) {
                    self.messages.push(MessageElement {
                        key,
                        bounds: ElementBounds {
                            offset_top: offset,
                            height,
                        },
                    });
                }
                offset += height;
            }
            self.pages.push((
                page.key,
                ElementBounds {
                    offset_top: page_top,
                    height: offset - page_top,
                },
            ));
        }
        self.scroll_height = offset;
        self.scroll_top = self.scroll_top.clamp(0.0, self.max_scroll_top());
    }

    fn list_metrics(&self) -> ListMetrics {
        ListMetrics {
            scroll_top: self.scroll_top,
            scroll_height: self.scroll_height.max(self.client_height),
            client_height: self.client_height,
        }
    }

    fn wrapper_height(&self) -> f64 {
        self.client_height
    }

    fn set_scroll_top(&mut self, scroll_top: f64) {
        self.scroll_top = scroll_top.clamp(0.0, self.max_scroll_top());
    }

    fn page_bounds(&self, page_key: PageKey) -> Option<ElementBounds> {
        if self.hidden_pages.contains(&page_key) {
            return None;
        }
        self.pages
            .iter()
            .find(|(key, _)| *key == page_key)
            .map(|(_, bounds)| *bounds)
    }

    fn message_bounds(&self, message_key: &MessageKey) -> Option<ElementBounds> {
        if self.hidden_pages.contains(&message_key.page_key) {
            return None;
        }
        self.messages
            .iter()
            .find(|el| el.key == *message_key)
            .map(|el| el.bounds)
    }

    fn message_elements(&self) -> Vec<MessageElement> {
        self.messages
            .iter()
            .filter(|el| !self.hidden_pages.contains(&el.key.page_key))
            .copied()
            .collect()
    }
}
