//! Viewport geometry and the measurements the coordinator bases its decisions on.
//!
//! The windowing logic never touches a UI toolkit. It asks a [`ViewportGeometry`] for the
//! list container metrics and for the bounds of individual pages and messages, addressed
//! by their [`PageKey`] / [`MessageKey`].

mod headless;

pub use headless::HeadlessViewport;

use crate::message_list::{MessageKey, MessageListState, PageKey};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ListMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ListMetrics {
    pub fn distance_to_bottom(&self) -> f64 {
        self.scroll_height - self.scroll_top - self.client_height
    }
}

/// Vertical placement of an element inside the scrollable content.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ElementBounds {
    pub offset_top: f64,
    pub height: f64,
}

impl ElementBounds {
    pub fn offset_bottom(&self) -> f64 {
        self.offset_top + self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MessageElement {
    pub key: MessageKey,
    pub bounds: ElementBounds,
}

pub trait ViewportGeometry: Send {
    /// Re-render the list for a newly committed window.
    fn commit(&mut self, state: &MessageListState);

    fn list_metrics(&self) -> ListMetrics;

    /// Visible height of the wrapper around the list.
    fn wrapper_height(&self) -> f64;

    fn set_scroll_top(&mut self, scroll_top: f64);

    fn page_bounds(&self, page_key: PageKey) -> Option<ElementBounds>;

    fn message_bounds(&self, message_key: &MessageKey) -> Option<ElementBounds>;

    /// Rendered messages, top to bottom.
    fn message_elements(&self) -> Vec<MessageElement>;
}

/// Pages that can be dropped from the top while more than `screens` wrapper heights of
/// content remain. The last mounted page is never a candidate.
pub fn without_top_pages<G: ViewportGeometry + ?Sized>(
    state: &MessageListState,
    geometry: &G,
    screens: f64,
) -> Vec<PageKey> {
    let ordering = &state.page_ordering;
    let candidates = ordering.iter().take(ordering.len().saturating_sub(1));
    removable_pages(candidates, geometry, screens, "withoutTopPages")
}

/// Pages that can be dropped from the bottom while more than `screens` wrapper heights of
/// content remain. The first mounted page is never a candidate.
pub fn without_bottom_pages<G: ViewportGeometry + ?Sized>(
    state: &MessageListState,
    geometry: &G,
    screens: f64,
) -> Vec<PageKey> {
    let candidates = state.page_ordering.iter().skip(1).rev();
    removable_pages(candidates, geometry, screens, "withoutBottomPages")
}

fn removable_pages<'a, G: ViewportGeometry + ?Sized>(
    candidates: impl Iterator<Item = &'a PageKey>,
    geometry: &G,
    screens: f64,
    step: &'static str,
) -> Vec<PageKey> {
    let bound = geometry.wrapper_height() * screens;
    let mut remaining = geometry.list_metrics().scroll_height;
    let mut without = Vec::new();
    for page_key in candidates {
        let Some(bounds) = geometry.page_bounds(*page_key) else {
            tracing::warn!(step, page_key = %page_key, "page element not rendered, stopping");
            break;
        };
        let updated = remaining - bounds.height;
        if updated > bound {
            without.push(*page_key);
            remaining = updated;
        } else {
            break;
        }
    }
    without
}

/// Messages intersecting the visible part of the list, top to bottom.
pub fn messages_in_view<G: ViewportGeometry + ?Sized>(geometry: &G) -> Vec<MessageElement> {
    let metrics = geometry.list_metrics();
    let view_top = metrics.scroll_top;
    let view_bottom = view_top + metrics.client_height;
    geometry
        .message_elements()
        .into_iter()
        .filter(|el| {
            let top = el.bounds.offset_top;
            let bottom = el.bounds.offset_bottom();
            math_in_between(view_top, view_bottom, top)
                || math_in_between(view_top, view_bottom, bottom)
                || (top < view_top && bottom > view_bottom)
        })
        .collect()
}

pub fn math_in_between(window_low: f64, window_high: f64, value: f64) -> bool {
    value >= window_low && value <= window_high
}

pub fn is_scrolled_to_bottom(scroll_top: f64, scroll_height: f64, wrapper_height: f64) -> bool {
    scroll_top >= scroll_height - wrapper_height
}

/// True unless the newest message is mounted and the view bottom is within half a screen
/// of the content end.
pub fn is_one_page_or_more_away_from_newest_message(
    state: &MessageListState,
    metrics: ListMetrics,
) -> bool {
    let Some(last_page) = state.last_page() else {
        return true;
    };
    if last_page.last_message_index + 1 != state.message_ids.len() {
        return true;
    }
    let scroll_bottom = metrics.scroll_top + metrics.client_height;
    scroll_bottom < metrics.scroll_height - metrics.client_height / 2.0
}

/// Positions around `index`, nearest first, alternating below and above.
#[derive(Debug, Clone)]
pub struct RotateAwayFromIndex {
    index: usize,
    length: usize,
    distance: usize,
    count: usize,
    below_done: bool,
}

pub fn rotate_away_from_index(index: usize, length: usize) -> RotateAwayFromIndex {
    RotateAwayFromIndex {
        index,
        length,
        distance: 1,
        count: 0,
        below_done: false,
    }
}

impl Iterator for RotateAwayFromIndex {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.count + 1 >= self.length || self.distance > self.index.max(self.length) {
                return None;
            }
            if !self.below_done {
                self.below_done = true;
                let below = self.index + self.distance;
                if below < self.length {
                    self.count += 1;
                    return Some(below);
                }
            }
            self.below_done = false;
            let distance = self.distance;
            self.distance += 1;
            if let Some(above) = self.index.checked_sub(distance) {
                if above < self.length {
                    self.count += 1;
                    return Some(above);
                }
            }
        }
    }
}
