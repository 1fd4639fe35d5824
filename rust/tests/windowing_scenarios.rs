//! Windowing scenarios driven through the public API with the in-memory backend and the
//! headless viewport.

use std::sync::Arc;

use msgwin_core::backend::InMemoryBackend;
use msgwin_core::store::RenderBinding;
use msgwin_core::viewport::{
    messages_in_view, without_top_pages, HeadlessViewport, ViewportGeometry,
};
use msgwin_core::{
    AppConfig, ChatView, DispatchOutcome, ListAction, MessageKey, MessageListStore, PageKey,
    PAGE_SIZE,
};

fn fifty_message_chat() -> Arc<InMemoryBackend> {
    let backend = Arc::new(InMemoryBackend::new());
    backend.insert_messages_with_ids(1, 1..=50);
    backend
}

fn chat_view(backend: &Arc<InMemoryBackend>) -> ChatView<InMemoryBackend, HeadlessViewport> {
    ChatView::new(
        backend.clone(),
        HeadlessViewport::new(100.0, 10.0),
        &AppConfig::default(),
    )
}

#[tokio::test]
async fn select_chat_without_unread_loads_newest_page() {
    let backend = fifty_message_chat();
    let list = MessageListStore::new(backend.clone(), PAGE_SIZE);
    let binding = RenderBinding::new(list.store());

    assert!(list.select_chat(1).await.is_committed());
    let state = list.state();
    assert_eq!(state.page_ordering, vec![PageKey::new(30, 49)]);
    let page = state.last_page().expect("page");
    assert_eq!(page.message_ids, (31..=50).collect::<Vec<_>>());
    assert_eq!(
        binding.drain_layout_effects(),
        vec![ListAction::ScrollToBottomAndCheckIfWeNeedToLoadMore { chat_id: 1 }]
    );
}

#[tokio::test]
async fn select_chat_with_unread_centers_on_it() {
    let backend = fifty_message_chat();
    backend.mark_unread(&[21]);
    let list = MessageListStore::new(backend.clone(), PAGE_SIZE);
    let binding = RenderBinding::new(list.store());

    list.select_chat(1).await;
    let state = list.state();
    assert_eq!(state.page_ordering, vec![PageKey::new(17, 36)]);
    assert_eq!(state.unread_message_ids, vec![21]);
    assert_eq!(
        binding.drain_layout_effects(),
        vec![ListAction::ScrollToMessageAndCheckIfWeNeedToLoadMore {
            chat_id: 1,
            page_key: PageKey::new(17, 36),
            message_index: 19,
        }]
    );
}

#[tokio::test]
async fn overlapping_edge_loads_are_refused() {
    let backend = fifty_message_chat();
    let list = MessageListStore::new(backend.clone(), PAGE_SIZE);
    let binding = RenderBinding::new(list.store());
    list.select_chat(1).await;
    binding.settle_dispatch_counters();
    assert_eq!(list.store().currently_dispatched_counter(), 0);

    let gate = backend.hold_fetches();
    let releaser = async {
        while gate.waiting() == 0 {
            tokio::task::yield_now().await;
        }
        gate.release(1);
    };
    let (first, second, ()) = tokio::join!(
        list.load_page_before(1, Vec::new(), Vec::new()),
        list.load_page_before(1, Vec::new(), Vec::new()),
        releaser,
    );
    assert_eq!(first, DispatchOutcome::Committed);
    assert_eq!(second, DispatchOutcome::Rejected);
    assert_eq!(
        list.state().page_ordering,
        vec![PageKey::new(10, 29), PageKey::new(30, 49)]
    );

    // the committed load stays in flight until its render settles it
    assert_eq!(list.store().currently_dispatched_counter(), 1);
    assert_eq!(binding.settle_dispatch_counters(), 1);
    assert_eq!(list.store().currently_dispatched_counter(), 0);
}

#[tokio::test]
async fn eviction_keeps_at_least_four_screens_of_content() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.insert_messages_with_ids(1, 1..=120);
    let list = MessageListStore::new(backend.clone(), PAGE_SIZE);
    list.select_chat(1).await;
    for _ in 0..5 {
        assert!(list
            .load_page_before(1, Vec::new(), Vec::new())
            .await
            .is_committed());
    }
    let state = list.state();
    assert_eq!(state.page_ordering.len(), 6);

    // two light pages on top, four regular ones below: 500px in a 100px viewport
    let mut viewport = HeadlessViewport::new(100.0, 5.0);
    for id in 1..=40 {
        viewport = viewport.with_message_height(id, 2.5);
    }
    viewport.commit(&state);
    assert_eq!(viewport.list_metrics().scroll_height, 500.0);

    let without = without_top_pages(&state, &viewport, 4.0);
    assert_eq!(without, vec![PageKey::new(0, 19)]);
    let removed: f64 = without
        .iter()
        .filter_map(|k| viewport.page_bounds(*k))
        .map(|b| b.height)
        .sum();
    assert!(500.0 - removed >= 400.0);
}

#[tokio::test]
async fn delivery_for_unmounted_message_keeps_state() {
    let backend = fifty_message_chat();
    let list = MessageListStore::new(backend.clone(), PAGE_SIZE);
    list.select_chat(1).await;
    let before = list.state();

    let outcome = list.on_message_delivered(1, 5).await;
    assert_eq!(outcome, DispatchOutcome::Unchanged);
    assert!(Arc::ptr_eq(&before, &list.state()));
}

#[tokio::test]
async fn chat_switch_drops_in_flight_page_load() {
    let backend = fifty_message_chat();
    backend.mark_unread(&[21]);
    backend.insert_messages_with_ids(2, 100..=110);
    let list = MessageListStore::new(backend.clone(), PAGE_SIZE);
    list.select_chat(1).await;
    assert_eq!(list.state().page_ordering, vec![PageKey::new(17, 36)]);

    let gate = backend.hold_fetches();
    let switch = async {
        while gate.waiting() == 0 {
            tokio::task::yield_now().await;
        }
        backend.open_fetches();
        let outcome = list.select_chat(2).await;
        let switched = list.state();
        gate.release(1);
        (outcome, switched)
    };
    let (load, (switch, switched)) =
        tokio::join!(list.load_page_after(1, Vec::new(), Vec::new()), switch);

    assert_eq!(switch, DispatchOutcome::Committed);
    assert_eq!(load, DispatchOutcome::Unchanged);
    let state = list.state();
    assert!(Arc::ptr_eq(&switched, &state));
    assert_eq!(state.chat_id, Some(2));
    assert_eq!(state.page_ordering, vec![PageKey::new(0, 10)]);
}

#[test]
fn message_keys_round_trip_through_strings() {
    let key = MessageKey {
        page_key: PageKey::new(30, 49),
        message_id: 31,
        message_index: 30,
    };
    let raw = key.to_string();
    assert_eq!(raw.parse::<MessageKey>().expect("parse"), key);
    assert_eq!("page-30-49".parse::<PageKey>().expect("parse"), key.page_key);
    assert!("page-30".parse::<PageKey>().is_err());
    assert!("page-30-49-31".parse::<MessageKey>().is_err());
}

#[tokio::test]
async fn scrolling_up_walks_history_and_bounds_the_window() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.seed_chat(1, 200);
    let mut view = chat_view(&backend);
    view.select_chat(1).await;
    assert_eq!(view.summary().pages, vec!["page-180-199"]);
    assert_eq!(view.summary().scroll_top, 100.0);

    for _ in 0..9 {
        let top = view.viewport().list_metrics().scroll_top;
        let outcome = view.scroll_by(-top).await;
        assert_eq!(outcome, Some(DispatchOutcome::Committed));
        // the message that was on top before the load is still on top
        assert_eq!(view.viewport().list_metrics().scroll_top, 200.0);
    }
    let summary = view.summary();
    assert_eq!(
        summary.pages,
        vec!["page-0-19", "page-20-39", "page-40-59", "page-60-79"]
    );
    assert_eq!(summary.mounted, 80);

    let top = view.viewport().list_metrics().scroll_top;
    assert_eq!(view.scroll_by(-top).await, None);

    let outcome = view.scroll_by(10_000.0).await;
    assert_eq!(outcome, Some(DispatchOutcome::Committed));
    let summary = view.summary();
    assert_eq!(
        summary.pages,
        vec!["page-20-39", "page-40-59", "page-60-79", "page-80-99"]
    );
    assert_eq!(summary.scroll_top, 500.0);
}

#[tokio::test]
async fn deleting_a_message_keeps_the_visible_one_in_place() {
    let backend = Arc::new(InMemoryBackend::new());
    let ids = backend.seed_chat(1, 100);
    let events = backend.events();
    let mut view = chat_view(&backend);
    view.select_chat(1).await;
    assert_eq!(view.scroll_by(-60.0).await, None);
    assert_eq!(view.summary().first_visible, Some(ids[83]));

    view.delete_message(ids[85]).await;
    assert_eq!(view.drain_events(&events).await, 1);

    let summary = view.summary();
    assert_eq!(summary.total, 99);
    assert_eq!(summary.pages, vec!["page-79-98"]);
    assert_eq!(summary.first_visible, Some(ids[83]));
    assert_eq!(summary.scroll_top, 50.0);
}

#[tokio::test]
async fn deleting_every_visible_message_jumps_next_to_the_gap() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.seed_chat(1, 100);
    let events = backend.events();
    let mut view = chat_view(&backend);
    view.select_chat(1).await;
    assert_eq!(view.scroll_by(-50.0).await, None);

    let visible: Vec<_> = messages_in_view(view.viewport())
        .iter()
        .map(|el| el.key.message_id)
        .collect();
    assert_eq!(visible.len(), 12);
    for id in &visible {
        view.delete_message(*id).await;
    }
    assert_eq!(view.drain_events(&events).await, visible.len());

    let summary = view.summary();
    assert_eq!(summary.total, 88);
    assert_eq!(summary.pages, vec!["page-68-87"]);
    assert_eq!(summary.first_visible, Some(87));
    assert!(!visible.contains(&87));
}

#[tokio::test]
async fn incoming_message_away_from_bottom_only_extends_the_sequence() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.seed_chat(1, 100);
    let events = backend.events();
    let mut view = chat_view(&backend);
    view.select_chat(1).await;
    assert_eq!(view.scroll_by(-50.0).await, None);

    let id = backend.receive(1, "while reading");
    view.drain_events(&events).await;

    let summary = view.summary();
    assert_eq!(summary.pages, vec!["page-80-99"]);
    assert_eq!(summary.total, 101);
    assert_eq!(summary.unread, vec![id]);
    assert!(view.list().can_load_page_after(PageKey::new(80, 99)));
    assert!(summary.away_from_newest);
}

#[tokio::test]
async fn failed_send_leaves_the_window_alone() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.seed_chat(1, 10);
    backend.fail_sends_in(1);
    let events = backend.events();
    let mut view = chat_view(&backend);
    view.select_chat(1).await;
    let before = view.state();

    assert_eq!(view.send_message(1, "lost").await, DispatchOutcome::Unchanged);
    assert_eq!(view.list().ignored_messages_changed(), 1);
    view.drain_events(&events).await;
    assert_eq!(view.list().ignored_messages_changed(), 0);
    assert!(Arc::ptr_eq(&before, &view.state()));
}

#[tokio::test]
async fn unavailable_backend_fails_without_touching_state() {
    let backend = fifty_message_chat();
    let mut view = chat_view(&backend);
    view.select_chat(1).await;
    let before = view.state();

    backend.set_unavailable(Some("engine restarting"));
    assert_eq!(view.jump_to_message(1, 10).await, DispatchOutcome::Failed);
    assert!(Arc::ptr_eq(&before, &view.state()));
    assert_eq!(view.list().store().currently_dispatched_counter(), 0);

    backend.set_unavailable(None);
    assert!(view.jump_to_message(1, 10).await.is_committed());
    assert_eq!(view.summary().pages, vec!["page-6-25", "page-26-45"]);
}
