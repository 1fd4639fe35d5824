// Deterministic in-process messaging engine. Used by tests and the headless CLI.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use flume::{Receiver, Sender};
use tokio::sync::Semaphore;

use super::types::*;
use super::{BackendError, MessagingBackend};

const SECONDS_PER_DAY: i64 = 86_400;
const SEED_START_TS: i64 = 1_700_000_000;
const SEED_SPACING_SECS: i64 = 600;
const SELF_CONTACT_ID: u32 = 1;
const PEER_CONTACT_ID: u32 = 10;

#[derive(Debug, Default)]
struct ChatLog {
    messages: Vec<Message>,
}

#[derive(Debug)]
struct MemoryState {
    chats: BTreeMap<ChatId, ChatLog>,
    next_message_id: MessageId,
    day_markers: bool,
    failing_chats: HashSet<ChatId>,
    unavailable: Option<String>,
    gate: Option<FetchGate>,
    fetch_log: Vec<FetchRecord>,
    seen_log: Vec<Vec<MessageId>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRecord {
    pub chat_id: ChatId,
    pub start: usize,
    pub end: usize,
}

/// Holds page fetches until permits are released. Lets tests park an operation at its
/// suspension point while other operations run.
#[derive(Debug, Clone)]
pub struct FetchGate {
    permits: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
}

impl FetchGate {
    fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of fetches currently parked on this gate.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn release(&self, fetches: usize) {
        self.permits.add_permits(fetches);
    }

    async fn pass(&self) {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    events_tx: Sender<BackendEvent>,
    events_rx: Receiver<BackendEvent>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                chats: BTreeMap::new(),
                next_message_id: LAST_SPECIAL_MESSAGE_ID + 1,
                day_markers: false,
                failing_chats: HashSet::new(),
                unavailable: None,
                gate: None,
                fetch_log: Vec::new(),
                seen_log: Vec::new(),
            })),
            events_tx,
            events_rx,
        }
    }

    /// Insert a day marker into id sequences wherever the calendar day changes.
    pub fn with_day_markers(self, enabled: bool) -> Self {
        self.lock().day_markers = enabled;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    fn emit(&self, event: BackendEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn events(&self) -> Receiver<BackendEvent> {
        self.events_rx.clone()
    }

    pub fn create_chat(&self, chat_id: ChatId) {
        self.lock().chats.entry(chat_id).or_default();
    }

    fn push_message(
        &self,
        chat_id: ChatId,
        direction: Direction,
        text: String,
        timestamp: i64,
        state: MessageState,
    ) -> MessageId {
        let mut g = self.lock();
        let id = g.next_message_id;
        g.next_message_id += 1;
        let from_id = match direction {
            Direction::Incoming => PEER_CONTACT_ID,
            Direction::Outgoing => SELF_CONTACT_ID,
        };
        g.chats.entry(chat_id).or_default().messages.push(Message {
            id,
            chat_id,
            from_id,
            text,
            timestamp,
            direction,
            state,
            quote_message_id: None,
        });
        id
    }

    pub fn add_incoming(&self, chat_id: ChatId, text: impl Into<String>, timestamp: i64) -> MessageId {
        self.push_message(
            chat_id,
            Direction::Incoming,
            text.into(),
            timestamp,
            MessageState::InFresh,
        )
    }

    pub fn add_outgoing(&self, chat_id: ChatId, text: impl Into<String>, timestamp: i64) -> MessageId {
        self.push_message(
            chat_id,
            Direction::Outgoing,
            text.into(),
            timestamp,
            MessageState::OutDelivered,
        )
    }

    /// Fill a chat with `count` already-seen messages, alternating direction.
    pub fn seed_chat(&self, chat_id: ChatId, count: usize) -> Vec<MessageId> {
        let start = self.last_timestamp(chat_id).unwrap_or(SEED_START_TS);
        (0..count)
            .map(|i| {
                let ts = start + (i as i64 + 1) * SEED_SPACING_SECS;
                if i % 2 == 0 {
                    self.push_message(
                        chat_id,
                        Direction::Incoming,
                        format!("message {}", i + 1),
                        ts,
                        MessageState::InSeen,
                    )
                } else {
                    self.add_outgoing(chat_id, format!("message {}", i + 1), ts)
                }
            })
            .collect()
    }

    /// Insert seen incoming messages with caller-chosen ids, in the given order.
    pub fn insert_messages_with_ids(
        &self,
        chat_id: ChatId,
        ids: impl IntoIterator<Item = MessageId>,
    ) {
        let mut g = self.lock();
        let mut max_id = g.next_message_id;
        let log = g.chats.entry(chat_id).or_default();
        for (i, id) in ids.into_iter().enumerate() {
            log.messages.push(Message {
                id,
                chat_id,
                from_id: PEER_CONTACT_ID,
                text: format!("message {id}"),
                timestamp: SEED_START_TS + i as i64 * SEED_SPACING_SECS,
                direction: Direction::Incoming,
                state: MessageState::InSeen,
                quote_message_id: None,
            });
            max_id = max_id.max(id + 1);
        }
        g.next_message_id = max_id;
    }

    pub fn mark_unread(&self, message_ids: &[MessageId]) {
        let mut g = self.lock();
        for log in g.chats.values_mut() {
            for m in log.messages.iter_mut() {
                if message_ids.contains(&m.id) {
                    m.state = MessageState::InFresh;
                }
            }
        }
    }

    fn last_timestamp(&self, chat_id: ChatId) -> Option<i64> {
        let g = self.lock();
        g.chats
            .get(&chat_id)
            .and_then(|log| log.messages.last())
            .map(|m| m.timestamp)
    }

    /// A peer message arrives: stored as fresh and announced as incoming.
    pub fn receive(&self, chat_id: ChatId, text: impl Into<String>) -> MessageId {
        let ts = self
            .last_timestamp(chat_id)
            .map(|t| t + 60)
            .unwrap_or_else(|| chrono::Utc::now().timestamp());
        let message_id = self.add_incoming(chat_id, text, ts);
        self.emit(BackendEvent::IncomingMessage {
            chat_id,
            message_id,
        });
        message_id
    }

    fn set_state_of(&self, message_id: MessageId, state: MessageState) -> Option<ChatId> {
        let mut g = self.lock();
        for (chat_id, log) in g.chats.iter_mut() {
            if let Some(m) = log.messages.iter_mut().find(|m| m.id == message_id) {
                m.state = state;
                return Some(*chat_id);
            }
        }
        None
    }

    pub fn deliver(&self, message_id: MessageId) {
        if let Some(chat_id) = self.set_state_of(message_id, MessageState::OutDelivered) {
            self.emit(BackendEvent::MessageDelivered {
                chat_id,
                message_id,
            });
        }
    }

    pub fn fail(&self, message_id: MessageId) {
        if let Some(chat_id) = self.set_state_of(message_id, MessageState::OutFailed) {
            self.emit(BackendEvent::MessageFailed {
                chat_id,
                message_id,
            });
        }
    }

    pub fn read(&self, message_id: MessageId) {
        if let Some(chat_id) = self.set_state_of(message_id, MessageState::OutMdnRcvd) {
            self.emit(BackendEvent::MessageRead {
                chat_id,
                message_id,
            });
        }
    }

    /// Every later send into `chat_id` reports failure (message id 0).
    pub fn fail_sends_in(&self, chat_id: ChatId) {
        self.lock().failing_chats.insert(chat_id);
    }

    /// While set, every call fails with [`BackendError::Unavailable`].
    pub fn set_unavailable(&self, reason: Option<&str>) {
        self.lock().unavailable = reason.map(ToString::to_string);
    }

    pub fn hold_fetches(&self) -> FetchGate {
        let gate = FetchGate::new();
        self.lock().gate = Some(gate.clone());
        gate
    }

    /// Stop parking new fetches. Fetches already parked still wait for their permit.
    pub fn open_fetches(&self) {
        self.lock().gate = None;
    }

    pub fn fetch_log(&self) -> Vec<FetchRecord> {
        self.lock().fetch_log.clone()
    }

    pub fn seen_log(&self) -> Vec<Vec<MessageId>> {
        self.lock().seen_log.clone()
    }

    pub fn message(&self, message_id: MessageId) -> Option<Message> {
        let g = self.lock();
        g.chats
            .values()
            .flat_map(|log| log.messages.iter())
            .find(|m| m.id == message_id)
            .cloned()
    }

    fn check_available(g: &MemoryState) -> Result<(), BackendError> {
        match &g.unavailable {
            Some(reason) => Err(BackendError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

fn records(log: &ChatLog, day_markers: bool) -> Vec<MessageRecord> {
    let mut out = Vec::with_capacity(log.messages.len());
    let mut last_day = None;
    for m in &log.messages {
        if day_markers {
            let day = m.timestamp.div_euclid(SECONDS_PER_DAY);
            if last_day != Some(day) {
                out.push(MessageRecord::DayMarker {
                    timestamp: day * SECONDS_PER_DAY,
                });
                last_day = Some(day);
            }
        }
        out.push(MessageRecord::Message(m.clone()));
    }
    out
}

fn record_id(record: &MessageRecord) -> MessageId {
    match record {
        MessageRecord::DayMarker { .. } => DAYMARKER_MESSAGE_ID,
        MessageRecord::Message(m) => m.id,
    }
}

#[async_trait]
impl MessagingBackend for InMemoryBackend {
    async fn get_message_id_sequence(
        &self,
        chat_id: ChatId,
    ) -> Result<Vec<MessageId>, BackendError> {
        let g = self.lock();
        Self::check_available(&g)?;
        let log = g
            .chats
            .get(&chat_id)
            .ok_or(BackendError::ChatNotFound(chat_id))?;
        Ok(records(log, g.day_markers).iter().map(record_id).collect())
    }

    async fn get_unread_message_ids(
        &self,
        chat_id: ChatId,
    ) -> Result<Vec<MessageId>, BackendError> {
        let g = self.lock();
        Self::check_available(&g)?;
        let log = g
            .chats
            .get(&chat_id)
            .ok_or(BackendError::ChatNotFound(chat_id))?;
        Ok(log
            .messages
            .iter()
            .filter(|m| m.direction == Direction::Incoming && m.state.is_unread())
            .map(|m| m.id)
            .collect())
    }

    async fn get_messages_by_index_range(
        &self,
        chat_id: ChatId,
        start: usize,
        end: usize,
        _marker_one: &MarkerOne,
    ) -> Result<Vec<MessageRecord>, BackendError> {
        let gate = self.lock().gate.clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let mut g = self.lock();
        Self::check_available(&g)?;
        let log = g
            .chats
            .get(&chat_id)
            .ok_or(BackendError::ChatNotFound(chat_id))?;
        let all = records(log, g.day_markers);
        if start > end || end >= all.len() {
            return Err(BackendError::IndexOutOfRange {
                start,
                end,
                len: all.len(),
            });
        }
        let page = all[start..=end].to_vec();
        g.fetch_log.push(FetchRecord {
            chat_id,
            start,
            end,
        });
        Ok(page)
    }

    async fn mark_seen(&self, message_ids: &[MessageId]) -> Result<(), BackendError> {
        let mut g = self.lock();
        Self::check_available(&g)?;
        for log in g.chats.values_mut() {
            for m in log.messages.iter_mut() {
                if m.state.is_unread() && message_ids.contains(&m.id) {
                    m.state = MessageState::InSeen;
                }
            }
        }
        g.seen_log.push(message_ids.to_vec());
        Ok(())
    }

    async fn send_message(
        &self,
        chat_id: ChatId,
        params: SendMessageParams,
    ) -> Result<(MessageId, MessageRecord), BackendError> {
        let failing = {
            let g = self.lock();
            Self::check_available(&g)?;
            if !g.chats.contains_key(&chat_id) {
                return Err(BackendError::ChatNotFound(chat_id));
            }
            g.failing_chats.contains(&chat_id)
        };
        let timestamp = chrono::Utc::now().timestamp();

        let (message_id, record) = if failing {
            let record = MessageRecord::Message(Message {
                id: 0,
                chat_id,
                from_id: SELF_CONTACT_ID,
                text: params.text,
                timestamp,
                direction: Direction::Outgoing,
                state: MessageState::OutFailed,
                quote_message_id: params.quote_message_id,
            });
            (0, record)
        } else {
            let ts = self
                .last_timestamp(chat_id)
                .map(|t| t.max(timestamp))
                .unwrap_or(timestamp);
            let id = self.push_message(
                chat_id,
                Direction::Outgoing,
                params.text,
                ts,
                MessageState::OutPending,
            );
            let mut g = self.lock();
            let message = g
                .chats
                .get_mut(&chat_id)
                .and_then(|log| log.messages.iter_mut().find(|m| m.id == id))
                .ok_or(BackendError::MessageNotFound(id))?;
            message.quote_message_id = params.quote_message_id;
            (id, MessageRecord::Message(message.clone()))
        };

        self.emit(BackendEvent::MessagesChanged { chat_id });
        Ok((message_id, record))
    }

    async fn delete_message(&self, message_id: MessageId) -> Result<(), BackendError> {
        let chat_id = {
            let mut g = self.lock();
            Self::check_available(&g)?;
            let mut found = None;
            for (chat_id, log) in g.chats.iter_mut() {
                if let Some(pos) = log.messages.iter().position(|m| m.id == message_id) {
                    log.messages.remove(pos);
                    found = Some(*chat_id);
                    break;
                }
            }
            found.ok_or(BackendError::MessageNotFound(message_id))?
        };
        self.emit(BackendEvent::MessagesChanged { chat_id });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn day_markers_are_inserted_when_the_day_changes() {
        let backend = InMemoryBackend::new().with_day_markers(true);
        backend.add_outgoing(1, "a", 0);
        backend.add_outgoing(1, "b", 60);
        backend.add_outgoing(1, "c", SECONDS_PER_DAY + 5);

        let ids = backend.get_message_id_sequence(1).await.expect("ids");
        assert_eq!(ids.len(), 5);
        assert_eq!(ids[0], DAYMARKER_MESSAGE_ID);
        assert_eq!(ids[3], DAYMARKER_MESSAGE_ID);

        let page = backend
            .get_messages_by_index_range(1, 3, 4, &MarkerOne::new())
            .await
            .expect("page");
        assert!(matches!(page[0], MessageRecord::DayMarker { .. }));
        assert_eq!(page[1].message().map(|m| m.text.as_str()), Some("c"));
    }

    #[tokio::test]
    async fn out_of_range_fetch_is_rejected() {
        let backend = InMemoryBackend::new();
        backend.seed_chat(1, 3);
        let err = backend
            .get_messages_by_index_range(1, 1, 3, &MarkerOne::new())
            .await
            .expect_err("end index past the sequence");
        assert_eq!(
            err,
            BackendError::IndexOutOfRange {
                start: 1,
                end: 3,
                len: 3
            }
        );
    }

    #[tokio::test]
    async fn unread_ids_follow_mark_seen() {
        let backend = InMemoryBackend::new();
        let ids = backend.seed_chat(1, 4);
        backend.mark_unread(&ids[2..]);
        assert_eq!(
            backend.get_unread_message_ids(1).await.expect("unread"),
            vec![ids[2]]
        );

        backend.mark_seen(&[ids[2]]).await.expect("mark seen");
        assert!(backend.get_unread_message_ids(1).await.expect("unread").is_empty());
        assert_eq!(backend.seen_log(), vec![vec![ids[2]]]);
    }

    #[tokio::test]
    async fn failed_send_reports_id_zero_and_still_announces_change() {
        let backend = InMemoryBackend::new();
        backend.seed_chat(7, 2);
        backend.fail_sends_in(7);
        let events = backend.events();

        let (id, record) = backend
            .send_message(7, SendMessageParams::text("hi"))
            .await
            .expect("send");
        assert_eq!(id, 0);
        assert_eq!(
            record.message().map(|m| m.state),
            Some(MessageState::OutFailed)
        );
        assert_eq!(
            events.try_recv().ok(),
            Some(BackendEvent::MessagesChanged { chat_id: 7 })
        );
        assert_eq!(backend.get_message_id_sequence(7).await.expect("ids").len(), 2);
    }

    #[tokio::test]
    async fn status_changes_emit_events() {
        let backend = InMemoryBackend::new();
        let ids = backend.seed_chat(3, 2);
        let events = backend.events();

        backend.deliver(ids[1]);
        backend.read(ids[1]);
        backend.fail(999);

        let got: Vec<_> = events.drain().collect();
        assert_eq!(
            got,
            vec![
                BackendEvent::MessageDelivered {
                    chat_id: 3,
                    message_id: ids[1]
                },
                BackendEvent::MessageRead {
                    chat_id: 3,
                    message_id: ids[1]
                },
            ]
        );
        assert_eq!(
            backend.message(ids[1]).map(|m| m.state),
            Some(MessageState::OutMdnRcvd)
        );
    }

    #[tokio::test]
    async fn unavailable_engine_fails_every_call() {
        let backend = InMemoryBackend::new();
        backend.seed_chat(1, 1);
        backend.set_unavailable(Some("offline"));
        assert!(matches!(
            backend.get_message_id_sequence(1).await,
            Err(BackendError::Unavailable(_))
        ));
        backend.set_unavailable(None);
        assert!(backend.get_message_id_sequence(1).await.is_ok());
    }
}
