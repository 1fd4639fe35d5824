//! Windowed message-list engine for chat views.
//!
//! Only a small window of a chat's history is mounted at a time: a few contiguous pages
//! of message records. [`MessageListStore`] loads, extends and evicts pages through a
//! dispatch engine that refuses overlapping loads and drops stale commits.
//! [`ScrollCoordinator`] runs the deferred scroll actions once a commit has been laid out,
//! and [`ChatView`] wires both to a [`MessagingBackend`] and its event stream.

pub mod app;
pub mod backend;
pub mod config;
pub mod coordinator;
pub mod error;
mod logging;
pub mod message_list;
pub mod store;
pub mod viewport;

pub use app::{ChatView, WindowSummary};
pub use backend::{
    BackendError, BackendEvent, ChatId, InMemoryBackend, MessageId, MessageRecord,
    MessagingBackend, SendMessageParams,
};
pub use config::{load_app_config, AppConfig};
pub use coordinator::{CoordinatorConfig, ScrollCoordinator};
pub use error::WindowError;
pub use logging::{init_logging, LOG_FILE_NAME};
pub use message_list::{
    DispatchAfter, ListAction, MessageKey, MessageListState, MessageListStore, MessagePage,
    PageKey, PAGE_SIZE,
};
pub use store::{DispatchOutcome, RenderBinding, Snapshot, Store};
pub use viewport::{HeadlessViewport, ViewportGeometry};
