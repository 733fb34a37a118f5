//! CONECTOCA order sync backend.
//!
//! Polls the bakery backend for order changes on a fixed interval and diffs
//! each page against what the current session has already seen. New orders and
//! watched status transitions fan out through an [`alerts::AlertSink`] and the
//! [`events::EventBus`]; [`sync::SyncEngine`] is the entry point.

pub mod alerts;
pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod notifications;
pub mod storage;
pub mod sync;

#[cfg(test)]
pub(crate) mod testutil;

pub use alerts::{AlertSink, LogAlerts};
pub use api::{Backend, HttpBackend};
pub use config::EngineConfig;
pub use error::ApiError;
pub use events::{AppEvent, EventBus, SessionEndReason, ToastLevel};
pub use models::{
    NewNotification, Notification, NotificationKind, Order, OrderStatus, Pagination, Role, User,
};
pub use storage::SessionStore;
pub use sync::{FetchOrigin, PollOutcome, SyncEngine, SyncHandle};
