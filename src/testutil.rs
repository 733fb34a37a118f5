//! Shared test doubles: a scriptable backend, a recording alert sink and a
//! fully wired engine harness.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::alerts::AlertSink;
use crate::api::{Backend, SignInResponse};
use crate::config::EngineConfig;
use crate::error::ApiError;
use crate::events::EventBus;
use crate::models::{
    NewNotification, Notification, NotificationKind, Order, OrderItem, OrderPage, OrderStatus,
    Pagination, Role, User,
};
use crate::storage::SessionStore;
use crate::sync::SyncEngine;

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub(crate) fn user(role: Role) -> User {
    User {
        id: "u-1".to_string(),
        name: Some("Maria".to_string()),
        email: Some("maria@conectoca.app".to_string()),
        role,
    }
}

pub(crate) fn order(id: &str, status: OrderStatus) -> Order {
    order_with(id, status, 0, None, None)
}

pub(crate) fn order_with(
    id: &str,
    status: OrderStatus,
    progress: u8,
    deadline: Option<&str>,
    address: Option<&str>,
) -> Order {
    Order {
        id: id.to_string(),
        status,
        progress,
        deadline: deadline.map(|d| {
            NaiveDate::parse_from_str(d, "%Y-%m-%d").expect("test deadline should parse")
        }),
        delivery_address: address.map(str::to_string),
        customer_id: None,
        customer_name: Some("Ana".to_string()),
        created_at: None,
        items: vec![OrderItem {
            product_id: None,
            name: "Sourdough".to_string(),
            quantity: 2,
            price: 0.0,
        }],
        product_summary: "2x Sourdough".to_string(),
        total_quantity: 2,
    }
}

pub(crate) fn page_of(orders: Vec<Order>) -> OrderPage {
    OrderPage {
        orders,
        pagination: Pagination::default(),
    }
}

pub(crate) fn notification(id: &str, kind: NotificationKind, title: &str) -> Notification {
    Notification {
        id: id.to_string(),
        kind,
        title: title.to_string(),
        message: String::new(),
        order_id: None,
        read: false,
        created_at: None,
    }
}

// ---------------------------------------------------------------------------
// Recording alert sink
// ---------------------------------------------------------------------------

/// One call observed by [`RecordingAlerts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AlertCall {
    NewOrderCue,
    StatusCue,
    Push(String, String),
}

impl AlertCall {
    pub(crate) fn is_new_order_cue(&self) -> bool {
        matches!(self, AlertCall::NewOrderCue)
    }

    pub(crate) fn is_status_cue(&self) -> bool {
        matches!(self, AlertCall::StatusCue)
    }

    pub(crate) fn is_push(&self) -> bool {
        matches!(self, AlertCall::Push(..))
    }
}

/// Sink that records every call instead of making noise.
#[derive(Default)]
pub(crate) struct RecordingAlerts {
    calls: Mutex<Vec<AlertCall>>,
}

impl RecordingAlerts {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn calls(&self) -> Vec<AlertCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl AlertSink for RecordingAlerts {
    fn new_order_cue(&self) -> Result<(), String> {
        self.calls.lock().unwrap().push(AlertCall::NewOrderCue);
        Ok(())
    }

    fn status_change_cue(&self) -> Result<(), String> {
        self.calls.lock().unwrap().push(AlertCall::StatusCue);
        Ok(())
    }

    fn push_notification(&self, title: &str, body: &str) -> Result<(), String> {
        self.calls
            .lock()
            .unwrap()
            .push(AlertCall::Push(title.to_string(), body.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

/// Backend double driven by per-call scripts. Fetch responses are queued
/// ahead of time; one-shot failures are armed per method; every mutation the
/// engine performs is recorded for assertion.
pub(crate) struct ScriptedBackend {
    user: Mutex<User>,
    fetch_scripts: Mutex<VecDeque<Result<OrderPage, ApiError>>>,
    fetch_pages: Mutex<Vec<u32>>,
    fetch_gate: Mutex<Option<Arc<Notify>>>,
    notification_gate: Mutex<Option<Arc<Notify>>>,
    sign_in_failure: Mutex<Option<ApiError>>,
    current_user_failure: Mutex<Option<ApiError>>,
    status_update_failure: Mutex<Option<ApiError>>,
    notification_failure: Mutex<Option<ApiError>>,
    status_updates: Mutex<Vec<(String, OrderStatus, Option<u8>)>>,
    sign_outs: Mutex<usize>,
    notifications: Mutex<Vec<Notification>>,
    created: Mutex<Vec<NewNotification>>,
    read_marks: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::with_user(user(Role::Production))
    }

    pub(crate) fn with_user(user: User) -> Self {
        Self {
            user: Mutex::new(user),
            fetch_scripts: Mutex::new(VecDeque::new()),
            fetch_pages: Mutex::new(Vec::new()),
            fetch_gate: Mutex::new(None),
            notification_gate: Mutex::new(None),
            sign_in_failure: Mutex::new(None),
            current_user_failure: Mutex::new(None),
            status_update_failure: Mutex::new(None),
            notification_failure: Mutex::new(None),
            status_updates: Mutex::new(Vec::new()),
            sign_outs: Mutex::new(0),
            notifications: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            read_marks: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    /// Queue the response for the next order fetch. An empty queue answers
    /// an empty first page.
    pub(crate) fn push_fetch(&self, result: Result<OrderPage, ApiError>) {
        self.fetch_scripts.lock().unwrap().push_back(result);
    }

    /// Pages requested so far, in call order.
    pub(crate) fn fetch_pages(&self) -> Vec<u32> {
        self.fetch_pages.lock().unwrap().clone()
    }

    /// Park every following order fetch until the returned handle is
    /// notified.
    pub(crate) fn install_fetch_gate(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.fetch_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Park every following notification fetch until the returned handle is
    /// notified.
    pub(crate) fn install_notification_gate(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.notification_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub(crate) fn fail_next_sign_in(&self, error: ApiError) {
        *self.sign_in_failure.lock().unwrap() = Some(error);
    }

    pub(crate) fn fail_next_current_user(&self, error: ApiError) {
        *self.current_user_failure.lock().unwrap() = Some(error);
    }

    pub(crate) fn fail_next_status_update(&self, error: ApiError) {
        *self.status_update_failure.lock().unwrap() = Some(error);
    }

    pub(crate) fn status_updates(&self) -> Vec<(String, OrderStatus, Option<u8>)> {
        self.status_updates.lock().unwrap().clone()
    }

    pub(crate) fn sign_out_count(&self) -> usize {
        *self.sign_outs.lock().unwrap()
    }

    pub(crate) fn set_notifications(&self, items: Vec<Notification>) {
        *self.notifications.lock().unwrap() = items;
    }

    pub(crate) fn push_notification_failure(&self, error: ApiError) {
        *self.notification_failure.lock().unwrap() = Some(error);
    }

    pub(crate) fn created_notifications(&self) -> Vec<NewNotification> {
        self.created.lock().unwrap().clone()
    }

    pub(crate) fn read_marks(&self) -> Vec<String> {
        self.read_marks.lock().unwrap().clone()
    }

    pub(crate) fn deleted_ids(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn sign_in(&self, _email: &str, _password: &str) -> Result<SignInResponse, ApiError> {
        if let Some(error) = self.sign_in_failure.lock().unwrap().take() {
            return Err(error);
        }
        Ok(SignInResponse {
            access_token: "test-token".to_string(),
            user: self.user.lock().unwrap().clone(),
        })
    }

    async fn current_user(&self, _token: &str) -> Result<User, ApiError> {
        if let Some(error) = self.current_user_failure.lock().unwrap().take() {
            return Err(error);
        }
        Ok(self.user.lock().unwrap().clone())
    }

    async fn sign_out(&self, _token: &str) -> Result<(), ApiError> {
        *self.sign_outs.lock().unwrap() += 1;
        Ok(())
    }

    async fn fetch_orders(
        &self,
        _token: &str,
        page: u32,
        _page_size: u32,
    ) -> Result<OrderPage, ApiError> {
        let gate = self.fetch_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.fetch_pages.lock().unwrap().push(page);
        match self.fetch_scripts.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(OrderPage {
                orders: Vec::new(),
                pagination: Pagination::default(),
            }),
        }
    }

    async fn update_order_status(
        &self,
        _token: &str,
        order_id: &str,
        status: OrderStatus,
        progress: Option<u8>,
    ) -> Result<(), ApiError> {
        if let Some(error) = self.status_update_failure.lock().unwrap().take() {
            return Err(error);
        }
        self.status_updates
            .lock()
            .unwrap()
            .push((order_id.to_string(), status, progress));
        Ok(())
    }

    async fn fetch_notifications(&self, _token: &str) -> Result<Vec<Notification>, ApiError> {
        let gate = self.notification_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(error) = self.notification_failure.lock().unwrap().take() {
            return Err(error);
        }
        Ok(self.notifications.lock().unwrap().clone())
    }

    async fn create_notification(
        &self,
        _token: &str,
        notification: &NewNotification,
    ) -> Result<(), ApiError> {
        self.created.lock().unwrap().push(notification.clone());
        Ok(())
    }

    async fn mark_notification_read(&self, _token: &str, id: &str) -> Result<(), ApiError> {
        self.read_marks.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn mark_all_notifications_read(&self, _token: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn delete_notification(&self, _token: &str, id: &str) -> Result<(), ApiError> {
        self.deleted.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine harness
// ---------------------------------------------------------------------------

/// Fully wired engine over scripted doubles, with a file session store in a
/// shared temp directory so [`TestHarness::restarted`] can model a process
/// restart.
pub(crate) struct TestHarness {
    pub(crate) engine: Arc<SyncEngine>,
    pub(crate) backend: Arc<ScriptedBackend>,
    pub(crate) alerts: Arc<RecordingAlerts>,
    pub(crate) events: EventBus,
    pub(crate) store: SessionStore,
    _store_dir: Arc<tempfile::TempDir>,
}

impl TestHarness {
    fn with_store(role: Role, store_dir: Arc<tempfile::TempDir>) -> Self {
        let backend = Arc::new(ScriptedBackend::with_user(user(role)));
        let alerts = Arc::new(RecordingAlerts::new());
        let events = EventBus::default();
        let store = SessionStore::file(store_dir.path());
        let config = EngineConfig::new("https://api.test.conectoca.app", "anon-key");
        let engine = Arc::new(SyncEngine::new(
            backend.clone(),
            store.clone(),
            alerts.clone(),
            events.clone(),
            config,
        ));
        Self {
            engine,
            backend,
            alerts,
            events,
            store,
            _store_dir: store_dir,
        }
    }

    /// Fresh engine and doubles over the same session store, as after a
    /// process restart.
    pub(crate) fn restarted(&self) -> Self {
        let role = self.backend.user.lock().unwrap().role;
        Self::with_store(role, self._store_dir.clone())
    }
}

pub(crate) fn harness() -> TestHarness {
    harness_with_role(Role::Production)
}

pub(crate) fn harness_with_role(role: Role) -> TestHarness {
    TestHarness::with_store(
        role,
        Arc::new(tempfile::tempdir().expect("temp dir for session store")),
    )
}
