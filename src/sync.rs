//! Order synchronization and alert dispatch.
//!
//! A background loop polls the backend order list on a fixed cadence. Each
//! cycle diffs the fetched page against the ids already seen this session:
//! unseen ids turn into one batched new-order alert, and watched status
//! transitions into per-order alerts. A payload with no material field
//! changes is discarded without a re-render. The first cycle of a session
//! only seeds the known-id set, so alerts start from the second cycle.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::alerts::AlertSink;
use crate::api::Backend;
use crate::auth::{token_expired, token_expiry, AuthSnapshot, AuthState, Session};
use crate::config::EngineConfig;
use crate::error::ApiError;
use crate::events::{AppEvent, EventBus, SessionEndReason, ToastLevel};
use crate::models::{
    NewNotification, Notification, NotificationKind, Order, OrderPage, OrderStatus, Pagination,
    User,
};
use crate::notifications::NotificationCenter;
use crate::storage::SessionStore;

/// Transitions into one of these statuses raise a status-change alert.
const ALERT_STATUSES: [OrderStatus; 3] = [
    OrderStatus::Completed,
    OrderStatus::InProgress,
    OrderStatus::Dispatched,
];

const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";

// ---------------------------------------------------------------------------
// Cycle bookkeeping
// ---------------------------------------------------------------------------

/// Why a poll cycle runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrigin {
    /// First fetch after sign-in or session restore.
    Initial,
    /// Timed tick of the background loop.
    Background,
    /// Direct user action: a refresh or a page change.
    Manual,
}

impl FetchOrigin {
    /// Foreground cycles surface their errors; background ones stay quiet.
    fn is_foreground(self) -> bool {
        !matches!(self, FetchOrigin::Background)
    }
}

/// What a poll cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// New data was committed and announced.
    Applied,
    /// The fetch succeeded but changed nothing worth re-rendering.
    Unchanged,
    /// The cycle was abandoned without touching state: no session, or a
    /// newer session took over while it ran.
    Skipped,
    /// The backend rejected the session; it has been torn down.
    SessionClosed,
    /// The fetch failed; state is untouched.
    Failed,
}

/// Everything a session accumulates between polls. Reset wholesale on any
/// session boundary.
struct SyncStateInner {
    /// Ids seen at least once this session.
    known_order_ids: HashSet<String>,
    /// The list as last committed, in backend order.
    orders: Vec<Order>,
    /// Currently displayed page, 1-based.
    page: u32,
    pagination: Pagination,
    /// False until the first fetch of the session commits.
    initialized: bool,
    last_synced: Option<DateTime<Utc>>,
    audio_unlocked: bool,
    audio_prompt_sent: bool,
}

impl SyncStateInner {
    fn new() -> Self {
        Self {
            known_order_ids: HashSet::new(),
            orders: Vec::new(),
            page: 1,
            pagination: Pagination::default(),
            initialized: false,
            last_synced: None,
            audio_unlocked: false,
            audio_prompt_sent: false,
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

/// An order observed moving into a watched status.
struct StatusTransition {
    order: Order,
    from: OrderStatus,
    to: OrderStatus,
}

/// What one committed fetch changed.
struct CycleDelta {
    seeded: bool,
    new_orders: Vec<Order>,
    transitions: Vec<StatusTransition>,
    changed: bool,
}

/// What the audio gate allows for this batch of alerts.
enum CueGate {
    Play,
    Prompt,
    Silent,
}

/// Field-by-field comparison of the displayed list against a fetched one.
/// Only fields that affect the rendered panel participate.
fn orders_materially_differ(current: &[Order], fetched: &[Order]) -> bool {
    if current.len() != fetched.len() {
        return true;
    }
    let by_id: HashMap<&str, &Order> = current.iter().map(|o| (o.id.as_str(), o)).collect();
    fetched.iter().any(|order| match by_id.get(order.id.as_str()) {
        Some(prev) => {
            prev.status != order.status
                || prev.progress != order.progress
                || prev.deadline != order.deadline
                || prev.delivery_address != order.delivery_address
        }
        None => true,
    })
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The order synchronization engine. One instance per process, shared behind
/// an [`Arc`] between the background loop and whatever frontend is attached.
pub struct SyncEngine {
    backend: Arc<dyn Backend>,
    store: SessionStore,
    auth: AuthState,
    alerts: Arc<dyn AlertSink>,
    events: EventBus,
    config: EngineConfig,
    state: Mutex<SyncStateInner>,
    notifications: NotificationCenter,
    /// Serializes poll cycles; a tick that finds one in flight skips.
    poll_gate: AsyncMutex<()>,
}

impl SyncEngine {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: SessionStore,
        alerts: Arc<dyn AlertSink>,
        events: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            backend,
            store,
            auth: AuthState::new(),
            alerts,
            events,
            config,
            state: Mutex::new(SyncStateInner::new()),
            notifications: NotificationCenter::new(),
            poll_gate: AsyncMutex::new(()),
        }
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    /// Authenticate against the backend and install the session. Sync state
    /// from any previous session is discarded.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let response = self.backend.sign_in(email, password).await?;

        if let Err(e) = self
            .store
            .save_session(&response.access_token, &response.user)
        {
            warn!(error = %e, "could not persist session, continuing in memory");
        }

        let expires_at = token_expiry(&response.access_token);
        let user = response.user.clone();
        self.auth.set_session(Session {
            user: response.user,
            access_token: response.access_token,
            expires_at,
        });
        self.reset_sync_state();
        self.notifications.clear();

        info!(user_id = %user.id, role = user.role.as_str(), "signed in");
        Ok(user)
    }

    /// Resume the session stored by a previous run. Returns `Ok(None)` when
    /// there is nothing usable to resume; transient errors bubble up so the
    /// caller can retry instead of discarding stored credentials.
    pub async fn restore_session(&self) -> Result<Option<User>, ApiError> {
        let Some((token, _)) = self.store.load_session() else {
            return Ok(None);
        };

        if token_expired(&token) {
            info!("stored session has expired, clearing it");
            if let Err(e) = self.store.clear() {
                warn!(error = %e, "could not clear expired session");
            }
            return Ok(None);
        }

        match self.backend.current_user(&token).await {
            Ok(user) => {
                let expires_at = token_expiry(&token);
                self.auth.set_session(Session {
                    user: user.clone(),
                    access_token: token,
                    expires_at,
                });
                self.reset_sync_state();
                self.notifications.clear();
                info!(user_id = %user.id, role = user.role.as_str(), "session restored");
                Ok(Some(user))
            }
            Err(e) if e.is_auth_error() => {
                info!("stored session was rejected by the backend, clearing it");
                if let Err(e) = self.store.clear() {
                    warn!(error = %e, "could not clear rejected session");
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// User-initiated sign-out. Best-effort against the backend; local
    /// teardown happens regardless.
    pub async fn sign_out(&self) {
        if let Some(snapshot) = self.auth.snapshot() {
            if let Err(e) = self.backend.sign_out(&snapshot.token).await {
                debug!(error = %e, "backend sign-out failed, continuing local teardown");
            }
        }
        self.close_session(SessionEndReason::SignedOut, false);
        info!("signed out");
    }

    /// Local teardown shared by sign-out and expiry: stored credentials, the
    /// in-memory session, sync state and the notification panel all go.
    fn close_session(&self, reason: SessionEndReason, notify_user: bool) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "could not clear stored session");
        }
        self.auth.clear();
        self.reset_sync_state();
        self.notifications.clear();

        if notify_user {
            self.events.toast(ToastLevel::Error, SESSION_EXPIRED_MESSAGE);
        }
        self.events.emit(AppEvent::SessionEnded { reason });
    }

    fn reset_sync_state(&self) {
        self.state.lock().unwrap().reset();
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn current_user(&self) -> Option<User> {
        self.auth.current_user()
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    /// The committed order list, in backend order.
    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().unwrap().orders.clone()
    }

    pub fn page(&self) -> u32 {
        self.state.lock().unwrap().page
    }

    pub fn pagination(&self) -> Pagination {
        self.state.lock().unwrap().pagination
    }

    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        self.state.lock().unwrap().last_synced
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.items()
    }

    pub fn unread_notifications(&self) -> usize {
        self.notifications.unread_count()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The host saw a user gesture; audible cues may play from now on.
    pub fn unlock_audio(&self) {
        self.state.lock().unwrap().audio_unlocked = true;
    }

    // -----------------------------------------------------------------------
    // User-driven operations
    // -----------------------------------------------------------------------

    /// Re-fetch immediately instead of waiting for the next tick.
    pub async fn refresh_now(&self) -> PollOutcome {
        self.poll(FetchOrigin::Manual).await
    }

    /// Switch the displayed page and fetch it. The chosen page then sticks
    /// for subsequent background cycles. Pages are 1-based; zero clamps up.
    pub async fn set_page(&self, page: u32) -> PollOutcome {
        self.state.lock().unwrap().page = page.max(1);
        self.poll(FetchOrigin::Manual).await
    }

    /// Push a status change to the backend, then re-fetch so the local list
    /// reflects it.
    pub async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        progress: Option<u8>,
    ) -> Result<(), ApiError> {
        let Some(snapshot) = self.auth.snapshot() else {
            return Err(ApiError::NotSignedIn);
        };

        match self
            .backend
            .update_order_status(&snapshot.token, order_id, status, progress)
            .await
        {
            Ok(()) => {
                info!(order_id, status = status.as_str(), "order status updated");
                self.poll(FetchOrigin::Manual).await;
                Ok(())
            }
            Err(e) if e.is_auth_error() => {
                if self.auth.epoch() == snapshot.epoch {
                    self.close_session(SessionEndReason::Expired, true);
                }
                Err(e)
            }
            Err(e) => {
                self.events
                    .toast(ToastLevel::Error, format!("Could not update order: {e}"));
                Err(e)
            }
        }
    }

    /// Persist a notification for other devices to pick up.
    pub async fn create_notification(
        &self,
        notification: &NewNotification,
    ) -> Result<(), ApiError> {
        let Some(snapshot) = self.auth.snapshot() else {
            return Err(ApiError::NotSignedIn);
        };
        self.backend
            .create_notification(&snapshot.token, notification)
            .await
    }

    pub async fn mark_notification_read(&self, id: &str) -> Result<(), ApiError> {
        let Some(snapshot) = self.auth.snapshot() else {
            return Err(ApiError::NotSignedIn);
        };
        self.notifications
            .mark_read(self.backend.as_ref(), &snapshot.token, id, &self.events)
            .await
    }

    pub async fn mark_all_notifications_read(&self) -> Result<(), ApiError> {
        let Some(snapshot) = self.auth.snapshot() else {
            return Err(ApiError::NotSignedIn);
        };
        self.notifications
            .mark_all_read(self.backend.as_ref(), &snapshot.token, &self.events)
            .await
    }

    pub async fn delete_notification(&self, id: &str) -> Result<(), ApiError> {
        let Some(snapshot) = self.auth.snapshot() else {
            return Err(ApiError::NotSignedIn);
        };
        self.notifications
            .delete(self.backend.as_ref(), &snapshot.token, id, &self.events)
            .await
    }

    // -----------------------------------------------------------------------
    // Poll cycle
    // -----------------------------------------------------------------------

    /// Run one sync cycle: fetch the current page, commit the diff, dispatch
    /// whatever alerts the diff produced, then refresh the notification
    /// panel.
    pub async fn poll(&self, origin: FetchOrigin) -> PollOutcome {
        let Some(snapshot) = self.auth.snapshot() else {
            return PollOutcome::Skipped;
        };
        let Ok(_gate) = self.poll_gate.try_lock() else {
            debug!("poll already in flight, skipping this cycle");
            return PollOutcome::Skipped;
        };

        let page = self.state.lock().unwrap().page;
        let fetched = match self
            .backend
            .fetch_orders(&snapshot.token, page, self.config.page_size)
            .await
        {
            Ok(fetched) => fetched,
            Err(e) => return self.handle_poll_error(e, &snapshot, origin),
        };

        let Some(delta) = self.commit_fetch(fetched, &snapshot, origin) else {
            debug!("session changed during fetch, discarding results");
            return PollOutcome::Skipped;
        };

        if delta.seeded {
            self.emit_orders_updated();
        } else {
            if !delta.new_orders.is_empty() && snapshot.role.receives_new_order_alerts() {
                self.dispatch_new_order_alerts(&delta.new_orders, &snapshot)
                    .await;
            }
            if !delta.transitions.is_empty() && snapshot.role.receives_status_alerts() {
                self.dispatch_status_alerts(&delta.transitions);
            }
            if delta.changed {
                self.emit_orders_updated();
            }
        }

        // The notification panel rides on every successful cycle.
        if let Err(e) = self
            .notifications
            .refresh(self.backend.as_ref(), &self.auth, &snapshot, &self.events)
            .await
        {
            if e.is_auth_error() && self.auth.epoch() == snapshot.epoch {
                warn!("backend rejected the session during notification refresh");
                self.close_session(SessionEndReason::Expired, origin.is_foreground());
                return PollOutcome::SessionClosed;
            }
            debug!(error = %e, "notification refresh failed");
        }

        if self.auth.epoch() != snapshot.epoch {
            debug!("session changed during the cycle, dropping the status emit");
            return PollOutcome::Skipped;
        }
        self.emit_sync_status();

        if delta.seeded || delta.changed {
            PollOutcome::Applied
        } else {
            PollOutcome::Unchanged
        }
    }

    /// Fold a fetched page into the session state. Returns `None` when the
    /// session changed while the fetch was in flight.
    fn commit_fetch(
        &self,
        fetched: OrderPage,
        snapshot: &AuthSnapshot,
        origin: FetchOrigin,
    ) -> Option<CycleDelta> {
        let mut state = self.state.lock().unwrap();
        if self.auth.epoch() != snapshot.epoch {
            return None;
        }

        let seeded = !state.initialized;
        let mut new_orders = Vec::new();
        let mut transitions = Vec::new();

        if seeded {
            info!(
                count = fetched.orders.len(),
                page = state.page,
                "first fetch of the session, seeding known orders without alerts"
            );
        } else {
            for order in &fetched.orders {
                if !state.known_order_ids.contains(&order.id) {
                    new_orders.push(order.clone());
                }
            }
            let previous: HashMap<&str, OrderStatus> = state
                .orders
                .iter()
                .map(|o| (o.id.as_str(), o.status))
                .collect();
            for order in &fetched.orders {
                if let Some(&from) = previous.get(order.id.as_str()) {
                    if from != order.status && ALERT_STATUSES.contains(&order.status) {
                        transitions.push(StatusTransition {
                            order: order.clone(),
                            from,
                            to: order.status,
                        });
                    }
                }
            }
        }

        // Ids are recorded before any alert goes out, so a failed alert can
        // never repeat on the next cycle.
        for order in &fetched.orders {
            state.known_order_ids.insert(order.id.clone());
        }

        // Foreground fetches always re-render; only an unchanged background
        // cycle leaves the displayed list alone.
        let changed = seeded
            || origin.is_foreground()
            || orders_materially_differ(&state.orders, &fetched.orders);
        if changed {
            state.orders = fetched.orders;
        }
        state.pagination = fetched.pagination;
        state.initialized = true;
        state.last_synced = Some(Utc::now());

        Some(CycleDelta {
            seeded,
            new_orders,
            transitions,
            changed: changed && !seeded,
        })
    }

    fn handle_poll_error(
        &self,
        error: ApiError,
        snapshot: &AuthSnapshot,
        origin: FetchOrigin,
    ) -> PollOutcome {
        if error.is_auth_error() {
            // Tear down only the session the failure belongs to.
            if self.auth.epoch() == snapshot.epoch {
                warn!("backend rejected the session, signing out");
                self.close_session(SessionEndReason::Expired, origin.is_foreground());
                return PollOutcome::SessionClosed;
            }
            return PollOutcome::Skipped;
        }

        if origin.is_foreground() {
            warn!(error = %error, "order fetch failed");
            self.events
                .toast(ToastLevel::Error, format!("Could not load orders: {error}"));
        } else {
            // Background hiccups resolve themselves by the next tick.
            debug!(error = %error, "background order fetch failed");
        }
        PollOutcome::Failed
    }

    // -----------------------------------------------------------------------
    // Alert dispatch
    // -----------------------------------------------------------------------

    /// Audio is gated on a user gesture. The unlock prompt goes out at most
    /// once per session.
    fn audio_gate(&self) -> CueGate {
        let mut state = self.state.lock().unwrap();
        if state.audio_unlocked {
            return CueGate::Play;
        }
        if !state.audio_prompt_sent {
            state.audio_prompt_sent = true;
            return CueGate::Prompt;
        }
        CueGate::Silent
    }

    /// One batch of alerts for all unseen orders of this cycle: a single
    /// cue, a single platform notification and a single count toast, plus
    /// one persisted notification per order.
    async fn dispatch_new_order_alerts(&self, new_orders: &[Order], snapshot: &AuthSnapshot) {
        let count = new_orders.len();
        info!(count, "new orders detected");

        match self.audio_gate() {
            CueGate::Play => {
                if let Err(e) = self.alerts.new_order_cue() {
                    warn!(error = %e, "new order cue failed");
                }
            }
            CueGate::Prompt => self.events.emit(AppEvent::AudioUnlockRequired),
            CueGate::Silent => {}
        }

        let (title, body) = if count == 1 {
            let order = &new_orders[0];
            (
                format!("New order from {}", order.display_name()),
                order.product_summary.clone(),
            )
        } else {
            let names = new_orders
                .iter()
                .map(|o| o.display_name().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            (format!("{count} new orders received"), names)
        };
        if let Err(e) = self.alerts.push_notification(&title, &body) {
            warn!(error = %e, "platform notification failed");
        }

        let message = if count == 1 {
            "1 new order received".to_string()
        } else {
            format!("{count} new orders received")
        };
        self.events.toast(ToastLevel::Info, message);

        for order in new_orders {
            let message = if order.product_summary.is_empty() {
                format!("Order {}", order.id)
            } else {
                order.product_summary.clone()
            };
            let notification = NewNotification::new(
                NotificationKind::OrderCreated,
                format!("New order from {}", order.display_name()),
                message,
            )
            .for_order(order.id.clone());
            if let Err(e) = self
                .backend
                .create_notification(&snapshot.token, &notification)
                .await
            {
                warn!(order_id = %order.id, error = %e, "could not persist order notification");
            }
        }
    }

    /// Per-order platform notifications for watched transitions. One cue for
    /// the batch, no toast.
    fn dispatch_status_alerts(&self, transitions: &[StatusTransition]) {
        match self.audio_gate() {
            CueGate::Play => {
                if let Err(e) = self.alerts.status_change_cue() {
                    warn!(error = %e, "status change cue failed");
                }
            }
            CueGate::Prompt => self.events.emit(AppEvent::AudioUnlockRequired),
            CueGate::Silent => {}
        }

        for transition in transitions {
            info!(
                order_id = %transition.order.id,
                from = transition.from.as_str(),
                to = transition.to.as_str(),
                "order status changed"
            );
            let subject = if transition.order.product_summary.is_empty() {
                format!("Order {}", transition.order.id)
            } else {
                transition.order.product_summary.clone()
            };
            let body = format!("{subject} is now {}", transition.to.label().to_lowercase());
            if let Err(e) = self.alerts.push_notification("Order update", &body) {
                warn!(error = %e, "platform notification failed");
            }
        }
    }

    fn emit_orders_updated(&self) {
        let (count, page) = {
            let state = self.state.lock().unwrap();
            (state.orders.len(), state.page)
        };
        self.events.emit(AppEvent::OrdersUpdated { count, page });
    }

    fn emit_sync_status(&self) {
        let (last_synced, page, total_pages) = {
            let state = self.state.lock().unwrap();
            (state.last_synced, state.page, state.pagination.total_pages)
        };
        self.events.emit(AppEvent::SyncStatus {
            last_synced,
            page,
            total_pages,
        });
    }
}

// ---------------------------------------------------------------------------
// Background loop
// ---------------------------------------------------------------------------

/// Handle for the running poll loop.
pub struct SyncHandle {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl SyncHandle {
    /// Stop the loop and wait for an in-flight cycle to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        self.tracker.wait().await;
    }
}

impl SyncEngine {
    /// Spawn the background poll loop. It runs until it is stopped, the
    /// session ends, or the backend tears the session down.
    pub fn start(self: Arc<Self>) -> SyncHandle {
        let engine = self;
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let loop_cancel = cancel.clone();
        tracker.spawn(async move {
            info!(
                interval_secs = engine.config.poll_interval.as_secs(),
                "sync loop started"
            );
            let mut origin = FetchOrigin::Initial;
            loop {
                if !engine.auth.is_authenticated() {
                    info!("sync loop stopped, signed out");
                    break;
                }
                if engine.poll(origin).await == PollOutcome::SessionClosed {
                    info!("sync loop stopped, session closed");
                    break;
                }
                origin = FetchOrigin::Background;

                tokio::select! {
                    _ = loop_cancel.cancelled() => {
                        info!("sync loop stopped");
                        break;
                    }
                    _ = tokio::time::sleep(engine.config.poll_interval) => {}
                }
            }
        });
        tracker.close();

        SyncHandle { cancel, tracker }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
