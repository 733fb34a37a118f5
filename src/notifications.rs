//! Notification panel state.
//!
//! The panel list is refreshed from the backend after every successful order
//! poll. Stock alerts (warning/error rows whose title mentions stock) that
//! were not in the previous snapshot get surfaced as toasts; the seen-id set
//! is then replaced wholesale, so an item that disappears and later comes
//! back counts as fresh again.

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::debug;

use crate::api::Backend;
use crate::auth::{AuthSnapshot, AuthState};
use crate::error::ApiError;
use crate::events::{AppEvent, EventBus, ToastLevel};
use crate::models::{Notification, NotificationKind};

/// Case-insensitive marker that makes a warning/error row a stock alert.
const STOCK_MARKER: &str = "stock";

#[derive(Default)]
struct CenterInner {
    items: Vec<Notification>,
    seen_ids: HashSet<String>,
}

/// Session-scoped notification panel state.
#[derive(Default)]
pub struct NotificationCenter {
    inner: Mutex<CenterInner>,
}

fn is_stock_alert(n: &Notification) -> bool {
    matches!(
        n.kind,
        NotificationKind::Warning | NotificationKind::Error
    ) && n.title.to_lowercase().contains(STOCK_MARKER)
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pull the current list from the backend and replace the panel state.
    /// Fetch errors are returned to the caller; the previous snapshot stays
    /// in place in that case. A response that resolves after the session
    /// changed is discarded without touching the panel.
    pub async fn refresh(
        &self,
        backend: &dyn Backend,
        auth: &AuthState,
        snapshot: &AuthSnapshot,
        events: &EventBus,
    ) -> Result<(), ApiError> {
        let fetched = backend.fetch_notifications(&snapshot.token).await?;

        let (fresh, unread, total) = {
            let mut inner = self.inner.lock().unwrap();
            if auth.epoch() != snapshot.epoch {
                debug!("session changed during notification fetch, discarding results");
                return Ok(());
            }
            let fresh: Vec<Notification> = fetched
                .iter()
                .filter(|n| is_stock_alert(n) && !inner.seen_ids.contains(&n.id))
                .cloned()
                .collect();
            inner.seen_ids = fetched.iter().map(|n| n.id.clone()).collect();
            inner.items = fetched;
            let unread = inner.items.iter().filter(|n| !n.read).count();
            (fresh, unread, inner.items.len())
        };

        for alert in &fresh {
            let level = match alert.kind {
                NotificationKind::Error => ToastLevel::Error,
                _ => ToastLevel::Warning,
            };
            let message = if alert.message.is_empty() {
                alert.title.clone()
            } else {
                format!("{}: {}", alert.title, alert.message)
            };
            events.toast(level, message);
        }
        events.emit(AppEvent::NotificationsUpdated { unread, total });
        Ok(())
    }

    /// Mark one notification read on the backend, then locally.
    pub async fn mark_read(
        &self,
        backend: &dyn Backend,
        token: &str,
        id: &str,
        events: &EventBus,
    ) -> Result<(), ApiError> {
        backend.mark_notification_read(token, id).await?;
        let (unread, total) = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(item) = inner.items.iter_mut().find(|n| n.id == id) {
                item.read = true;
            }
            (
                inner.items.iter().filter(|n| !n.read).count(),
                inner.items.len(),
            )
        };
        events.emit(AppEvent::NotificationsUpdated { unread, total });
        Ok(())
    }

    pub async fn mark_all_read(
        &self,
        backend: &dyn Backend,
        token: &str,
        events: &EventBus,
    ) -> Result<(), ApiError> {
        backend.mark_all_notifications_read(token).await?;
        let total = {
            let mut inner = self.inner.lock().unwrap();
            for item in inner.items.iter_mut() {
                item.read = true;
            }
            inner.items.len()
        };
        events.emit(AppEvent::NotificationsUpdated { unread: 0, total });
        Ok(())
    }

    pub async fn delete(
        &self,
        backend: &dyn Backend,
        token: &str,
        id: &str,
        events: &EventBus,
    ) -> Result<(), ApiError> {
        backend.delete_notification(token, id).await?;
        let (unread, total) = {
            let mut inner = self.inner.lock().unwrap();
            inner.items.retain(|n| n.id != id);
            (
                inner.items.iter().filter(|n| !n.read).count(),
                inner.items.len(),
            )
        };
        events.emit(AppEvent::NotificationsUpdated { unread, total });
        Ok(())
    }

    /// Current panel content, newest-first as the backend returned it.
    pub fn items(&self) -> Vec<Notification> {
        self.inner.lock().unwrap().items.clone()
    }

    pub fn unread_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .items
            .iter()
            .filter(|n| !n.read)
            .count()
    }

    /// Drop everything, including the seen-id set. Used on sign-out.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.clear();
        inner.seen_ids.clear();
    }
}
