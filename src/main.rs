//! Headless sync daemon: signs in with credentials from the environment and
//! runs the poll loop until the session ends or the process is interrupted.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use conectoca_sync::{
    logging, AppEvent, EngineConfig, EventBus, HttpBackend, LogAlerts, SessionEndReason,
    SessionStore, SyncEngine, ToastLevel,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let _log_guard = logging::init().context("set up logging")?;

    let config = EngineConfig::from_env().context("load configuration")?;
    let backend = Arc::new(
        HttpBackend::new(&config.backend_url, &config.anon_key)
            .context("create backend client")?,
    );

    let events = EventBus::default();
    let engine = Arc::new(SyncEngine::new(
        backend,
        SessionStore::keyring(),
        Arc::new(LogAlerts),
        events.clone(),
        config,
    ));

    spawn_event_logger(&events);

    let user = match engine.restore_session().await? {
        Some(user) => user,
        None => {
            let email = std::env::var("CONECTOCA_EMAIL").context("CONECTOCA_EMAIL is not set")?;
            let password = Zeroizing::new(
                std::env::var("CONECTOCA_PASSWORD").context("CONECTOCA_PASSWORD is not set")?,
            );
            engine.sign_in(&email, &password).await?
        }
    };
    info!(user_id = %user.id, role = user.role.as_str(), "ready");

    // No user gesture in a daemon; audible cues map to log lines anyway.
    engine.unlock_audio();

    let handle = engine.clone().start();

    let mut session_events = events.subscribe();
    let session_end = async move {
        loop {
            match session_events.recv().await {
                Ok(AppEvent::SessionEnded { reason }) => break reason,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break SessionEndReason::SignedOut,
            }
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => info!("interrupt received, shutting down"),
        reason = session_end => info!(reason = ?reason, "session ended, shutting down"),
    }

    handle.stop().await;
    Ok(())
}

/// Mirror engine events into the log, the way a desktop shell would mirror
/// them into its UI.
fn spawn_event_logger(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(AppEvent::OrdersUpdated { count, page }) => {
                    info!(count, page, "orders updated");
                }
                Ok(AppEvent::Toast { level, message, .. }) => match level {
                    ToastLevel::Error => error!(%message, "toast"),
                    ToastLevel::Warning => warn!(%message, "toast"),
                    _ => info!(%message, "toast"),
                },
                Ok(AppEvent::AudioUnlockRequired) => {}
                Ok(AppEvent::SessionEnded { .. }) => break,
                Ok(AppEvent::SyncStatus {
                    page, total_pages, ..
                }) => {
                    debug!(page, total_pages, "sync heartbeat");
                }
                Ok(AppEvent::NotificationsUpdated { unread, total }) => {
                    debug!(unread, total, "notification panel updated");
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
