//! In-memory session state.
//!
//! The backend session is a bearer token plus the user it belongs to.
//! `AuthState` guards both behind a mutex and stamps every change with a
//! monotonically increasing epoch. Poll cycles snapshot the epoch before
//! their requests go out; results that come back under an older epoch are
//! discarded instead of being committed into a newer session.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;

use crate::models::{Role, User};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// An authenticated backend session.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub access_token: String,
    /// Expiry read from the token itself, when it carries one.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Utc::now() >= at,
            None => false,
        }
    }
}

/// What a poll cycle captures before its requests go out: enough to
/// authenticate, plus the epoch that tells it whether the session changed
/// underneath it.
#[derive(Debug, Clone)]
pub struct AuthSnapshot {
    pub token: String,
    pub role: Role,
    pub epoch: u64,
}

/// Shared session holder.
pub struct AuthState {
    session: Mutex<Option<Session>>,
    epoch: AtomicU64,
}

impl AuthState {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    /// Install a new session. Bumps the epoch so in-flight work started under
    /// the previous session cannot commit its results.
    pub fn set_session(&self, session: Session) {
        let mut guard = self.session.lock().unwrap();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        info!(
            user_id = %session.user.id,
            role = session.user.role.as_str(),
            "session installed"
        );
        *guard = Some(session);
    }

    /// Drop the session, if any. Bumps the epoch.
    pub fn clear(&self) {
        let mut guard = self.session.lock().unwrap();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *guard = None;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.lock().unwrap().is_some()
    }

    pub fn current_user(&self) -> Option<User> {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.user.clone())
    }

    /// Capture token, role and epoch in one consistent read. `None` when
    /// signed out.
    pub fn snapshot(&self) -> Option<AuthSnapshot> {
        let guard = self.session.lock().unwrap();
        guard.as_ref().map(|s| AuthSnapshot {
            token: s.access_token.clone(),
            role: s.user.role,
            epoch: self.epoch.load(Ordering::SeqCst),
        })
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Token inspection
// ---------------------------------------------------------------------------

/// Read the `exp` claim out of a JWT without verifying it. Returns `None`
/// when the token is not a JWT or carries no expiry.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let base64 = payload.replace('-', "+").replace('_', "/");
    let padded = format!(
        "{}{}",
        base64,
        "=".repeat((4usize.wrapping_sub(base64.len() % 4)) % 4)
    );
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

/// `true` only when the token carries an `exp` claim that is in the past.
/// Tokens we cannot read are left for the backend to judge.
pub fn token_expired(token: &str) -> bool {
    match token_expiry(token) {
        Some(at) => Utc::now() >= at,
        None => false,
    }
}
