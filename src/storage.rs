//! Persistent session storage using the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the Secret Service API. Hosts without a secret service (CI,
//! containers) can fall back to a plain-file store instead.

use keyring::Entry;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::warn;

use crate::error::ApiError;
use crate::models::User;

const SERVICE_NAME: &str = "conectoca-sync";

// Credential keys
const KEY_ACCESS_TOKEN: &str = "access_token";
const KEY_SESSION_USER: &str = "session_user";

/// All credential keys managed by this module.
const ALL_KEYS: &[&str] = &[KEY_ACCESS_TOKEN, KEY_SESSION_USER];

/// Where session credentials live.
#[derive(Debug, Clone)]
pub enum SessionStore {
    /// OS credential store, keyed under the `conectoca-sync` service.
    Keyring,
    /// One file per key inside the given directory.
    File(PathBuf),
}

impl SessionStore {
    pub fn keyring() -> Self {
        SessionStore::Keyring
    }

    pub fn file(dir: impl Into<PathBuf>) -> Self {
        SessionStore::File(dir.into())
    }

    // -----------------------------------------------------------------------
    // Low-level helpers
    // -----------------------------------------------------------------------

    /// Retrieve a single credential. Returns `None` when the entry does not
    /// exist (or the platform returns a "not found" error).
    fn get(&self, key: &str) -> Option<String> {
        match self {
            SessionStore::Keyring => {
                let entry = match Entry::new(SERVICE_NAME, key) {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(key, error = %e, "keyring: failed to create entry");
                        return None;
                    }
                };
                match entry.get_password() {
                    Ok(pw) => Some(pw),
                    Err(keyring::Error::NoEntry) => None,
                    Err(e) => {
                        warn!(key, error = %e, "keyring: failed to read credential");
                        None
                    }
                }
            }
            SessionStore::File(dir) => fs::read_to_string(dir.join(key)).ok(),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ApiError> {
        match self {
            SessionStore::Keyring => {
                let entry =
                    Entry::new(SERVICE_NAME, key).map_err(|e| ApiError::Storage(e.to_string()))?;
                entry
                    .set_password(value)
                    .map_err(|e| ApiError::Storage(e.to_string()))
            }
            SessionStore::File(dir) => {
                fs::create_dir_all(dir).map_err(|e| ApiError::Storage(e.to_string()))?;
                fs::write(dir.join(key), value).map_err(|e| ApiError::Storage(e.to_string()))
            }
        }
    }

    /// Delete a credential. Silently succeeds if the entry does not exist.
    fn delete(&self, key: &str) -> Result<(), ApiError> {
        match self {
            SessionStore::Keyring => {
                let entry =
                    Entry::new(SERVICE_NAME, key).map_err(|e| ApiError::Storage(e.to_string()))?;
                match entry.delete_credential() {
                    Ok(()) => Ok(()),
                    Err(keyring::Error::NoEntry) => Ok(()),
                    Err(e) => Err(ApiError::Storage(e.to_string())),
                }
            }
            SessionStore::File(dir) => match fs::remove_file(dir.join(key)) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(ApiError::Storage(e.to_string())),
            },
        }
    }

    // -----------------------------------------------------------------------
    // High-level API
    // -----------------------------------------------------------------------

    /// Persist the session so a restart can resume without a fresh sign-in.
    pub fn save_session(&self, access_token: &str, user: &User) -> Result<(), ApiError> {
        let user_json = serde_json::to_string(user)
            .map_err(|e| ApiError::Storage(format!("serialize session user: {e}")))?;
        self.set(KEY_ACCESS_TOKEN, access_token)?;
        self.set(KEY_SESSION_USER, &user_json)
    }

    /// Load a previously saved session. Returns `None` when either part is
    /// missing or the stored user no longer parses.
    pub fn load_session(&self) -> Option<(String, User)> {
        let token = self.get(KEY_ACCESS_TOKEN)?;
        let user_json = self.get(KEY_SESSION_USER)?;
        match serde_json::from_str::<User>(&user_json) {
            Ok(user) => Some((token, user)),
            Err(e) => {
                warn!(error = %e, "stored session user is unreadable, ignoring it");
                None
            }
        }
    }

    pub fn has_session(&self) -> bool {
        self.get(KEY_ACCESS_TOKEN).is_some()
    }

    /// Delete every stored credential.
    pub fn clear(&self) -> Result<(), ApiError> {
        for key in ALL_KEYS {
            self.delete(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn test_user() -> User {
        User {
            id: "u-1".to_string(),
            name: Some("Maria".to_string()),
            email: Some("maria@conectoca.app".to_string()),
            role: Role::Production,
        }
    }

    #[test]
    fn file_store_round_trips_a_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::file(dir.path());

        assert!(!store.has_session());
        assert!(store.load_session().is_none());

        store
            .save_session("token-123", &test_user())
            .expect("save should succeed");
        assert!(store.has_session());

        let (token, user) = store.load_session().expect("session should load");
        assert_eq!(token, "token-123");
        assert_eq!(user.id, "u-1");
        assert_eq!(user.role, Role::Production);
    }

    #[test]
    fn clear_removes_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::file(dir.path());
        store
            .save_session("token-123", &test_user())
            .expect("save should succeed");

        store.clear().expect("clear should succeed");
        assert!(!store.has_session());
        assert!(store.load_session().is_none());

        // Clearing an already-empty store is fine.
        store.clear().expect("second clear should succeed");
    }

    #[test]
    fn corrupt_stored_user_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::file(dir.path());
        store.set(KEY_ACCESS_TOKEN, "token-123").expect("set token");
        store
            .set(KEY_SESSION_USER, "{ not json")
            .expect("set user blob");

        assert!(store.load_session().is_none());
    }
}
