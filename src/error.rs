//! Error types for the sync engine.

use thiserror::Error;

/// Errors produced by the backend client and the modules built on top of it.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Required configuration is missing or malformed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An operation that needs a session was called without one.
    #[error("not signed in")]
    NotSignedIn,

    /// The backend rejected the stored credentials (HTTP 401). This is the
    /// only error class that ends the session.
    #[error("session is invalid or expired")]
    Unauthorized,

    /// The signed-in role is not allowed to perform the operation (HTTP 403).
    #[error("{0}")]
    Forbidden(String),

    /// The requested endpoint does not exist on the backend (HTTP 404).
    #[error("backend endpoint not found: {0}")]
    NotFound(String),

    /// Connection-level failure: unreachable host, timeout, bad URL.
    #[error("{0}")]
    Network(String),

    /// The backend answered with a 5xx status.
    #[error("backend server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// Any other non-success HTTP status.
    #[error("unexpected response from backend (HTTP {status}): {message}")]
    Status { status: u16, message: String },

    /// The response body was not the JSON shape we expected.
    #[error("invalid response from backend: {0}")]
    InvalidResponse(String),

    /// The OS credential store (or its file fallback) failed.
    #[error("credential store error: {0}")]
    Storage(String),
}

impl ApiError {
    /// Map an HTTP status code onto the error taxonomy. `message` carries the
    /// detail extracted from the response body, if any.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 => ApiError::Unauthorized,
            403 => {
                if message.is_empty() {
                    ApiError::Forbidden("not allowed for this role".to_string())
                } else {
                    ApiError::Forbidden(message)
                }
            }
            404 => ApiError::NotFound(message),
            s if s >= 500 => ApiError::Server { status: s, message },
            s => ApiError::Status { status: s, message },
        }
    }

    /// True for the one error class that must tear the session down.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    /// True for failures worth retrying on the next poll tick: the request
    /// itself may succeed later without anyone changing anything.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network(_) | ApiError::Server { .. })
    }
}
