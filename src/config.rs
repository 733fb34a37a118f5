//! Engine configuration, sourced from the environment.

use std::env;
use std::time::Duration;

use crate::api::normalize_base_url;
use crate::error::ApiError;

pub const ENV_BACKEND_URL: &str = "CONECTOCA_BACKEND_URL";
pub const ENV_ANON_KEY: &str = "CONECTOCA_ANON_KEY";
pub const ENV_POLL_INTERVAL: &str = "CONECTOCA_POLL_INTERVAL_SECS";
pub const ENV_PAGE_SIZE: &str = "CONECTOCA_PAGE_SIZE";

/// Orders arrive in pages of this size unless overridden.
pub const DEFAULT_PAGE_SIZE: u32 = 20;
/// The backend is polled on this fixed cadence.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Runtime settings for the sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Normalized backend base URL, no trailing slash.
    pub backend_url: String,
    /// Public API key sent as the `apikey` header on every request.
    pub anon_key: String,
    /// Delay between background order polls.
    pub poll_interval: Duration,
    /// Page size requested from the order list endpoint.
    pub page_size: u32,
}

impl EngineConfig {
    pub fn new(backend_url: &str, anon_key: &str) -> Self {
        Self {
            backend_url: normalize_base_url(backend_url),
            anon_key: anon_key.to_string(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Build the configuration from `CONECTOCA_*` environment variables.
    /// `CONECTOCA_BACKEND_URL` and `CONECTOCA_ANON_KEY` are required; the
    /// rest fall back to defaults.
    pub fn from_env() -> Result<Self, ApiError> {
        let backend_url = env::var(ENV_BACKEND_URL)
            .map_err(|_| ApiError::Config(format!("{ENV_BACKEND_URL} is not set")))?;
        let anon_key = env::var(ENV_ANON_KEY)
            .map_err(|_| ApiError::Config(format!("{ENV_ANON_KEY} is not set")))?;
        if backend_url.trim().is_empty() {
            return Err(ApiError::Config(format!("{ENV_BACKEND_URL} is empty")));
        }
        if anon_key.trim().is_empty() {
            return Err(ApiError::Config(format!("{ENV_ANON_KEY} is empty")));
        }

        let mut config = Self::new(&backend_url, &anon_key);

        if let Ok(raw) = env::var(ENV_POLL_INTERVAL) {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|_| ApiError::Config(format!("{ENV_POLL_INTERVAL} is not a number")))?;
            if secs == 0 {
                return Err(ApiError::Config(format!("{ENV_POLL_INTERVAL} must be > 0")));
            }
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Ok(raw) = env::var(ENV_PAGE_SIZE) {
            let size: u32 = raw
                .trim()
                .parse()
                .map_err(|_| ApiError::Config(format!("{ENV_PAGE_SIZE} is not a number")))?;
            if size == 0 {
                return Err(ApiError::Config(format!("{ENV_PAGE_SIZE} must be > 0")));
            }
            config.page_size = size;
        }

        Ok(config)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }
}
