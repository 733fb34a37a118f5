//! HTTP client for the CONECTOCA backend.
//!
//! All requests carry the public `apikey` header; authenticated endpoints add
//! a `Bearer` token. Non-success responses are folded into [`ApiError`] with
//! whatever detail the body carried, and list payloads are parsed defensively
//! so one malformed row cannot take down a whole poll cycle.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::error::ApiError;
use crate::models::{
    NewNotification, Notification, Order, OrderPage, OrderStatus, Pagination, RemoteOrder, User,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// URL handling
// ---------------------------------------------------------------------------

/// Normalize a user-supplied backend URL: default the scheme, strip trailing
/// slashes and a trailing `/api` segment (paths already include it).
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    // Strip trailing slashes again (in case "/api/" was present)
    while url.ends_with('/') {
        url.pop();
    }

    url
}

fn friendly_error(url: &str, err: &reqwest::Error) -> ApiError {
    if err.is_connect() {
        return ApiError::Network(format!("Cannot reach CONECTOCA backend at {url}"));
    }
    if err.is_timeout() {
        return ApiError::Network(format!("Connection to {url} timed out"));
    }
    if err.is_builder() {
        return ApiError::Network(format!("Invalid backend URL: {url}"));
    }
    ApiError::Network(format!("Network error communicating with {url}: {err}"))
}

/// Pull the most specific message out of an error body. Backends answer with
/// `{"error": ...}` or `{"message": ...}`, sometimes with a `details` blob.
fn extract_error_detail(body_text: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body_text) {
        if let Some(message) = json
            .get("error")
            .or_else(|| json.get("message"))
            .and_then(Value::as_str)
        {
            if let Some(details) = json.get("details").or_else(|| json.get("errors")) {
                return format!("{message}: {details}");
            }
            return message.to_string();
        }
    }
    body_text.trim().to_string()
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Successful sign-in: an access token plus the signed-in user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponse {
    #[serde(alias = "access_token", alias = "token")]
    pub access_token: String,
    pub user: User,
}

/// Everything the engine needs from the backend. `HttpBackend` is the real
/// implementation; tests script their own.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<SignInResponse, ApiError>;
    async fn current_user(&self, token: &str) -> Result<User, ApiError>;
    async fn sign_out(&self, token: &str) -> Result<(), ApiError>;

    async fn fetch_orders(
        &self,
        token: &str,
        page: u32,
        page_size: u32,
    ) -> Result<OrderPage, ApiError>;
    async fn update_order_status(
        &self,
        token: &str,
        order_id: &str,
        status: OrderStatus,
        progress: Option<u8>,
    ) -> Result<(), ApiError>;

    async fn fetch_notifications(&self, token: &str) -> Result<Vec<Notification>, ApiError>;
    async fn create_notification(
        &self,
        token: &str,
        notification: &NewNotification,
    ) -> Result<(), ApiError>;
    async fn mark_notification_read(&self, token: &str, id: &str) -> Result<(), ApiError>;
    async fn mark_all_notifications_read(&self, token: &str) -> Result<(), ApiError>;
    async fn delete_notification(&self, token: &str, id: &str) -> Result<(), ApiError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

pub struct HttpBackend {
    base_url: String,
    anon_key: String,
    client: Client,
}

impl HttpBackend {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: normalize_base_url(base_url),
            anon_key: anon_key.to_string(),
            client,
        })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let full_url = format!("{}{}", self.base_url, path);

        let mut req = self
            .client
            .request(method, &full_url)
            .header("apikey", &self.anon_key)
            .header("Content-Type", "application/json");
        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();

        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(
                status.as_u16(),
                extract_error_detail(&body_text),
            ));
        }

        let body_text = resp.text().await.unwrap_or_default();
        if body_text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text)
            .map_err(|e| ApiError::InvalidResponse(format!("not valid JSON: {e}")))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<SignInResponse, ApiError> {
        let body = serde_json::json!({ "email": email, "password": password });
        let value = self
            .request(Method::POST, "/api/auth/login", None, Some(body))
            .await?;
        let payload = match value.get("data") {
            Some(inner) if inner.is_object() => inner.clone(),
            _ => value,
        };
        serde_json::from_value(payload)
            .map_err(|e| ApiError::InvalidResponse(format!("sign-in payload: {e}")))
    }

    async fn current_user(&self, token: &str) -> Result<User, ApiError> {
        let value = self
            .request(Method::GET, "/api/auth/session", Some(token), None)
            .await?;
        let payload = match value.get("user") {
            Some(inner) if inner.is_object() => inner.clone(),
            _ => value,
        };
        serde_json::from_value(payload)
            .map_err(|e| ApiError::InvalidResponse(format!("session payload: {e}")))
    }

    async fn sign_out(&self, token: &str) -> Result<(), ApiError> {
        self.request(Method::POST, "/api/auth/logout", Some(token), None)
            .await?;
        Ok(())
    }

    async fn fetch_orders(
        &self,
        token: &str,
        page: u32,
        page_size: u32,
    ) -> Result<OrderPage, ApiError> {
        let path = format!("/api/orders?page={page}&pageSize={page_size}");
        let value = self.request(Method::GET, &path, Some(token), None).await?;
        Ok(parse_order_page(value, page))
    }

    async fn update_order_status(
        &self,
        token: &str,
        order_id: &str,
        status: OrderStatus,
        progress: Option<u8>,
    ) -> Result<(), ApiError> {
        let mut body = serde_json::json!({ "status": status });
        if let Some(progress) = progress {
            body["progress"] = serde_json::json!(progress);
        }
        let path = format!("/api/orders/{order_id}/status");
        self.request(Method::PATCH, &path, Some(token), Some(body))
            .await?;
        Ok(())
    }

    async fn fetch_notifications(&self, token: &str) -> Result<Vec<Notification>, ApiError> {
        let value = self
            .request(Method::GET, "/api/notifications", Some(token), None)
            .await?;
        Ok(parse_notification_list(value))
    }

    async fn create_notification(
        &self,
        token: &str,
        notification: &NewNotification,
    ) -> Result<(), ApiError> {
        let mut body = serde_json::json!({
            "id": notification.id,
            "type": notification.kind,
            "title": notification.title,
            "message": notification.message,
            "read": notification.read,
        });
        if let Some(order_id) = &notification.order_id {
            body["orderId"] = serde_json::json!(order_id);
        }
        self.request(Method::POST, "/api/notifications", Some(token), Some(body))
            .await?;
        Ok(())
    }

    async fn mark_notification_read(&self, token: &str, id: &str) -> Result<(), ApiError> {
        let path = format!("/api/notifications/{id}/read");
        self.request(Method::PATCH, &path, Some(token), None).await?;
        Ok(())
    }

    async fn mark_all_notifications_read(&self, token: &str) -> Result<(), ApiError> {
        self.request(Method::POST, "/api/notifications/read-all", Some(token), None)
            .await?;
        Ok(())
    }

    async fn delete_notification(&self, token: &str, id: &str) -> Result<(), ApiError> {
        let path = format!("/api/notifications/{id}");
        self.request(Method::DELETE, &path, Some(token), None)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Payload parsing
// ---------------------------------------------------------------------------

/// Parse the order list payload. The happy shape is
/// `{ "data": [...], "pagination": {...} }`, but older backends answer with a
/// bare array or an `orders` key. Anything else counts as an empty page;
/// individual rows that fail to parse are skipped with a warning.
pub(crate) fn parse_order_page(value: Value, requested_page: u32) -> OrderPage {
    let pagination = value
        .get("pagination")
        .cloned()
        .and_then(|p| serde_json::from_value::<Pagination>(p).ok())
        .unwrap_or(Pagination {
            page: requested_page,
            ..Pagination::default()
        });

    let rows = match value {
        Value::Array(rows) => rows,
        Value::Object(mut obj) => match obj.remove("data").or_else(|| obj.remove("orders")) {
            Some(Value::Array(rows)) => rows,
            Some(_) => {
                warn!("order list field is not an array, treating as empty");
                Vec::new()
            }
            None => {
                warn!("order payload has no order list, treating as empty");
                Vec::new()
            }
        },
        _ => {
            warn!("order payload is not an object or array, treating as empty");
            Vec::new()
        }
    };

    let mut orders = Vec::with_capacity(rows.len());
    for row in rows {
        match serde_json::from_value::<RemoteOrder>(row) {
            Ok(remote) => orders.push(Order::from_remote(remote)),
            Err(e) => warn!(error = %e, "skipping malformed order row"),
        }
    }

    OrderPage { orders, pagination }
}

/// Parse the notification list payload. Malformed payloads and rows without
/// an id degrade to an empty or shorter list instead of failing the refresh.
pub(crate) fn parse_notification_list(value: Value) -> Vec<Notification> {
    let rows = match value {
        Value::Array(rows) => rows,
        Value::Object(mut obj) => {
            match obj.remove("data").or_else(|| obj.remove("notifications")) {
                Some(Value::Array(rows)) => rows,
                _ => Vec::new(),
            }
        }
        _ => Vec::new(),
    };
    rows.iter().filter_map(Notification::from_value).collect()
}
