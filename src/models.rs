//! Domain types shared across the engine: orders, notifications, users.
//!
//! Remote payloads arrive in whatever shape the backend of the day produces,
//! so the `Remote*` DTOs accept both camelCase and snake_case keys and the
//! conversion into domain types coerces rather than fails wherever a default
//! is safe.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

// ---------------------------------------------------------------------------
// Order status
// ---------------------------------------------------------------------------

/// Lifecycle of a bakery order. The wire uses lowercase snake_case strings;
/// `from_remote` also folds the synonyms older backend versions emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    InProgress,
    Completed,
    Dispatched,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Translate a remote status string. Returns `None` for values we do not
    /// recognize; callers decide the fallback.
    pub fn from_remote(raw: &str) -> Option<Self> {
        let normalized = raw
            .trim()
            .to_lowercase()
            .replace([' ', '-'], "_");
        match normalized.as_str() {
            "pending" | "pendiente" | "new" | "created" => Some(OrderStatus::Pending),
            "in_progress" | "processing" | "in_production" | "preparing" | "en_proceso" => {
                Some(OrderStatus::InProgress)
            }
            "completed" | "complete" | "ready" | "done" | "finished" | "completado" => {
                Some(OrderStatus::Completed)
            }
            "dispatched" | "shipped" | "out_for_delivery" | "in_transit" | "despachado" => {
                Some(OrderStatus::Dispatched)
            }
            "delivered" | "entregado" => Some(OrderStatus::Delivered),
            "cancelled" | "canceled" | "rejected" | "cancelado" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Canonical wire value.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Completed => "completed",
            OrderStatus::Dispatched => "dispatched",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Human-readable form used in alert bodies.
    pub fn label(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::InProgress => "In progress",
            OrderStatus::Completed => "Completed",
            OrderStatus::Dispatched => "Dispatched",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl Serialize for OrderStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// One line item of an order.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: Option<String>,
    pub name: String,
    pub quantity: u32,
    pub price: f64,
}

impl OrderItem {
    fn from_remote(remote: RemoteOrderItem) -> Self {
        let name = remote
            .product_name
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Item".to_string());
        let quantity = remote
            .quantity
            .map(|q| q.max(0.0).round() as u32)
            .unwrap_or(1);
        Self {
            product_id: remote.product_id.filter(|s| !s.trim().is_empty()),
            name,
            quantity,
            price: remote.price.unwrap_or(0.0),
        }
    }
}

/// An order as tracked by the engine. `product_summary` and `total_quantity`
/// are derived from the items once at conversion time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub status: OrderStatus,
    /// Completion percentage, clamped to 0..=100.
    pub progress: u8,
    pub deadline: Option<NaiveDate>,
    pub delivery_address: Option<String>,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItem>,
    pub product_summary: String,
    pub total_quantity: u32,
}

impl Order {
    pub fn from_remote(remote: RemoteOrder) -> Self {
        let status = match remote.status.as_deref().map(str::trim) {
            None | Some("") => OrderStatus::Pending,
            Some(raw) => OrderStatus::from_remote(raw).unwrap_or_else(|| {
                warn!(order_id = %remote.id, status = raw, "unknown order status, treating as pending");
                OrderStatus::Pending
            }),
        };
        let progress = remote
            .progress
            .map(|p| p.clamp(0.0, 100.0).round() as u8)
            .unwrap_or(0);
        let deadline = remote.deadline.as_deref().and_then(parse_deadline);
        let created_at = remote.created_at.as_deref().and_then(|raw| {
            DateTime::parse_from_rfc3339(raw.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        });
        let items: Vec<OrderItem> = remote
            .items
            .into_iter()
            .map(OrderItem::from_remote)
            .collect();
        let total_quantity = items
            .iter()
            .fold(0u32, |total, item| total.saturating_add(item.quantity));
        let product_summary = items
            .iter()
            .map(|i| format!("{}x {}", i.quantity, i.name))
            .collect::<Vec<_>>()
            .join(", ");

        Self {
            id: remote.id,
            status,
            progress,
            deadline,
            delivery_address: remote
                .delivery_address
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            customer_id: remote
                .customer_id
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            customer_name: remote
                .customer_name
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            created_at,
            items,
            product_summary,
            total_quantity,
        }
    }

    /// Name shown in alerts when the customer field is missing.
    pub fn display_name(&self) -> &str {
        self.customer_name.as_deref().unwrap_or("a customer")
    }
}

fn parse_deadline(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.date_naive())
        .ok()
}

/// Raw order row as the backend sends it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteOrder {
    #[serde(deserialize_with = "de_string_or_number")]
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "completion", alias = "percent_complete")]
    pub progress: Option<f64>,
    #[serde(default, alias = "due_date", alias = "dueDate", alias = "delivery_date")]
    pub deadline: Option<String>,
    #[serde(default, alias = "delivery_address", alias = "address")]
    pub delivery_address: Option<String>,
    #[serde(
        default,
        deserialize_with = "de_opt_string_or_number",
        alias = "customer_id"
    )]
    pub customer_id: Option<String>,
    #[serde(default, alias = "customer_name", alias = "customer")]
    pub customer_name: Option<String>,
    #[serde(default, alias = "created_at")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub items: Vec<RemoteOrderItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteOrderItem {
    #[serde(
        default,
        deserialize_with = "de_opt_string_or_number",
        alias = "product_id"
    )]
    pub product_id: Option<String>,
    #[serde(default, alias = "product_name", alias = "product", alias = "name")]
    pub product_name: Option<String>,
    #[serde(default, alias = "qty")]
    pub quantity: Option<f64>,
    #[serde(default, alias = "unit_price", alias = "unitPrice")]
    pub price: Option<f64>,
}

/// Accept both `"42"` and `42` for identifier fields.
fn de_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

/// Same, for optional identifier fields; null counts as absent.
fn de_opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default = "default_page", alias = "current_page", alias = "currentPage")]
    pub page: u32,
    #[serde(default = "default_page", alias = "total_pages")]
    pub total_pages: u32,
    #[serde(default, alias = "total_count", alias = "total")]
    pub total_orders: u64,
    #[serde(default, alias = "has_next")]
    pub has_next: bool,
    #[serde(default, alias = "has_prev", alias = "hasPrevious", alias = "has_previous")]
    pub has_prev: bool,
}

fn default_page() -> u32 {
    1
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            total_pages: 1,
            total_orders: 0,
            has_next: false,
            has_prev: false,
        }
    }
}

/// One fetched page of orders plus its pagination envelope.
#[derive(Debug, Clone)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub pagination: Pagination,
}

// ---------------------------------------------------------------------------
// Users and roles
// ---------------------------------------------------------------------------

/// Who is signed in. Unknown role strings fall back to the least privileged
/// role rather than failing the session load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Production,
    Dispatch,
    Admin,
}

impl Role {
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "production" | "produccion" | "baker" | "kitchen" => Role::Production,
            "dispatch" | "despacho" | "driver" | "delivery" => Role::Dispatch,
            "admin" | "administrator" | "owner" => Role::Admin,
            _ => Role::Customer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Production => "production",
            Role::Dispatch => "dispatch",
            Role::Admin => "admin",
        }
    }

    /// Staff watching the incoming queue get the new-order alert batch.
    pub fn receives_new_order_alerts(&self) -> bool {
        matches!(self, Role::Production | Role::Admin)
    }

    /// Customers and couriers follow individual orders, so they get the
    /// per-order status change alerts instead.
    pub fn receives_status_alerts(&self) -> bool {
        matches!(self, Role::Customer | Role::Dispatch)
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Customer
    }
}

impl Serialize for Role {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Role::from_wire(&raw))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(deserialize_with = "de_string_or_number")]
    pub id: String,
    #[serde(default, alias = "full_name", alias = "fullName", alias = "username")]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Role,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or("there")
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Category of a persisted notification. The wire key is `type`; anything we
/// do not recognize becomes `Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    OrderCreated,
    OrderUpdated,
    OrderCompleted,
    OrderCancelled,
    Info,
    Warning,
    Error,
    Attendance,
}

impl NotificationKind {
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "order_created" | "new_order" => NotificationKind::OrderCreated,
            "order_updated" | "order_status" => NotificationKind::OrderUpdated,
            "order_completed" => NotificationKind::OrderCompleted,
            "order_cancelled" | "order_canceled" => NotificationKind::OrderCancelled,
            "warning" | "warn" => NotificationKind::Warning,
            "error" => NotificationKind::Error,
            "attendance" => NotificationKind::Attendance,
            _ => NotificationKind::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::OrderCreated => "order_created",
            NotificationKind::OrderUpdated => "order_updated",
            NotificationKind::OrderCompleted => "order_completed",
            NotificationKind::OrderCancelled => "order_cancelled",
            NotificationKind::Info => "info",
            NotificationKind::Warning => "warning",
            NotificationKind::Error => "error",
            NotificationKind::Attendance => "attendance",
        }
    }
}

impl Serialize for NotificationKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// A notification row from the panel endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Order this notification talks about, when it talks about one.
    pub order_id: Option<String>,
    pub read: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Build from a raw JSON row. Returns `None` only when the row has no
    /// usable id; every other field coerces to a default.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let id = match value.get("id") {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => return None,
        };
        let kind = value
            .get("type")
            .or_else(|| value.get("kind"))
            .and_then(|v| v.as_str())
            .map(NotificationKind::from_wire)
            .unwrap_or(NotificationKind::Info);
        let title = value
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        let message = value
            .get("message")
            .or_else(|| value.get("body"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        let order_id = value
            .get("orderId")
            .or_else(|| value.get("order_id"))
            .and_then(|v| match v {
                serde_json::Value::String(s) if !s.trim().is_empty() => {
                    Some(s.trim().to_string())
                }
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        let read = value
            .get("read")
            .or_else(|| value.get("isRead"))
            .or_else(|| value.get("is_read"))
            .map(value_truthy)
            .unwrap_or(false);
        let created_at = value
            .get("createdAt")
            .or_else(|| value.get("created_at"))
            .and_then(|v| v.as_str())
            .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Some(Self {
            id,
            kind,
            title,
            message,
            order_id,
            read,
            created_at,
        })
    }
}

/// Notification payload the engine persists for other devices. The id is
/// generated client-side so retries stay idempotent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub order_id: Option<String>,
    pub read: bool,
}

impl NewNotification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            title: title.into(),
            message: message.into(),
            order_id: None,
            read: false,
        }
    }

    /// Associate the notification with an order.
    pub fn for_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }
}

/// Booleans arrive as bools, numbers or strings depending on the backend
/// version.
fn value_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        serde_json::Value::String(s) => {
            matches!(s.trim().to_lowercase().as_str(), "true" | "t" | "1" | "yes")
        }
        _ => false,
    }
}
