//! Pluggable alert output.
//!
//! The engine decides *when* to alert; an [`AlertSink`] decides what that
//! means on the host: play a sound, raise a desktop notification, or in the
//! headless daemon just write a log line.

use tracing::info;

/// Host-side alert output. Implementations should return quickly; the engine
/// calls these from its poll loop.
pub trait AlertSink: Send + Sync {
    /// Audible cue for a batch of new orders.
    fn new_order_cue(&self) -> Result<(), String>;
    /// Audible cue for an order changing status.
    fn status_change_cue(&self) -> Result<(), String>;
    /// Platform notification with a title and body.
    fn push_notification(&self, title: &str, body: &str) -> Result<(), String>;
}

/// Sink for headless deployments: alerts land in the log.
pub struct LogAlerts;

impl AlertSink for LogAlerts {
    fn new_order_cue(&self) -> Result<(), String> {
        info!("alert cue: new orders");
        Ok(())
    }

    fn status_change_cue(&self) -> Result<(), String> {
        info!("alert cue: order status change");
        Ok(())
    }

    fn push_notification(&self, title: &str, body: &str) -> Result<(), String> {
        info!(title, body, "platform notification");
        Ok(())
    }
}
