//! Alert notifications for PII events.
//!
//! When a request carries PII or is blocked, wiretaps can POST a small JSON
//! payload to a configured webhook. Notifications are dispatched by the
//! [`EventSink`](crate::sink::EventSink) as background tasks and never block
//! request processing.
//!
//! The [`Notifier`] trait abstracts over backends; [`webhook::WebhookNotifier`]
//! is the HTTP implementation.

pub mod webhook;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::logging::LogEntry;
use crate::policy::evaluator::Action;

/// Event types an operator can subscribe to in `[alerts] on = [...]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEvent {
    /// At least one PII type survived the allowlist.
    PiiDetected,
    /// The request was rejected by block mode.
    Blocked,
}

/// JSON body sent to the webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub timestamp: String,
    pub endpoint: String,
    pub pii_types: Vec<String>,
    pub redacted: bool,
}

impl From<&LogEntry> for AlertPayload {
    fn from(entry: &LogEntry) -> Self {
        Self {
            timestamp: entry.timestamp.clone(),
            endpoint: entry.endpoint.clone(),
            pii_types: entry.pii_types.clone(),
            redacted: entry.redacted,
        }
    }
}

/// Trait for notification backends.
///
/// Implementations must be `Send + Sync` for use across async tasks.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one alert.
    async fn notify(&self, payload: &AlertPayload) -> Result<()>;
    /// Return the backend name (e.g., `"webhook"`).
    fn name(&self) -> &str;
}

/// Outcome events a log entry represents.
pub fn triggered_events(entry: &LogEntry) -> Vec<WebhookEvent> {
    let mut events = Vec::new();
    if !entry.pii_types.is_empty() {
        events.push(WebhookEvent::PiiDetected);
    }
    if entry.action == Action::Block {
        events.push(WebhookEvent::Blocked);
    }
    events
}

/// Whether any outcome of `entry` is in the subscribed set.
pub fn should_notify(entry: &LogEntry, subscribed: &[WebhookEvent]) -> bool {
    triggered_events(entry)
        .iter()
        .any(|event| subscribed.contains(event))
}
