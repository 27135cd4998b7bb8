//! Store-to-view notifications.
//!
//! The progress store publishes [`StoreEvent`]s on a broadcast channel; views
//! subscribe instead of being called directly.

use crate::models::ProgressKey;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

pub const DEFAULT_NOTIFICATION_TTL_MS: i64 = 4_000;
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Success,
    Error,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Info => "info",
            NotificationKind::Success => "success",
            NotificationKind::Error => "error",
        }
    }
}

/// A short-lived, auto-dismissing message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub ttl_ms: i64,
}

impl Notification {
    pub fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self::at(kind, message, Utc::now())
    }

    pub fn at(kind: NotificationKind, message: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            message: message.into(),
            created_at,
            ttl_ms: DEFAULT_NOTIFICATION_TTL_MS,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Error, message)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::milliseconds(self.ttl_ms)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A checkbox value changed locally (optimistically or by reconciliation).
    EntryChanged { key: ProgressKey, checked: bool },
    /// Server counters were applied.
    Reconciled {
        completed_count: u32,
        percentage: Option<f64>,
    },
    /// A failed persist restored the pre-toggle value.
    RolledBack { key: ProgressKey, checked: bool },
    /// The whole store was replaced.
    Reloaded,
    Notification(Notification),
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    /// Publishing without subscribers is not an error.
    pub fn publish(&self, event: StoreEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_expires_after_ttl() {
        let now = Utc::now();
        let note = Notification::at(NotificationKind::Error, "locked", now);
        assert!(!note.is_expired(now + Duration::milliseconds(3_999)));
        assert!(note.is_expired(now + Duration::milliseconds(4_000)));
    }
}
