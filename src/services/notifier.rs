use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// How long the app shows a toast, in milliseconds.
pub const DEFAULT_TOAST_MS: u64 = 5_000;

/// A fire-and-forget user notification sink.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// A notification as delivered to app clients.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub message: String,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(message: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            message: message.to_string(),
            duration_ms: DEFAULT_TOAST_MS,
            created_at: Utc::now(),
        }
    }
}

/// Writes notifications to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str) {
        tracing::info!("🔔 {}", message);
    }
}

/// Logs notifications and fans them out to connected app clients.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    /// Creates a new `BroadcastNotifier` buffering up to `capacity` notifications.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, message: &str) {
        tracing::info!("🔔 {}", message);
        // No subscribers is fine: a toast nobody sees is simply dropped.
        let _ = self.tx.send(Notification::new(message));
    }
}
