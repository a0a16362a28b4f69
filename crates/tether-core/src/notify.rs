//! Sync notifications
//!
//! The manager publishes one [`SyncNotification`] per queue transition on a
//! broadcast channel. Slow listeners lag and lose old notifications rather
//! than stalling the queue.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::SyncError;
use crate::sync::SyncEventRecord;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum SyncNotification {
    /// An event was enqueued
    #[serde(rename = "sync:add")]
    Added { event: SyncEventRecord },

    /// An event completed successfully
    #[serde(rename = "sync:success")]
    Success {
        target: Option<String>,
        event: SyncEventRecord,
        response: Value,
    },

    /// An event failed terminally
    #[serde(rename = "sync:error")]
    Error {
        target: Option<String>,
        event: SyncEventRecord,
        error: SyncError,
    },

    /// An event was purged because of another event
    #[serde(rename = "sync:abort")]
    Abort {
        target: Option<String>,
        event: SyncEventRecord,
    },
}

impl SyncNotification {
    pub fn name(&self) -> &'static str {
        match self {
            SyncNotification::Added { .. } => "sync:add",
            SyncNotification::Success { .. } => "sync:success",
            SyncNotification::Error { .. } => "sync:error",
            SyncNotification::Abort { .. } => "sync:abort",
        }
    }

    pub fn event(&self) -> &SyncEventRecord {
        match self {
            SyncNotification::Added { event }
            | SyncNotification::Success { event, .. }
            | SyncNotification::Error { event, .. }
            | SyncNotification::Abort { event, .. } => event,
        }
    }
}

/// Publishing side of the notification channel
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<SyncNotification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotification> {
        self.tx.subscribe()
    }

    /// Publish; having no listeners is fine
    pub fn emit(&self, notification: SyncNotification) {
        let _ = self.tx.send(notification);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
