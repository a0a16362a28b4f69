//! Error types
//!
//! `SyncError` is what callers see in completion handlers and `sync:error`
//! notifications. Its `ErrorKind` is a small closed set; transient kinds are
//! retried locally before being escalated to `TooManyFailures`.
//!
//! `StoreError` and `TransportError` cover the durable queue and the
//! realtime channel respectively.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Classification of a failed sync operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// The client is not online; the queue resumes on reconnect
    Offline,
    /// Repeated offline/online flaps suggest a cross-origin failure
    CorsSuspected,
    /// The target resource does not exist on the server
    NotFound,
    /// The requested identifier is already taken by another resource
    InvalidId,
    /// The server or the realtime channel did not answer in time
    RequestTimeout,
    /// 502/503/504 from the server
    ServerUnavailable,
    /// A transient failure exhausted its retry budget
    TooManyFailures,
    /// The session expired; a nonce was supplied for re-authentication
    Reauthorize,
    /// Any other rejection
    ServerRejected,
}

impl ErrorKind {
    /// Stable name used in logs, notifications and the CLI
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Offline => "offline",
            ErrorKind::CorsSuspected => "cors-suspected",
            ErrorKind::NotFound => "not-found",
            ErrorKind::InvalidId => "invalid-id",
            ErrorKind::RequestTimeout => "request-timeout",
            ErrorKind::ServerUnavailable => "server-unavailable",
            ErrorKind::TooManyFailures => "too-many-failures",
            ErrorKind::Reauthorize => "reauthorize",
            ErrorKind::ServerRejected => "server-rejected",
        }
    }

    /// Whether this kind is retried locally with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::RequestTimeout | ErrorKind::ServerUnavailable)
    }

    /// Whether this kind removes the event and reports the failure
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ErrorKind::CorsSuspected
                | ErrorKind::NotFound
                | ErrorKind::InvalidId
                | ErrorKind::TooManyFailures
                | ErrorKind::ServerRejected
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure delivered to completion handlers and `sync:error` listeners
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct SyncError {
    pub kind: ErrorKind,
    /// HTTP status, when the transport produced one
    pub status: Option<u16>,
    pub message: String,
    /// Raw error body from the server
    pub data: Value,
}

impl SyncError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn with_status(mut self, status: Option<u16>) -> Self {
        self.status = status;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Errors from the durable queue store
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store worker is gone
    #[error("Queue store is closed")]
    Closed,

    /// The blocking task running a database call panicked or was cancelled
    #[error("Store task failed: {0}")]
    BackgroundTaskFailed(#[from] tokio::task::JoinError),

    /// Failed to create the directory holding the database
    #[error("Failed to create data directory '{path}': {source}")]
    CreateDirectory {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from the realtime channel
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The channel is not open
    #[error("not connected")]
    NotConnected,

    /// Send failed
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Frame could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_kebab_case() {
        assert_eq!(ErrorKind::CorsSuspected.as_str(), "cors-suspected");
        assert_eq!(ErrorKind::TooManyFailures.to_string(), "too-many-failures");

        // serde agrees with as_str
        let json = serde_json::to_string(&ErrorKind::ServerUnavailable).unwrap();
        assert_eq!(json, "\"server-unavailable\"");
    }

    #[test]
    fn test_transient_and_terminal_are_disjoint() {
        let all = [
            ErrorKind::Offline,
            ErrorKind::CorsSuspected,
            ErrorKind::NotFound,
            ErrorKind::InvalidId,
            ErrorKind::RequestTimeout,
            ErrorKind::ServerUnavailable,
            ErrorKind::TooManyFailures,
            ErrorKind::Reauthorize,
            ErrorKind::ServerRejected,
        ];
        for kind in all {
            assert!(!(kind.is_transient() && kind.is_terminal()), "{kind}");
        }
        assert!(!ErrorKind::Reauthorize.is_terminal());
        assert!(!ErrorKind::Offline.is_terminal());
    }

    #[test]
    fn test_sync_error_display() {
        let err = SyncError::new(ErrorKind::NotFound, "conversation is gone").with_status(Some(404));
        assert_eq!(err.to_string(), "not-found: conversation is gone");
        assert_eq!(err.status, Some(404));
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(TransportError::NotConnected.to_string(), "not connected");
    }
}
