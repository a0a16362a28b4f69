//! Transports
//!
//! Two renderings of a sync event onto the wire share one response shape:
//!
//! - **Request/response** (`RequestFirer`): REST-style calls, see [`HttpFirer`]
//! - **Realtime** (`RealtimeFirer`): requests over the realtime channel,
//!   correlated with their responses by [`RequestCorrelator`]
//!
//! Both hand back a [`TransportResponse`]; the sync manager classifies it.

mod correlator;
mod http;
mod websocket;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::TransportError;

pub use correlator::{ChangeBatch, RequestCorrelator};
pub use http::HttpFirer;
pub use websocket::{WebSocketChannel, WebSocketConfig};

/// Error ids the engine synthesizes or inspects in response bodies
pub mod error_ids {
    pub const NOT_FOUND: &str = "not_found";
    pub const ID_IN_USE: &str = "id_in_use";
    pub const REQUEST_TIMEOUT: &str = "request_timeout";
    pub const NOT_CONNECTED: &str = "not_connected";
    pub const NETWORK_ERROR: &str = "network_error";
    pub const OPERATION_CANCELLED: &str = "operation_cancelled";
}

/// Outcome of a single transport call
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub success: bool,
    /// HTTP status; `None` for realtime responses and network failures
    pub status: Option<u16>,
    /// Response body, or the error body on failure
    pub data: Value,
}

impl TransportResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            status: None,
            data,
        }
    }

    /// A synthesized failure with an error id and message
    pub fn failure(status: Option<u16>, id: &str, message: &str) -> Self {
        Self {
            success: false,
            status,
            data: serde_json::json!({ "id": id, "message": message }),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Server error identifier (`data.id`) on failures
    pub fn error_id(&self) -> Option<&str> {
        if self.success {
            return None;
        }
        self.data.get("id").and_then(Value::as_str)
    }

    /// Re-authentication nonce (`data.data.nonce`)
    pub fn nonce(&self) -> Option<&str> {
        self.data
            .get("data")
            .and_then(|d| d.get("nonce"))
            .and_then(Value::as_str)
    }

    /// Human-readable error message, if the body carries one
    pub fn message(&self) -> Option<&str> {
        self.data.get("message").and_then(Value::as_str)
    }

    pub fn is_cancelled(&self) -> bool {
        self.error_id() == Some(error_ids::OPERATION_CANCELLED)
    }
}

/// A fully rendered request/response call
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub data: Option<Value>,
    pub timeout: Duration,
}

/// A fully rendered realtime request
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeRequest {
    /// Request envelope; `data.method` names the operation
    pub data: Value,
    /// The response carries a changes array that should be forwarded
    pub is_batchable: bool,
}

impl RealtimeRequest {
    pub fn method(&self) -> &str {
        self.data
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

/// Request/response transport
#[async_trait]
pub trait RequestFirer: Send + Sync {
    async fn fire(&self, request: HttpRequest) -> TransportResponse;
}

/// Realtime transport
#[async_trait]
pub trait RealtimeFirer: Send + Sync {
    /// Whether the realtime channel is currently usable
    fn is_open(&self) -> bool;

    async fn fire(&self, request: RealtimeRequest) -> TransportResponse;
}

/// A duplex realtime channel the correlator sends frames over
pub trait RealtimeChannel: Send + Sync {
    fn is_open(&self) -> bool;

    /// Queue a frame for sending
    fn send(&self, frame: Value) -> Result<(), TransportError>;

    /// When data last arrived from the server
    fn last_data_received(&self) -> Option<Instant>;

    /// Drop the current connection and dial again
    fn reconnect(&self);
}
