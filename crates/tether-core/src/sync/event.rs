//! Sync events
//!
//! A `SyncEvent` is one queued network operation: what to do (`operation`),
//! to which object (`target`), what must exist on the server first
//! (`depends`), and how to render it onto a transport. Events are persisted
//! as [`SyncEventRecord`]s so unsent work survives a reload.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::SyncError;
use crate::transport::{HttpRequest, RealtimeRequest};

/// What a sync event does to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Create,
    Patch,
    Delete,
    Receipt,
}

impl Operation {
    /// HTTP method used when the event goes over request/response
    pub fn http_method(&self) -> &'static str {
        match self {
            Operation::Create | Operation::Receipt => "POST",
            Operation::Patch => "PATCH",
            Operation::Delete => "DELETE",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Patch => "PATCH",
            Operation::Delete => "DELETE",
            Operation::Receipt => "RECEIPT",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an event is in its firing lifecycle
///
/// `Validating` and `Firing` are demoted back to `Idle` by the manager's
/// sweep once they outlive their expiration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FireState {
    #[default]
    Idle,
    /// Waiting on a durable-store claim; `attempt` tags the claim
    Validating { since: Instant, attempt: u64 },
    /// Sent, waiting on the transport; only the answer to `attempt`
    /// settles the event
    Firing { since: Instant, attempt: u64 },
    /// Waiting out a retry backoff
    Deferred { until: Instant },
}

/// Request body of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// Body known at enqueue time
    Ready(Value),
    /// Body computed from the target object when the event fires
    Deferred,
}

/// Transport-specific part of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum EventTransport {
    Http {
        /// Absolute, or relative to the target's/base URL
        url: String,
        /// Overrides the operation's default method
        method: Option<String>,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        timeout_ms: Option<u64>,
    },
    Realtime {
        /// Response carries a changes array to forward
        #[serde(default)]
        returns_changes: bool,
    },
}

/// Domain object a sync event may need at fire time
pub trait SyncTarget: Send + Sync {
    /// Current request body, for events created with a deferred payload
    fn request_body(&self, operation: Operation) -> Option<Value>;

    /// Resolve a relative request URL against this object's location
    fn resolve_url(&self, base_url: Option<&str>, relative: &str) -> Option<String> {
        base_url.map(|base| join_url(base, relative))
    }
}

/// Lookup of domain objects by identifier
pub trait ObjectRegistry: Send + Sync {
    fn get_object(&self, id: &str) -> Option<Arc<dyn SyncTarget>>;
}

/// Registry with no objects; deferred payloads stay unresolved
#[derive(Debug, Default, Clone, Copy)]
pub struct NoObjects;

impl ObjectRegistry for NoObjects {
    fn get_object(&self, _id: &str) -> Option<Arc<dyn SyncTarget>> {
        None
    }
}

/// Delivered to an event's completion handler
#[derive(Debug, Clone)]
pub struct SyncCompletion {
    pub event_id: String,
    pub target: Option<String>,
    pub result: Result<Value, SyncError>,
}

/// Called on success, terminal failure, and `reauthorize`
pub type CompletionHandler = Box<dyn FnMut(&SyncCompletion) + Send>;

/// A queued network operation
pub struct SyncEvent {
    pub id: String,
    pub operation: Operation,
    pub target: Option<String>,
    pub depends: Vec<String>,
    pub data: Option<Payload>,
    pub transport: EventTransport,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub return_to_online_count: u32,
    /// Set once the event completes
    pub success: Option<bool>,
    pub(crate) state: FireState,
    /// Attempt of the latest fire still owed an answer
    pub(crate) last_attempt: Option<u64>,
    depends_explicit: bool,
    handler: Option<CompletionHandler>,
}

impl SyncEvent {
    fn new(operation: Operation, transport: EventTransport) -> Self {
        Self {
            id: format!("local-{}", Uuid::new_v4()),
            operation,
            target: None,
            depends: Vec::new(),
            data: None,
            transport,
            created_at: Utc::now(),
            retry_count: 0,
            return_to_online_count: 0,
            success: None,
            state: FireState::Idle,
            last_attempt: None,
            depends_explicit: false,
            handler: None,
        }
    }

    /// An event sent as a request/response call to `url`
    pub fn http(operation: Operation, url: impl Into<String>) -> Self {
        Self::new(
            operation,
            EventTransport::Http {
                url: url.into(),
                method: None,
                headers: BTreeMap::new(),
                timeout_ms: None,
            },
        )
    }

    /// An event sent over the realtime channel; `data` is the envelope
    pub fn realtime(operation: Operation, data: Value) -> Self {
        let mut event = Self::new(operation, EventTransport::Realtime { returns_changes: false });
        event.data = Some(Payload::Ready(data));
        event
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the target; unless dependencies were given explicitly they
    /// become `[target]`
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        let target = target.into();
        if !self.depends_explicit {
            self.depends = vec![target.clone()];
        }
        self.target = Some(target);
        self
    }

    pub fn with_depends<I, S>(mut self, depends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = depends.into_iter().map(Into::into).collect();
        self.depends_explicit = true;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(Payload::Ready(data));
        self
    }

    /// Compute the body from the target object at fire time
    pub fn with_deferred_data(mut self) -> Self {
        self.data = Some(Payload::Deferred);
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        if let EventTransport::Http { method: ref mut m, .. } = self.transport {
            *m = Some(method.into());
        }
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let EventTransport::Http { ref mut headers, .. } = self.transport {
            headers.insert(name.into(), value.into());
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if let EventTransport::Http { ref mut timeout_ms, .. } = self.transport {
            *timeout_ms = Some(timeout.as_millis() as u64);
        }
        self
    }

    /// The realtime response carries a changes array
    pub fn returns_changes(mut self, returns_changes: bool) -> Self {
        if let EventTransport::Realtime { returns_changes: ref mut r } = self.transport {
            *r = returns_changes;
        }
        self
    }

    pub fn on_complete(mut self, handler: impl FnMut(&SyncCompletion) + Send + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    pub fn is_realtime(&self) -> bool {
        matches!(self.transport, EventTransport::Realtime { .. })
    }

    pub fn is_receipt(&self) -> bool {
        self.operation == Operation::Receipt
    }

    pub fn state(&self) -> FireState {
        self.state
    }

    pub fn is_firing(&self) -> bool {
        matches!(self.state, FireState::Firing { .. })
    }

    pub fn is_validating(&self) -> bool {
        matches!(self.state, FireState::Validating { .. })
    }

    /// Whether an answer to `attempt` still settles this event
    ///
    /// It must come from the latest fire, and no newer claim or fire may be
    /// under way. An attempt released back to idle still counts until the
    /// event fires again.
    pub(crate) fn awaits_answer(&self, attempt: u64) -> bool {
        match self.state {
            FireState::Firing { attempt: a, .. } => a == attempt,
            FireState::Idle => self.last_attempt == Some(attempt),
            _ => false,
        }
    }

    /// Whether `identifier` must exist on the server before this fires
    pub fn depends_on(&self, identifier: &str) -> bool {
        self.depends.iter().any(|d| d == identifier)
    }

    /// Identifier a CREATE asks the server to use
    ///
    /// A retried create that comes back "id in use" with this identifier
    /// already succeeded.
    pub fn create_id(&self) -> Option<&str> {
        if self.operation != Operation::Create {
            return None;
        }
        let Some(Payload::Ready(ref data)) = self.data else {
            return None;
        };
        let id = match self.transport {
            EventTransport::Http { .. } => data.get("id"),
            EventTransport::Realtime { .. } => data.get("data").and_then(|d| d.get("id")),
        };
        id.and_then(Value::as_str)
    }

    /// Invoke the completion handler, if any
    pub(crate) fn complete(&mut self, result: Result<Value, SyncError>) {
        if let Some(ref mut handler) = self.handler {
            handler(&SyncCompletion {
                event_id: self.id.clone(),
                target: self.target.clone(),
                result,
            });
        }
    }

    /// Swap a deferred payload for the target's current body
    fn resolve_data(&mut self, objects: &dyn ObjectRegistry) {
        if !matches!(self.data, Some(Payload::Deferred)) {
            return;
        }
        let Some(ref target) = self.target else {
            return;
        };
        if let Some(body) = objects
            .get_object(target)
            .and_then(|object| object.request_body(self.operation))
        {
            self.data = Some(Payload::Ready(body));
        }
    }

    fn ready_data(&self) -> Option<Value> {
        match self.data {
            Some(Payload::Ready(ref v)) => Some(v.clone()),
            _ => None,
        }
    }

    /// Render onto the request/response transport
    ///
    /// Deferred bodies and relative URLs are resolved here, not at enqueue
    /// time: the target's URL may only be known once an earlier CREATE
    /// has completed.
    pub(crate) fn render_http(
        &mut self,
        objects: &dyn ObjectRegistry,
        base_url: Option<&str>,
        token: Option<&str>,
        default_timeout: Duration,
    ) -> Option<HttpRequest> {
        self.resolve_data(objects);

        let operation = self.operation;
        let target = self.target.clone();
        let EventTransport::Http {
            ref mut url,
            ref method,
            ref headers,
            timeout_ms,
        } = self.transport
        else {
            return None;
        };

        if !is_absolute(url) {
            let resolved = match target.as_deref().and_then(|t| objects.get_object(t)) {
                Some(object) => object.resolve_url(base_url, url),
                None => base_url.map(|base| join_url(base, url)),
            };
            if let Some(resolved) = resolved {
                *url = resolved;
            }
        }

        let mut headers = headers.clone();
        if let Some(token) = token {
            headers.insert("authorization".to_string(), format!("Bearer {}", token));
        }

        Some(HttpRequest {
            url: url.clone(),
            method: method
                .clone()
                .unwrap_or_else(|| operation.http_method().to_string()),
            headers,
            data: self.ready_data(),
            timeout: timeout_ms.map(Duration::from_millis).unwrap_or(default_timeout),
        })
    }

    /// Render onto the realtime transport
    pub(crate) fn render_realtime(&mut self, objects: &dyn ObjectRegistry) -> Option<RealtimeRequest> {
        self.resolve_data(objects);
        let EventTransport::Realtime { returns_changes } = self.transport else {
            return None;
        };
        Some(RealtimeRequest {
            data: self.ready_data().unwrap_or(Value::Null),
            is_batchable: returns_changes,
        })
    }

    /// Snapshot for the durable store
    pub fn to_record(&self) -> SyncEventRecord {
        SyncEventRecord {
            id: self.id.clone(),
            operation: self.operation,
            target: self.target.clone(),
            depends: self.depends.clone(),
            data: self.data.clone(),
            transport: self.transport.clone(),
            created_at: self.created_at,
            retry_count: self.retry_count,
            return_to_online_count: self.return_to_online_count,
        }
    }

    /// Rehydrate a persisted event; it has no completion handler
    pub fn from_record(record: SyncEventRecord) -> Self {
        Self {
            id: record.id,
            operation: record.operation,
            target: record.target,
            depends: record.depends,
            data: record.data,
            transport: record.transport,
            created_at: record.created_at,
            retry_count: record.retry_count,
            return_to_online_count: record.return_to_online_count,
            success: None,
            state: FireState::Idle,
            last_attempt: None,
            depends_explicit: true,
            handler: None,
        }
    }
}

impl fmt::Debug for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEvent")
            .field("id", &self.id)
            .field("operation", &self.operation)
            .field("target", &self.target)
            .field("depends", &self.depends)
            .field("retry_count", &self.retry_count)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Persisted form of a sync event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEventRecord {
    pub id: String,
    pub operation: Operation,
    pub target: Option<String>,
    pub depends: Vec<String>,
    pub data: Option<Payload>,
    pub transport: EventTransport,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub return_to_online_count: u32,
}

fn is_absolute(url: &str) -> bool {
    url.contains("://")
}

/// Join a base URL and a relative path with exactly one slash
pub fn join_url(base: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}
