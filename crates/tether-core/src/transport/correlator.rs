//! Realtime request correlation
//!
//! Requests sent over the realtime channel are tagged with a locally
//! generated `request_id`; the matching `response` frame resolves the
//! caller. Multi-part (batched) responses accumulate until the last part
//! arrives. A periodic sweep fails requests that outlive the timeout, unless
//! the channel itself has gone quiet, in which case it is reconnected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::{error_ids, RealtimeChannel, RealtimeFirer, RealtimeRequest, TransportResponse};

/// Changes delivered by the server, for the change-processing collaborator
pub type ChangeBatch = Vec<Value>;

/// A request awaiting its response
struct PendingRequest {
    created_at: Instant,
    method: String,
    is_batchable: bool,
    /// Partial results of a batched response, indexed by position
    parts: Vec<Option<Value>>,
    parts_ok: bool,
    reply: oneshot::Sender<TransportResponse>,
}

/// Matches outbound realtime requests to their responses
pub struct RequestCorrelator {
    channel: Arc<dyn RealtimeChannel>,
    pending: Mutex<HashMap<String, PendingRequest>>,
    next_id: AtomicU64,
    timeout: Duration,
    changes_tx: mpsc::UnboundedSender<ChangeBatch>,
}

impl RequestCorrelator {
    /// Create a correlator over `channel`
    ///
    /// The returned receiver yields change payloads pushed by the server.
    pub fn new(
        channel: Arc<dyn RealtimeChannel>,
        timeout: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ChangeBatch>) {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let correlator = Arc::new(Self {
            channel,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            timeout,
            changes_tx,
        });
        (correlator, changes_rx)
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of requests still waiting for a response
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Send a request and return a receiver for its response
    ///
    /// A closed channel resolves the receiver immediately with a
    /// `not_connected` failure.
    pub fn send_request(&self, request: RealtimeRequest) -> oneshot::Receiver<TransportResponse> {
        let (reply, rx) = oneshot::channel();

        if !self.channel.is_open() {
            let _ = reply.send(TransportResponse::failure(
                None,
                error_ids::NOT_CONNECTED,
                "Realtime channel is not connected",
            ));
            return rx;
        }

        let request_id = format!("r{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let method = request.method().to_string();

        let mut body = match request.data {
            Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        body.insert("request_id".to_string(), Value::String(request_id.clone()));
        let frame = json!({ "type": "request", "body": Value::Object(body) });

        // Register before sending so a fast response can't race the entry
        self.pending().insert(
            request_id.clone(),
            PendingRequest {
                created_at: Instant::now(),
                method: method.clone(),
                is_batchable: request.is_batchable,
                parts: Vec::new(),
                parts_ok: true,
                reply,
            },
        );

        if let Err(e) = self.channel.send(frame) {
            warn!("Realtime send of {} failed: {}", method, e);
            if let Some(entry) = self.pending().remove(&request_id) {
                let _ = entry.reply.send(TransportResponse::failure(
                    None,
                    error_ids::NOT_CONNECTED,
                    &e.to_string(),
                ));
            }
            return rx;
        }

        debug!("Realtime request {} sent ({})", request_id, method);
        rx
    }

    /// Dispatch one inbound frame
    pub fn handle_frame(&self, frame: Value) {
        match frame.get("type").and_then(Value::as_str) {
            Some("response") => {
                if let Some(body) = frame.get("body") {
                    self.handle_response(body);
                }
            }
            Some("change") => {
                if let Some(body) = frame.get("body") {
                    let _ = self.changes_tx.send(vec![body.clone()]);
                }
            }
            other => debug!("Ignoring realtime frame of type {:?}", other),
        }
    }

    fn handle_response(&self, body: &Value) {
        let Some(request_id) = body.get("request_id").and_then(Value::as_str) else {
            return;
        };
        let success = body.get("success").and_then(Value::as_bool).unwrap_or(false);
        let data = body.get("data").cloned().unwrap_or(Value::Null);

        let mut pending = self.pending();
        let Some(entry) = pending.get_mut(request_id) else {
            debug!("Response for unknown request {}", request_id);
            return;
        };

        if success && entry.is_batchable {
            if let Some(changes) = data.get("changes").and_then(Value::as_array) {
                let _ = self.changes_tx.send(changes.clone());
            }
        }

        let batch = body.get("batch").and_then(|b| {
            let index = b.get("index")?.as_u64()? as usize;
            let size = b.get("size")?.as_u64()? as usize;
            Some((index, size))
        });

        match batch {
            Some((index, size)) if size > 0 => {
                if entry.parts.len() < size {
                    entry.parts.resize(size, None);
                }
                if index < entry.parts.len() {
                    entry.parts[index] = Some(data);
                }
                entry.parts_ok &= success;

                if index + 1 < size {
                    return;
                }
                if let Some(entry) = pending.remove(request_id) {
                    let parts = entry.parts.into_iter().map(|p| p.unwrap_or(Value::Null));
                    let _ = entry.reply.send(TransportResponse {
                        success: entry.parts_ok,
                        status: None,
                        data: Value::Array(parts.collect()),
                    });
                }
            }
            _ => {
                if let Some(entry) = pending.remove(request_id) {
                    let _ = entry.reply.send(TransportResponse {
                        success,
                        status: None,
                        data,
                    });
                }
            }
        }
    }

    /// Fail requests older than the timeout
    ///
    /// If nothing has arrived from the server within the timeout either, the
    /// channel is presumed dead and reconnected instead.
    pub fn check_timeouts(&self, now: Instant) {
        let expired: Vec<String> = self
            .pending()
            .iter()
            .filter(|(_, r)| now.saturating_duration_since(r.created_at) >= self.timeout)
            .map(|(id, _)| id.clone())
            .collect();

        if expired.is_empty() {
            return;
        }

        let channel_silent = match self.channel.last_data_received() {
            Some(at) => now.saturating_duration_since(at) >= self.timeout,
            None => true,
        };
        if channel_silent {
            warn!("Realtime channel silent with requests pending; reconnecting");
            self.channel.reconnect();
            return;
        }

        let mut pending = self.pending();
        for request_id in expired {
            if let Some(entry) = pending.remove(&request_id) {
                error!("Realtime request {} ({}) timed out", request_id, entry.method);
                let _ = entry.reply.send(TransportResponse::failure(
                    Some(408),
                    error_ids::REQUEST_TIMEOUT,
                    "The server is not responding",
                ));
            }
        }
    }

    /// Drop every pending request for `method`
    ///
    /// Each dropped caller resolves with an `operation_cancelled` failure.
    pub fn cancel_operation(&self, method: &str) -> usize {
        let mut pending = self.pending();
        let ids: Vec<String> = pending
            .iter()
            .filter(|(_, r)| r.method == method)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &ids {
            if let Some(entry) = pending.remove(id) {
                let _ = entry.reply.send(TransportResponse::failure(
                    None,
                    error_ids::OPERATION_CANCELLED,
                    "Operation cancelled",
                ));
            }
        }
        if !ids.is_empty() {
            debug!("Cancelled {} pending {} request(s)", ids.len(), method);
        }
        ids.len()
    }

    /// Dispatch inbound frames and sweep timeouts until the inbound stream ends
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<Value>, sweep: Duration) {
        let mut ticker = tokio::time::interval(sweep);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(frame) => self.handle_frame(frame),
                    None => break,
                },
                _ = ticker.tick() => self.check_timeouts(Instant::now()),
            }
        }
    }
}

#[async_trait]
impl RealtimeFirer for RequestCorrelator {
    fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    async fn fire(&self, request: RealtimeRequest) -> TransportResponse {
        self.send_request(request).await.unwrap_or_else(|_| {
            TransportResponse::failure(None, error_ids::OPERATION_CANCELLED, "Request dropped")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct FakeChannel {
        open: AtomicBool,
        sent: Mutex<Vec<Value>>,
        last_data: Mutex<Option<Instant>>,
        reconnects: AtomicU64,
    }

    impl FakeChannel {
        fn open() -> Arc<Self> {
            let ch = Arc::new(Self::default());
            ch.open.store(true, Ordering::SeqCst);
            *ch.last_data.lock().unwrap() = Some(Instant::now());
            ch
        }

        fn last_request_id(&self) -> String {
            let sent = self.sent.lock().unwrap();
            sent.last().unwrap()["body"]["request_id"]
                .as_str()
                .unwrap()
                .to_string()
        }
    }

    impl RealtimeChannel for FakeChannel {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn send(&self, frame: Value) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(frame);
            Ok(())
        }

        fn last_data_received(&self) -> Option<Instant> {
            *self.last_data.lock().unwrap()
        }

        fn reconnect(&self) {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn request(method: &str, batchable: bool) -> RealtimeRequest {
        RealtimeRequest {
            data: json!({ "method": method, "data": { "id": "msg1" } }),
            is_batchable: batchable,
        }
    }

    #[tokio::test]
    async fn test_rejects_when_not_connected() {
        let channel = Arc::new(FakeChannel::default());
        let (correlator, _changes) = RequestCorrelator::new(channel.clone(), Duration::from_secs(20));

        let response = correlator.send_request(request("Message.create", false)).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.error_id(), Some(error_ids::NOT_CONNECTED));
        assert!(channel.sent.lock().unwrap().is_empty());
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_response_matched_by_request_id() {
        let channel = FakeChannel::open();
        let (correlator, _changes) = RequestCorrelator::new(channel.clone(), Duration::from_secs(20));

        let first = correlator.send_request(request("Message.create", false));
        let first_id = channel.last_request_id();
        let second = correlator.send_request(request("Conversation.create", false));
        let second_id = channel.last_request_id();
        assert_ne!(first_id, second_id);

        // Answer out of order
        correlator.handle_frame(json!({
            "type": "response",
            "body": { "request_id": second_id, "success": true, "data": { "id": "conv1" } }
        }));
        correlator.handle_frame(json!({
            "type": "response",
            "body": { "request_id": first_id, "success": false, "data": { "id": "not_found" } }
        }));

        let second = second.await.unwrap();
        assert!(second.success);
        assert_eq!(second.data["id"], "conv1");

        let first = first.await.unwrap();
        assert_eq!(first.error_id(), Some("not_found"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_outbound_frame_shape() {
        let channel = FakeChannel::open();
        let (correlator, _changes) = RequestCorrelator::new(channel.clone(), Duration::from_secs(20));
        let _rx = correlator.send_request(request("Message.create", false));

        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent[0]["type"], "request");
        assert_eq!(sent[0]["body"]["method"], "Message.create");
        assert_eq!(sent[0]["body"]["data"]["id"], "msg1");
        assert!(sent[0]["body"]["request_id"].is_string());
    }

    #[tokio::test]
    async fn test_batch_completes_on_last_part() {
        let channel = FakeChannel::open();
        let (correlator, mut changes) =
            RequestCorrelator::new(channel.clone(), Duration::from_secs(20));

        let mut rx = correlator.send_request(request("Event.replay", true));
        let id = channel.last_request_id();

        for index in 0..2 {
            correlator.handle_frame(json!({
                "type": "response",
                "body": {
                    "request_id": id,
                    "success": true,
                    "batch": { "index": index, "size": 3 },
                    "data": { "changes": [{ "operation": "create", "n": index }] }
                }
            }));
        }
        // Not complete after two of three parts
        assert!(rx.try_recv().is_err());
        assert_eq!(correlator.pending_count(), 1);

        correlator.handle_frame(json!({
            "type": "response",
            "body": {
                "request_id": id,
                "success": true,
                "batch": { "index": 2, "size": 3 },
                "data": { "changes": [] }
            }
        }));

        let response = rx.await.unwrap();
        assert!(response.success);
        assert_eq!(response.data.as_array().unwrap().len(), 3);

        // Every part's changes were forwarded
        assert_eq!(changes.recv().await.unwrap()[0]["n"], 0);
        assert_eq!(changes.recv().await.unwrap()[0]["n"], 1);
        assert!(changes.recv().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_change_frames_forwarded() {
        let channel = FakeChannel::open();
        let (correlator, mut changes) = RequestCorrelator::new(channel, Duration::from_secs(20));

        correlator.handle_frame(json!({ "type": "change", "body": { "operation": "delete" } }));
        assert_eq!(changes.recv().await.unwrap()[0]["operation"], "delete");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_request_when_channel_alive() {
        let channel = FakeChannel::open();
        let (correlator, _changes) = RequestCorrelator::new(channel.clone(), Duration::from_secs(20));
        let rx = correlator.send_request(request("Message.create", false));

        tokio::time::advance(Duration::from_secs(21)).await;
        // Server is still talking to us
        *channel.last_data.lock().unwrap() = Some(Instant::now());
        correlator.check_timeouts(Instant::now());

        let response = rx.await.unwrap();
        assert_eq!(response.status, Some(408));
        assert_eq!(response.error_id(), Some(error_ids::REQUEST_TIMEOUT));
        assert_eq!(channel.reconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_channel_reconnects_instead_of_failing() {
        let channel = FakeChannel::open();
        let (correlator, _changes) = RequestCorrelator::new(channel.clone(), Duration::from_secs(20));
        let mut rx = correlator.send_request(request("Message.create", false));

        tokio::time::advance(Duration::from_secs(21)).await;
        correlator.check_timeouts(Instant::now());

        assert_eq!(channel.reconnects.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(correlator.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_young_requests_survive_sweep() {
        let channel = FakeChannel::open();
        let (correlator, _changes) = RequestCorrelator::new(channel, Duration::from_secs(20));
        let _rx = correlator.send_request(request("Message.create", false));

        correlator.check_timeouts(Instant::now());
        assert_eq!(correlator.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_operation_by_method() {
        let channel = FakeChannel::open();
        let (correlator, _changes) = RequestCorrelator::new(channel, Duration::from_secs(20));

        let a = correlator.send_request(request("Message.create", false));
        let b = correlator.send_request(request("Message.create", false));
        let c = correlator.send_request(request("Conversation.update", false));

        assert_eq!(correlator.cancel_operation("Message.create"), 2);
        assert_eq!(correlator.pending_count(), 1);

        assert!(a.await.unwrap().is_cancelled());
        assert!(b.await.unwrap().is_cancelled());
        drop(c);
    }

    #[tokio::test]
    async fn test_fire_via_trait() {
        let channel = FakeChannel::open();
        let (correlator, _changes) = RequestCorrelator::new(channel.clone(), Duration::from_secs(20));
        assert!(RealtimeFirer::is_open(correlator.as_ref()));

        let responder = {
            let correlator = correlator.clone();
            let channel = channel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::task::yield_now().await;
                    if !channel.sent.lock().unwrap().is_empty() {
                        break;
                    }
                }
                let id = channel.last_request_id();
                correlator.handle_frame(json!({
                    "type": "response",
                    "body": { "request_id": id, "success": true, "data": {} }
                }));
            })
        };

        let response = RealtimeFirer::fire(correlator.as_ref(), request("Message.create", false)).await;
        responder.await.unwrap();
        assert!(response.success);
    }
}
