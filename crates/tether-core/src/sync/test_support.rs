//! Fakes and a harness for driving a manager in tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Semaphore};
use tokio::time::Instant;

use super::event::{ObjectRegistry, Operation, SyncTarget};
use super::manager::{QueueSnapshot, SyncContext, SyncManager};
use crate::config::SyncConfig;
use crate::connectivity::Connectivity;
use crate::error::StoreResult;
use crate::notify::SyncNotification;
use crate::session::Session;
use crate::store::{MemoryQueueStore, QueueStore};
use crate::sync::SyncEventRecord;
use crate::transport::{HttpRequest, RealtimeFirer, RealtimeRequest, RequestFirer, TransportResponse};

/// Scripted transport for both lanes
///
/// Answers calls from a response script (defaulting to success). A gated
/// transport holds every call until the test releases a permit.
pub struct FakeTransport {
    open: AtomicBool,
    gated: bool,
    gate: Semaphore,
    delay: Duration,
    responses: Mutex<VecDeque<TransportResponse>>,
    http_calls: Mutex<Vec<(Instant, HttpRequest)>>,
    realtime_calls: Mutex<Vec<RealtimeRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeTransport {
    fn build(gated: bool, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(true),
            gated,
            gate: Semaphore::new(0),
            delay,
            responses: Mutex::new(VecDeque::new()),
            http_calls: Mutex::new(Vec::new()),
            realtime_calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn new() -> Arc<Self> {
        Self::build(false, Duration::ZERO)
    }

    /// Every call waits for [`FakeTransport::release`]
    pub fn gated() -> Arc<Self> {
        Self::build(true, Duration::ZERO)
    }

    /// Every call takes `delay` to answer
    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::build(false, delay)
    }

    pub fn respond_with(&self, responses: impl IntoIterator<Item = TransportResponse>) {
        self.responses.lock().unwrap().extend(responses);
    }

    pub fn release(&self, calls: usize) {
        self.gate.add_permits(calls);
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.http_calls.lock().unwrap().len() + self.realtime_calls.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.http_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.url).collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.http_calls.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }

    pub fn realtime_requests(&self) -> Vec<RealtimeRequest> {
        self.realtime_calls.lock().unwrap().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn answer(&self) -> TransportResponse {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.gated {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| TransportResponse::ok(json!({})));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

#[async_trait]
impl RequestFirer for FakeTransport {
    async fn fire(&self, request: HttpRequest) -> TransportResponse {
        self.http_calls.lock().unwrap().push((Instant::now(), request));
        self.answer().await
    }
}

#[async_trait]
impl RealtimeFirer for FakeTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn fire(&self, request: RealtimeRequest) -> TransportResponse {
        self.realtime_calls.lock().unwrap().push(request);
        self.answer().await
    }
}

/// Memory store whose claims always return a fixed answer
pub struct FixedClaimStore {
    inner: MemoryQueueStore,
    claim: bool,
}

impl FixedClaimStore {
    pub fn new(claim: bool) -> Self {
        Self {
            inner: MemoryQueueStore::new(),
            claim,
        }
    }
}

#[async_trait]
impl QueueStore for FixedClaimStore {
    async fn write_sync_events(&self, events: Vec<SyncEventRecord>) -> StoreResult<()> {
        self.inner.write_sync_events(events).await
    }

    async fn delete_sync_events(&self, ids: Vec<String>) -> StoreResult<()> {
        self.inner.delete_sync_events(ids).await
    }

    async fn claim_sync_event(&self, _id: &str, _owner: &str) -> StoreResult<bool> {
        Ok(self.claim)
    }

    async fn load_sync_queue(&self) -> StoreResult<Vec<SyncEventRecord>> {
        self.inner.load_sync_queue().await
    }
}

/// A domain object with a known URL and body
pub struct FakeObject {
    pub url: String,
    pub body: Value,
}

impl SyncTarget for FakeObject {
    fn request_body(&self, _operation: Operation) -> Option<Value> {
        Some(self.body.clone())
    }

    fn resolve_url(&self, _base_url: Option<&str>, relative: &str) -> Option<String> {
        Some(format!("{}/{}", self.url, relative))
    }
}

#[derive(Default)]
pub struct FakeRegistry {
    objects: Mutex<HashMap<String, Arc<dyn SyncTarget>>>,
}

impl FakeRegistry {
    pub fn insert(&self, id: &str, object: FakeObject) {
        self.objects
            .lock()
            .unwrap()
            .insert(id.to_string(), Arc::new(object));
    }
}

impl ObjectRegistry for FakeRegistry {
    fn get_object(&self, id: &str) -> Option<Arc<dyn SyncTarget>> {
        self.objects.lock().unwrap().get(id).cloned()
    }
}

pub fn test_config() -> SyncConfig {
    SyncConfig {
        base_url: Some("https://api.example.com".to_string()),
        ..SyncConfig::default()
    }
}

/// A manager wired to fakes, online and authenticated unless told otherwise
pub struct Harness {
    pub manager: SyncManager,
    pub transport: Arc<FakeTransport>,
    pub connectivity: Connectivity,
    pub session: Session,
    pub notifications: broadcast::Receiver<SyncNotification>,
}

impl Harness {
    pub fn start(config: SyncConfig, transport: Arc<FakeTransport>) -> Self {
        Self::with_store(config, transport, Arc::new(MemoryQueueStore::new()))
    }

    pub fn with_store(
        config: SyncConfig,
        transport: Arc<FakeTransport>,
        store: Arc<dyn QueueStore>,
    ) -> Self {
        let connectivity = Connectivity::new(true);
        let session = Session::authenticated("token");
        let context = SyncContext::new(store, transport.clone(), connectivity.clone(), session.clone())
            .with_realtime(transport.clone());
        Self::with_context(config, transport, context)
    }

    pub fn with_context(config: SyncConfig, transport: Arc<FakeTransport>, context: SyncContext) -> Self {
        let connectivity = context.connectivity.clone();
        let session = context.session.clone();
        let manager = SyncManager::spawn(config, context);
        let notifications = manager.subscribe();
        Self {
            manager,
            transport,
            connectivity,
            session,
            notifications,
        }
    }

    /// Next notification named `name`, skipping others
    pub async fn next(&mut self, name: &str) -> SyncNotification {
        let wait = async {
            loop {
                match self.notifications.recv().await {
                    Ok(n) if n.name() == name => return n,
                    Ok(_) => continue,
                    Err(e) => panic!("notification channel failed: {}", e),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(30), wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {}", name))
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.manager.snapshot().await.expect("manager stopped")
    }

    /// Poll the queue until `condition` holds
    pub async fn wait_for_queue(&self, mut condition: impl FnMut(&QueueSnapshot) -> bool) -> QueueSnapshot {
        let poll = async {
            loop {
                let snapshot = self.snapshot().await;
                if condition(&snapshot) {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(30), poll)
            .await
            .expect("queue never reached the expected state")
    }
}

/// Poll `condition` until it holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(30), poll)
        .await
        .expect("condition never held");
}
