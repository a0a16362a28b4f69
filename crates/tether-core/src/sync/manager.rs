//! Sync manager
//!
//! One tokio task owns both queues and every event's fire state. The public
//! [`SyncManager`] handle only sends it commands; transport calls, claims
//! and timers run in their own tasks and report back on an internal channel.
//!
//! ## Lanes
//!
//! - **Standard**: FIFO, at most one event validating or firing at a time.
//!   The head is claimed in the durable store before it is sent.
//! - **Receipt**: unordered, up to `max_receipt_connections` in flight, no
//!   claim.
//!
//! ## Durable store
//!
//! Store calls go through a single worker task that runs them in submission
//! order, so the write issued when an event is enqueued always lands before
//! the claim issued when it reaches the head.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backoff::{backoff, MAX_BACKOFF_EXPONENT};
use super::classify::{classify, normalize_id_in_use, to_sync_error};
use super::event::{FireState, NoObjects, ObjectRegistry, Operation, SyncEvent, SyncEventRecord};
use super::queue::SyncQueue;
use crate::config::SyncConfig;
use crate::connectivity::Connectivity;
use crate::error::{ErrorKind, SyncError};
use crate::notify::{Notifier, SyncNotification};
use crate::session::Session;
use crate::store::QueueStore;
use crate::transport::{error_ids, RealtimeFirer, RequestFirer, TransportResponse};

/// Collaborators the manager works against
#[derive(Clone)]
pub struct SyncContext {
    pub store: Arc<dyn QueueStore>,
    pub requests: Arc<dyn RequestFirer>,
    pub realtime: Option<Arc<dyn RealtimeFirer>>,
    pub connectivity: Connectivity,
    pub session: Session,
    pub objects: Arc<dyn ObjectRegistry>,
}

impl SyncContext {
    pub fn new(
        store: Arc<dyn QueueStore>,
        requests: Arc<dyn RequestFirer>,
        connectivity: Connectivity,
        session: Session,
    ) -> Self {
        Self {
            store,
            requests,
            realtime: None,
            connectivity,
            session,
            objects: Arc::new(NoObjects),
        }
    }

    pub fn with_realtime(mut self, realtime: Arc<dyn RealtimeFirer>) -> Self {
        self.realtime = Some(realtime);
        self
    }

    pub fn with_objects(mut self, objects: Arc<dyn ObjectRegistry>) -> Self {
        self.objects = objects;
        self
    }
}

/// One queued event as seen from outside the manager
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub record: SyncEventRecord,
    pub state: FireState,
}

/// Point-in-time view of both lanes
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    /// Whether events from a prior session have been recovered
    pub loaded: bool,
    pub standard: Vec<QueuedEvent>,
    pub receipts: Vec<QueuedEvent>,
}

impl QueueSnapshot {
    pub fn len(&self) -> usize {
        self.standard.len() + self.receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of the standard queue, head first
    pub fn ids(&self) -> Vec<String> {
        self.standard.iter().map(|e| e.record.id.clone()).collect()
    }
}

/// Commands from the public handle
enum Command {
    Request(Box<SyncEvent>),
    Snapshot(oneshot::Sender<QueueSnapshot>),
    Destroy,
}

/// Completions from tasks the actor spawned
enum Internal {
    Loaded(Vec<SyncEventRecord>),
    Claimed { id: String, attempt: u64, claimed: bool },
    Fired {
        id: String,
        attempt: u64,
        response: TransportResponse,
    },
    Resume,
}

enum StoreOp {
    Write(Vec<SyncEventRecord>),
    Delete(Vec<String>),
    Claim {
        id: String,
        owner: String,
        reply: oneshot::Sender<bool>,
    },
    Load {
        reply: oneshot::Sender<Vec<SyncEventRecord>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Standard,
    Receipt,
}

/// Handle to a running sync manager
///
/// Cheap to clone. The manager stops on [`SyncManager::destroy`] or when
/// every handle has been dropped.
#[derive(Clone)]
pub struct SyncManager {
    command_tx: mpsc::UnboundedSender<Command>,
    notifier: Notifier,
    instance_id: String,
}

impl SyncManager {
    /// Spawn the manager task and start recovering persisted events
    pub fn spawn(config: SyncConfig, context: SyncContext) -> Self {
        let instance_id = format!("tether-{}", Uuid::new_v4());
        let notifier = Notifier::default();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (store_tx, store_rx) = mpsc::unbounded_channel();

        tokio::spawn(store_worker(context.store.clone(), store_rx));

        let actor = SyncActor {
            config,
            ctx: context,
            instance_id: instance_id.clone(),
            queue: SyncQueue::new(),
            receipts: SyncQueue::new(),
            notifier: notifier.clone(),
            store_tx,
            internal_tx,
            loaded: false,
            destroyed: false,
            next_attempt: 0,
        };
        tokio::spawn(actor.run(command_rx, internal_rx));

        Self {
            command_tx,
            notifier,
            instance_id,
        }
    }

    /// Enqueue an event; its outcome arrives through its completion handler
    /// and the notification channel
    pub fn request(&self, event: SyncEvent) {
        if self.command_tx.send(Command::Request(Box::new(event))).is_err() {
            debug!("Sync manager stopped, dropping request");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotification> {
        self.notifier.subscribe()
    }

    /// Current queue contents; `None` once the manager has stopped
    pub async fn snapshot(&self) -> Option<QueueSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.command_tx.send(Command::Snapshot(tx)).ok()?;
        rx.await.ok()
    }

    /// Stop processing; queued events stay in the durable store
    pub fn destroy(&self) {
        let _ = self.command_tx.send(Command::Destroy);
    }

    /// Owner tag this instance uses for durable claims
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

struct SyncActor {
    config: SyncConfig,
    ctx: SyncContext,
    instance_id: String,
    queue: SyncQueue,
    receipts: SyncQueue,
    notifier: Notifier,
    store_tx: mpsc::UnboundedSender<StoreOp>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    loaded: bool,
    destroyed: bool,
    next_attempt: u64,
}

impl SyncActor {
    async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<Command>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
    ) {
        let mut online_rx = self.ctx.connectivity.subscribe();
        let mut session_rx = self.ctx.session.subscribe();
        let mut sweep = tokio::time::interval(self.config.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.load();

        loop {
            tokio::select! {
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(Command::Request(event)) => self.on_request(*event),
                        Some(Command::Snapshot(reply)) => {
                            let _ = reply.send(self.snapshot());
                        }
                        Some(Command::Destroy) | None => break,
                    }
                }

                Some(msg) = internal_rx.recv() => {
                    match msg {
                        Internal::Loaded(records) => self.on_loaded(records),
                        Internal::Claimed { id, attempt, claimed } => {
                            self.on_claimed(&id, attempt, claimed)
                        }
                        Internal::Fired { id, attempt, response } => {
                            self.on_result(&id, attempt, response)
                        }
                        Internal::Resume => self.process_next(),
                    }
                }

                Ok(()) = online_rx.changed() => {
                    let online = *online_rx.borrow_and_update();
                    self.on_connectivity(online);
                }

                Ok(()) = session_rx.changed() => {
                    let authenticated = session_rx.borrow_and_update().is_some();
                    if authenticated {
                        debug!("Session authenticated, resuming sync queue");
                        self.process_next();
                    }
                }

                _ = sweep.tick() => self.sweep(),
            }
        }

        self.destroyed = true;
        info!(
            "Sync manager {} stopped with {} queued events",
            self.instance_id,
            self.queue.len() + self.receipts.len()
        );
    }

    fn load(&self) {
        let (reply, rx) = oneshot::channel();
        self.store(StoreOp::Load { reply });
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let records = rx.await.unwrap_or_default();
            let _ = internal.send(Internal::Loaded(records));
        });
    }

    fn store(&self, op: StoreOp) {
        if self.store_tx.send(op).is_err() {
            warn!("Queue store worker is gone");
        }
    }

    fn lane(&self, lane: Lane) -> &SyncQueue {
        match lane {
            Lane::Standard => &self.queue,
            Lane::Receipt => &self.receipts,
        }
    }

    fn lane_mut(&mut self, lane: Lane) -> &mut SyncQueue {
        match lane {
            Lane::Standard => &mut self.queue,
            Lane::Receipt => &mut self.receipts,
        }
    }

    fn lane_of(&self, id: &str) -> Option<Lane> {
        if self.queue.contains(id) {
            Some(Lane::Standard)
        } else if self.receipts.contains(id) {
            Some(Lane::Receipt)
        } else {
            None
        }
    }

    fn snapshot(&self) -> QueueSnapshot {
        let view = |queue: &SyncQueue| -> Vec<QueuedEvent> {
            queue
                .iter()
                .map(|event| QueuedEvent {
                    record: event.to_record(),
                    state: event.state(),
                })
                .collect()
        };
        QueueSnapshot {
            loaded: self.loaded,
            standard: view(&self.queue),
            receipts: view(&self.receipts),
        }
    }

    fn on_request(&mut self, mut event: SyncEvent) {
        if self.destroyed {
            return;
        }

        if event.operation == Operation::Patch {
            if let Some(create) = event
                .target
                .as_deref()
                .and_then(|target| self.queue.find_unfired_create(target))
            {
                debug!("Folding PATCH {} into queued CREATE {}", event.id, create.id);
                return;
            }
        }

        event.state = FireState::Idle;
        let record = event.to_record();
        debug!("Queued {} {} (target {:?})", event.operation, event.id, event.target);

        if event.is_receipt() {
            self.receipts.push(event);
        } else {
            if event.operation == Operation::Delete {
                if let Some(target) = event.target.clone() {
                    self.purge_dependents(&target);
                }
            }
            self.queue.push(event);
        }

        self.store(StoreOp::Write(vec![record.clone()]));
        self.notifier.emit(SyncNotification::Added { event: record });
        self.process_next();
    }

    fn on_loaded(&mut self, records: Vec<SyncEventRecord>) {
        let pending = std::mem::take(&mut self.queue);
        let mut recovered = 0;

        for record in records {
            if pending.contains(&record.id) || self.receipts.contains(&record.id) {
                continue;
            }
            let event = SyncEvent::from_record(record);
            if event.is_receipt() {
                self.receipts.push(event);
            } else {
                self.queue.push(event);
            }
            recovered += 1;
        }
        // Recovered events predate anything requested during startup
        for event in pending.into_events() {
            self.queue.push(event);
        }

        self.loaded = true;
        if recovered > 0 {
            info!("Recovered {} pending sync events", recovered);
        }
        self.process_next();
    }

    fn can_fire(&self) -> bool {
        !self.destroyed
            && self.loaded
            && self.ctx.session.is_authenticated()
            && self.ctx.connectivity.is_online()
    }

    fn transport_ready(&self, event: &SyncEvent) -> bool {
        !event.is_realtime() || self.ctx.realtime.as_ref().is_some_and(|rt| rt.is_open())
    }

    fn process_next(&mut self) {
        if !self.can_fire() {
            return;
        }
        self.process_receipts();

        let now = Instant::now();
        let Some(head) = self.queue.front() else {
            return;
        };
        match head.state() {
            FireState::Idle => {}
            FireState::Deferred { until } if until <= now => {}
            _ => return,
        }
        if !self.transport_ready(head) {
            debug!("Realtime channel closed, holding {}", head.id);
            return;
        }

        let id = head.id.clone();
        let attempt = self.next_attempt();
        if let Some(head) = self.queue.front_mut() {
            head.state = FireState::Validating { since: now, attempt };
        }
        self.claim(id, attempt);
    }

    fn process_receipts(&mut self) {
        let firing = self.receipts.iter().filter(|e| e.is_firing()).count();
        let slots = self.config.max_receipt_connections.saturating_sub(firing);
        if slots == 0 {
            return;
        }

        let now = Instant::now();
        let ready: Vec<String> = self
            .receipts
            .iter()
            .filter(|event| match event.state() {
                FireState::Idle => true,
                FireState::Deferred { until } => until <= now,
                _ => false,
            })
            .filter(|event| self.transport_ready(event))
            .take(slots)
            .map(|event| event.id.clone())
            .collect();

        for id in ready {
            let attempt = self.next_attempt();
            self.fire(Lane::Receipt, &id, attempt);
        }
    }

    fn next_attempt(&mut self) -> u64 {
        let attempt = self.next_attempt;
        self.next_attempt += 1;
        attempt
    }

    /// Ask the store worker for a claim, giving up after the validation
    /// expiration
    fn claim(&self, id: String, attempt: u64) {
        let (reply, rx) = oneshot::channel();
        self.store(StoreOp::Claim {
            id: id.clone(),
            owner: self.instance_id.clone(),
            reply,
        });

        let internal = self.internal_tx.clone();
        let timeout = self.config.validation_expiration();
        tokio::spawn(async move {
            let claimed = match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(claimed)) => claimed,
                Ok(Err(_)) => false,
                Err(_) => {
                    warn!("Claim of {} timed out", id);
                    false
                }
            };
            let _ = internal.send(Internal::Claimed {
                id,
                attempt,
                claimed,
            });
        });
    }

    fn on_claimed(&mut self, id: &str, attempt: u64, claimed: bool) {
        let can_fire = self.can_fire();
        let Some(event) = self.queue.get_mut(id) else {
            // Purged while validating
            self.process_next();
            return;
        };
        if !matches!(event.state, FireState::Validating { attempt: a, .. } if a == attempt) {
            debug!("Ignoring stale claim result for {}", id);
            return;
        }

        if !claimed {
            debug!("Event {} claimed by another instance, dropping", id);
            self.queue.remove(id);
            self.process_next();
            return;
        }

        if !can_fire {
            event.state = FireState::Idle;
            return;
        }
        self.fire(Lane::Standard, id, attempt);
    }

    fn fire(&mut self, lane: Lane, id: &str, attempt: u64) {
        let token = self.ctx.session.token();
        let queue = match lane {
            Lane::Standard => &mut self.queue,
            Lane::Receipt => &mut self.receipts,
        };
        let Some(event) = queue.get_mut(id) else {
            return;
        };

        event.state = FireState::Firing {
            since: Instant::now(),
            attempt,
        };
        event.last_attempt = Some(attempt);
        info!(
            "Firing {} {} (target {:?}, try {})",
            event.operation,
            event.id,
            event.target,
            event.retry_count + 1
        );

        let id = event.id.clone();
        let internal = self.internal_tx.clone();

        if event.is_realtime() {
            let request = event.render_realtime(self.ctx.objects.as_ref());
            let realtime = self.ctx.realtime.clone();
            tokio::spawn(async move {
                let response = match (realtime, request) {
                    (Some(realtime), Some(request)) => realtime.fire(request).await,
                    _ => TransportResponse::failure(
                        None,
                        error_ids::NOT_CONNECTED,
                        "No realtime transport",
                    ),
                };
                let _ = internal.send(Internal::Fired {
                    id,
                    attempt,
                    response,
                });
            });
        } else {
            let max_timeout = self.config.max_request_timeout();
            let request = event
                .render_http(
                    self.ctx.objects.as_ref(),
                    self.config.base_url.as_deref(),
                    token.as_deref(),
                    self.config.http_timeout(),
                )
                .map(|mut request| {
                    request.timeout = request.timeout.min(max_timeout);
                    request
                });
            let requests = self.ctx.requests.clone();
            tokio::spawn(async move {
                let response = match request {
                    Some(request) => requests.fire(request).await,
                    None => TransportResponse::failure(
                        None,
                        error_ids::NETWORK_ERROR,
                        "Event has no request rendering",
                    ),
                };
                let _ = internal.send(Internal::Fired {
                    id,
                    attempt,
                    response,
                });
            });
        }
    }

    fn on_result(&mut self, id: &str, attempt: u64, response: TransportResponse) {
        let Some(lane) = self.lane_of(id) else {
            debug!("Result for {} arrived after it left the queue", id);
            self.process_next();
            return;
        };
        let Some(event) = self.lane_mut(lane).get_mut(id) else {
            return;
        };
        // A released attempt may answer after the event was fired again
        if !event.awaits_answer(attempt) {
            debug!("Ignoring stale result for {} (attempt {})", id, attempt);
            return;
        }
        event.state = FireState::Idle;
        event.last_attempt = None;
        let response = normalize_id_in_use(event, response);

        if response.is_cancelled() {
            if let Some(event) = self.lane_mut(lane).remove(id) {
                debug!("Operation for {} was cancelled", id);
                self.abort(&event);
            }
            self.process_next();
        } else if response.success {
            self.on_success(lane, id, response.data);
        } else {
            self.on_failure(lane, id, response);
        }
    }

    fn on_success(&mut self, lane: Lane, id: &str, data: Value) {
        let Some(mut event) = self.lane_mut(lane).remove(id) else {
            return;
        };
        info!("Synced {} {}", event.operation, event.id);

        event.success = Some(true);
        event.complete(Ok(data.clone()));
        self.store(StoreOp::Delete(vec![event.id.clone()]));
        self.notifier.emit(SyncNotification::Success {
            target: event.target.clone(),
            event: event.to_record(),
            response: data,
        });
        self.process_next();
    }

    fn on_failure(&mut self, lane: Lane, id: &str, response: TransportResponse) {
        let online = self.ctx.connectivity.is_online();
        let Some(event) = self.lane(lane).get(id) else {
            return;
        };
        let kind = classify(&response, event, online, &self.config);
        let error = to_sync_error(kind, &response);

        if kind.is_transient() {
            self.retry_later(lane, id, kind);
        } else if kind.is_terminal() {
            self.fail(lane, id, error);
        } else if kind == ErrorKind::Reauthorize {
            warn!("{} needs re-authentication, pausing sync queue", id);
            let Some(event) = self.lane_mut(lane).get_mut(id) else {
                return;
            };
            event.complete(Err(error));
            let record = event.to_record();
            self.store(StoreOp::Write(vec![record]));
            // Blocks firing until a new token arrives
            self.ctx.session.clear();
        } else {
            debug!("{} failed while offline, waiting for reconnect", id);
            let record = event.to_record();
            self.store(StoreOp::Write(vec![record]));
        }
    }

    /// Defer the event by its backoff and count the retry
    fn retry_later(&mut self, lane: Lane, id: &str, kind: ErrorKind) {
        let max_wait = self.config.max_unavailable_retry_wait_secs;
        let Some(event) = self.lane_mut(lane).get_mut(id) else {
            return;
        };
        let delay = backoff(max_wait, event.retry_count.min(MAX_BACKOFF_EXPONENT));
        event.retry_count += 1;
        event.state = FireState::Deferred {
            until: Instant::now() + delay,
        };
        warn!(
            "{} {} failed with {}, retry {} in {:?}",
            event.operation, id, kind, event.retry_count, delay
        );
        let record = event.to_record();
        self.store(StoreOp::Write(vec![record]));
        self.schedule_resume(delay);
    }

    /// Remove the event, report the failure and advance
    fn fail(&mut self, lane: Lane, id: &str, error: SyncError) {
        let Some(mut event) = self.lane_mut(lane).remove(id) else {
            return;
        };
        warn!("{} {} failed: {}", event.operation, id, error);

        event.success = Some(false);
        event.complete(Err(error.clone()));
        self.store(StoreOp::Delete(vec![event.id.clone()]));
        self.notifier.emit(SyncNotification::Error {
            target: event.target.clone(),
            event: event.to_record(),
            error,
        });

        if event.operation == Operation::Create {
            if let Some(ref target) = event.target {
                self.purge_dependents(target);
            }
        }
        self.process_next();
    }

    /// Remove every unsent event depending on `identifier` from both lanes
    fn purge_dependents(&mut self, identifier: &str) {
        let mut purged = Vec::new();
        for lane in [Lane::Standard, Lane::Receipt] {
            let ids = self.lane(lane).dependents_of(identifier);
            for id in ids {
                let queue = self.lane_mut(lane);
                // No mid-flight cancellation
                if queue.get(&id).is_some_and(|e| e.is_firing()) {
                    continue;
                }
                if let Some(event) = queue.remove(&id) {
                    purged.push(event);
                }
            }
        }

        if purged.is_empty() {
            return;
        }
        debug!("Purging {} events depending on {}", purged.len(), identifier);
        for event in &purged {
            self.notifier.emit(SyncNotification::Abort {
                target: event.target.clone(),
                event: event.to_record(),
            });
        }
        self.store(StoreOp::Delete(purged.into_iter().map(|e| e.id).collect()));
    }

    fn abort(&self, event: &SyncEvent) {
        self.store(StoreOp::Delete(vec![event.id.clone()]));
        self.notifier.emit(SyncNotification::Abort {
            target: event.target.clone(),
            event: event.to_record(),
        });
    }

    /// Going offline releases in-flight events so they fire again after
    /// reconnecting; a late answer from a released call is dropped once
    /// the event has fired again.
    fn on_connectivity(&mut self, online: bool) {
        if online {
            if let Some(head) = self.queue.front_mut() {
                head.return_to_online_count += 1;
            }
            self.schedule_resume(self.config.reconnect_settle());
        } else {
            if let Some(head) = self.queue.front_mut() {
                if head.is_firing() {
                    head.state = FireState::Idle;
                }
            }
            for receipt in self.receipts.iter_mut() {
                if receipt.is_firing() {
                    receipt.state = FireState::Idle;
                }
            }
        }
    }

    /// Demote expired firing, validating and deferred states
    fn sweep(&mut self) {
        let now = Instant::now();
        let firing_expiration = self.config.firing_expiration();
        let validation_expiration = self.config.validation_expiration();
        let mut demoted = 0;

        for event in self.queue.iter_mut().chain(self.receipts.iter_mut()) {
            let expired = match event.state {
                FireState::Idle => false,
                FireState::Firing { since, .. } => {
                    let expired = now.duration_since(since) >= firing_expiration;
                    if expired {
                        warn!("{} has been firing for {:?}, releasing", event.id, firing_expiration);
                    }
                    expired
                }
                FireState::Validating { since, .. } => {
                    now.duration_since(since) >= validation_expiration
                }
                FireState::Deferred { until } => until <= now,
            };
            if expired {
                event.state = FireState::Idle;
                demoted += 1;
            }
        }

        if demoted > 0 {
            self.process_next();
        }
    }

    fn schedule_resume(&self, delay: Duration) {
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(Internal::Resume);
        });
    }
}

/// Run store operations one at a time, in submission order
async fn store_worker(store: Arc<dyn QueueStore>, mut rx: mpsc::UnboundedReceiver<StoreOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            StoreOp::Write(records) => {
                let count = records.len();
                if let Err(e) = store.write_sync_events(records).await {
                    warn!("Failed to persist {} sync events: {}", count, e);
                }
            }
            StoreOp::Delete(ids) => {
                if let Err(e) = store.delete_sync_events(ids).await {
                    warn!("Failed to delete sync events: {}", e);
                }
            }
            StoreOp::Claim { id, owner, reply } => {
                let claimed = match store.claim_sync_event(&id, &owner).await {
                    Ok(claimed) => claimed,
                    Err(e) => {
                        warn!("Claim of {} failed: {}", id, e);
                        false
                    }
                };
                let _ = reply.send(claimed);
            }
            StoreOp::Load { reply } => {
                let records = match store.load_sync_queue().await {
                    Ok(records) => records,
                    Err(e) => {
                        warn!("Failed to load sync queue: {}", e);
                        Vec::new()
                    }
                };
                let _ = reply.send(records);
            }
        }
    }
    debug!("Queue store worker stopped");
}
