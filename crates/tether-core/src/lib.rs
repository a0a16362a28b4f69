//! Tether core library
//!
//! An offline-first synchronization engine for messaging clients. Local
//! mutations are queued as [`SyncEvent`]s, persisted to a durable
//! [`QueueStore`] and sent to the server in order once the client is online
//! and authenticated, over request/response HTTP or a realtime WebSocket.
//!
//! # Quick Start
//!
//! ```text
//! let config = SyncConfig::load()?;
//! let store = Arc::new(SqliteQueueStore::open(&config.queue_db_path())?);
//! let context = SyncContext::new(store, Arc::new(HttpFirer::new()), connectivity, session);
//! let manager = SyncManager::spawn(config, context);
//!
//! manager.request(
//!     SyncEvent::http(Operation::Create, "conversations")
//!         .with_target("conv1")
//!         .with_data(json!({ "id": "conv1" })),
//! );
//! ```
//!
//! # Modules
//!
//! - `sync`: sync events, the queue and the manager (main entry point)
//! - `store`: durable queue stores (SQLite and in-memory)
//! - `transport`: HTTP firer, realtime correlator and WebSocket channel
//! - `cache`: local object cache with coalesced eviction
//! - `connectivity` / `session`: online state and session token holders
//! - `notify`: queue notifications
//! - `config`: engine configuration

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod notify;
pub mod session;
pub mod store;
pub mod sync;
pub mod transport;

pub use cache::{CachedObject, ObjectCache, QueryRegistry};
pub use config::SyncConfig;
pub use connectivity::{spawn_reachability_probe, Connectivity};
pub use error::{ErrorKind, StoreError, StoreResult, SyncError, TransportError};
pub use notify::{Notifier, SyncNotification};
pub use session::Session;
pub use store::{MemoryQueueStore, QueueStore, SqliteQueueStore, StoredEvent};
pub use sync::{
    EventTransport, FireState, ObjectRegistry, Operation, Payload, QueueSnapshot, SyncCompletion,
    SyncContext, SyncEvent, SyncEventRecord, SyncManager, SyncTarget,
};
pub use transport::{
    HttpFirer, RealtimeChannel, RealtimeFirer, RequestCorrelator, RequestFirer, TransportResponse,
    WebSocketChannel,
};
