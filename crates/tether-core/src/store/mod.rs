//! Durable queue store
//!
//! Mirrors the in-memory sync queue so pending work survives a reload, and
//! provides the atomic claim that lets several client instances share one
//! queue without firing the same event twice.
//!
//! ## Claims
//!
//! `claim_sync_event` marks a row as owned by one instance. It succeeds when
//! the row exists and is unowned, already owned by the caller, or owned by
//! a claim older than the store's claim expiration. Rows are deleted once
//! the transport has answered with a final outcome; rewriting a row releases
//! its claim.

mod memory;
mod schema;
mod sqlite;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::sync::SyncEventRecord;

pub use memory::MemoryQueueStore;
pub use schema::SCHEMA_VERSION;
pub use sqlite::{SqliteQueueStore, StoredEvent};

/// Default age after which a claim is considered abandoned
///
/// Matches `SyncConfig::claim_expiration` for the default config; an event
/// claimed by a live instance is answered well within it.
pub const DEFAULT_CLAIM_EXPIRATION: Duration = Duration::from_secs(42);

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert or replace events, releasing any claim on them
    async fn write_sync_events(&self, events: Vec<SyncEventRecord>) -> StoreResult<()>;

    /// Remove events by id; missing ids are ignored
    async fn delete_sync_events(&self, ids: Vec<String>) -> StoreResult<()>;

    /// Atomically claim an event for `owner`
    ///
    /// Returns `false` when the event is gone or another live instance
    /// owns it.
    async fn claim_sync_event(&self, id: &str, owner: &str) -> StoreResult<bool>;

    /// Unclaimed and stale-claimed events, oldest first
    async fn load_sync_queue(&self) -> StoreResult<Vec<SyncEventRecord>>;
}
