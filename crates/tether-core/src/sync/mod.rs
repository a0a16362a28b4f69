//! Sync engine
//!
//! Queues local mutations as durable [`SyncEvent`]s and sends them through
//! a [`SyncManager`], which orders them, claims them against other
//! instances, classifies failures and retries transient ones.

mod backoff;
mod classify;
mod event;
mod manager;
mod queue;

#[cfg(test)]
mod test_support;

pub use backoff::{backoff, backoff_with_jitter, MAX_BACKOFF_EXPONENT};
pub use classify::classify;
pub use event::{
    join_url, CompletionHandler, EventTransport, FireState, NoObjects, ObjectRegistry, Operation,
    Payload, SyncCompletion, SyncEvent, SyncEventRecord, SyncTarget,
};
pub use manager::{QueueSnapshot, QueuedEvent, SyncContext, SyncManager};
pub use queue::SyncQueue;
