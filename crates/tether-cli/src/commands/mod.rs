//! Command handlers

pub mod config;
pub mod flush;
pub mod queue;
pub mod status;

use anyhow::{Context, Result};

use tether_core::{SqliteQueueStore, SyncConfig};

/// Open the durable queue named by `config`
pub fn open_store(config: &SyncConfig) -> Result<SqliteQueueStore> {
    let path = config.queue_db_path();
    let store = SqliteQueueStore::open(&path)
        .with_context(|| format!("Failed to open queue at {:?}", path))?;
    Ok(store.with_claim_expiration(config.claim_expiration()))
}
