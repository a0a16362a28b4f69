//! In-process queue store
//!
//! Clones share one table, so two managers built over clones of the same
//! store behave like two tabs over one database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{QueueStore, DEFAULT_CLAIM_EXPIRATION};
use crate::error::StoreResult;
use crate::sync::SyncEventRecord;

#[derive(Debug, Clone)]
struct Row {
    record: SyncEventRecord,
    seq: u64,
    claim: Option<(String, Instant)>,
}

#[derive(Debug, Default)]
struct Table {
    rows: HashMap<String, Row>,
    next_seq: u64,
}

#[derive(Debug, Clone)]
pub struct MemoryQueueStore {
    table: Arc<Mutex<Table>>,
    claim_expiration: Duration,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(Table::default())),
            claim_expiration: DEFAULT_CLAIM_EXPIRATION,
        }
    }

    pub fn with_claim_expiration(mut self, expiration: Duration) -> Self {
        self.claim_expiration = expiration;
        self
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.table().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.table().rows.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<SyncEventRecord> {
        self.table().rows.get(id).map(|row| row.record.clone())
    }

    /// Owner of the claim on `id`, if any
    pub fn claimed_by(&self, id: &str) -> Option<String> {
        self.table()
            .rows
            .get(id)
            .and_then(|row| row.claim.as_ref().map(|(owner, _)| owner.clone()))
    }

    fn is_stale(&self, claimed_at: Instant) -> bool {
        claimed_at.elapsed() >= self.claim_expiration
    }
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn write_sync_events(&self, events: Vec<SyncEventRecord>) -> StoreResult<()> {
        let mut table = self.table();
        for record in events {
            let seq = match table.rows.get(&record.id) {
                Some(row) => row.seq,
                None => {
                    table.next_seq += 1;
                    table.next_seq
                }
            };
            table.rows.insert(
                record.id.clone(),
                Row {
                    record,
                    seq,
                    claim: None,
                },
            );
        }
        Ok(())
    }

    async fn delete_sync_events(&self, ids: Vec<String>) -> StoreResult<()> {
        let mut table = self.table();
        for id in ids {
            table.rows.remove(&id);
        }
        Ok(())
    }

    async fn claim_sync_event(&self, id: &str, owner: &str) -> StoreResult<bool> {
        let mut table = self.table();
        let Some(row) = table.rows.get_mut(id) else {
            return Ok(false);
        };
        let claimable = match row.claim {
            None => true,
            Some((ref current, claimed_at)) => current == owner || self.is_stale(claimed_at),
        };
        if claimable {
            row.claim = Some((owner.to_string(), Instant::now()));
        }
        Ok(claimable)
    }

    async fn load_sync_queue(&self) -> StoreResult<Vec<SyncEventRecord>> {
        let table = self.table();
        let mut rows: Vec<&Row> = table
            .rows
            .values()
            .filter(|row| match row.claim {
                None => true,
                Some((_, claimed_at)) => self.is_stale(claimed_at),
            })
            .collect();
        rows.sort_by_key(|row| (row.record.created_at, row.seq));
        Ok(rows.into_iter().map(|row| row.record.clone()).collect())
    }
}
