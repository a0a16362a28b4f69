//! SQLite-backed queue store
//!
//! Several processes may open the same database file; the claim is a single
//! conditional `UPDATE`, so SQLite's write lock makes it atomic across them.
//!
//! The async [`QueueStore`] methods run on tokio's blocking pool: a call may
//! wait out another process's write lock for the whole busy timeout.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::schema::{init_schema, needs_init};
use super::{QueueStore, DEFAULT_CLAIM_EXPIRATION};
use crate::error::{StoreError, StoreResult};
use crate::sync::SyncEventRecord;

/// A durable row with its claim, for inspection
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub record: SyncEventRecord,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
}

pub struct SqliteQueueStore {
    conn: Arc<Mutex<Connection>>,
    claim_expiration: Duration,
}

impl SqliteQueueStore {
    /// Open or create the queue database at `path`
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        if needs_init(&conn) {
            init_schema(&conn)?;
        }
        debug!("Opened queue store at {:?}", path);
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            claim_expiration: DEFAULT_CLAIM_EXPIRATION,
        }
    }

    /// Age after which another instance's claim may be taken over
    pub fn with_claim_expiration(mut self, expiration: Duration) -> Self {
        self.claim_expiration = expiration;
        self
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the connection on the blocking pool
    async fn blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut conn)
        })
        .await?
    }

    fn stale_before(&self) -> i64 {
        Utc::now().timestamp_millis() - self.claim_expiration.as_millis() as i64
    }

    /// Every stored row, claimed or not, oldest first
    pub fn list(&self) -> StoreResult<Vec<StoredEvent>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT record, claimed_by, claimed_at FROM sync_queue ORDER BY created_at, rowid",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(record, claimed_by, claimed_at)| -> StoreResult<StoredEvent> {
                Ok(StoredEvent {
                    record: serde_json::from_str(&record)?,
                    claimed_by,
                    claimed_at: claimed_at.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
                })
            })
            .collect()
    }

    /// Number of stored rows
    pub fn count(&self) -> StoreResult<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Look up one row by id
    pub fn get(&self, id: &str) -> StoreResult<Option<SyncEventRecord>> {
        let record: Option<String> = self
            .conn()
            .query_row(
                "SELECT record FROM sync_queue WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        record
            .map(|r| serde_json::from_str(&r).map_err(StoreError::from))
            .transpose()
    }

    /// Delete every row; returns how many were removed
    pub fn clear(&self) -> StoreResult<usize> {
        Ok(self.conn().execute("DELETE FROM sync_queue", [])?)
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn write_sync_events(&self, events: Vec<SyncEventRecord>) -> StoreResult<()> {
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO sync_queue (id, operation, target, record, created_at, claimed_by, claimed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL)
                     ON CONFLICT(id) DO UPDATE SET
                         operation = excluded.operation,
                         target = excluded.target,
                         record = excluded.record,
                         claimed_by = NULL,
                         claimed_at = NULL",
                )?;
                for event in &events {
                    stmt.execute(params![
                        event.id,
                        event.operation.as_str(),
                        event.target,
                        serde_json::to_string(event)?,
                        event.created_at.timestamp_millis(),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_sync_events(&self, ids: Vec<String>) -> StoreResult<()> {
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare("DELETE FROM sync_queue WHERE id = ?1")?;
                for id in &ids {
                    stmt.execute([id])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn claim_sync_event(&self, id: &str, owner: &str) -> StoreResult<bool> {
        let id = id.to_string();
        let owner = owner.to_string();
        let stale_before = self.stale_before();
        self.blocking(move |conn| {
            let changed = conn.execute(
                "UPDATE sync_queue SET claimed_by = ?2, claimed_at = ?3
                 WHERE id = ?1
                   AND (claimed_by IS NULL OR claimed_by = ?2 OR claimed_at < ?4)",
                params![id, owner, Utc::now().timestamp_millis(), stale_before],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn load_sync_queue(&self) -> StoreResult<Vec<SyncEventRecord>> {
        let stale_before = self.stale_before();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT record FROM sync_queue
                 WHERE claimed_by IS NULL OR claimed_at < ?1
                 ORDER BY created_at, rowid",
            )?;
            let records = stmt
                .query_map([stale_before], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            records
                .iter()
                .map(|r| serde_json::from_str(r).map_err(StoreError::from))
                .collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{Operation, SyncEvent};
    use serde_json::json;
    use tempfile::TempDir;

    fn record(id: &str, target: &str) -> SyncEventRecord {
        SyncEvent::http(Operation::Create, "/conversations")
            .with_id(id)
            .with_target(target)
            .with_data(json!({ "id": target }))
            .to_record()
    }

    #[tokio::test]
    async fn test_write_load_delete() {
        let store = SqliteQueueStore::open_in_memory().unwrap();
        store
            .write_sync_events(vec![record("e1", "a"), record("e2", "b")])
            .await
            .unwrap();

        let loaded = store.load_sync_queue().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "e1");
        assert_eq!(loaded[0].target.as_deref(), Some("a"));
        assert_eq!(loaded[0].data, record("e1", "a").data);

        store.delete_sync_events(vec!["e1".to_string()]).await.unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.get("e1").unwrap().is_none());
        assert!(store.get("e2").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = SqliteQueueStore::open_in_memory().unwrap();
        store.write_sync_events(vec![record("e1", "a")]).await.unwrap();

        assert!(store.claim_sync_event("e1", "tab-a").await.unwrap());
        assert!(!store.claim_sync_event("e1", "tab-b").await.unwrap());
        // Re-claiming our own event succeeds
        assert!(store.claim_sync_event("e1", "tab-a").await.unwrap());
        // Missing events cannot be claimed
        assert!(!store.claim_sync_event("nope", "tab-a").await.unwrap());

        // Claimed rows are not handed out on load
        assert!(store.load_sync_queue().await.unwrap().is_empty());
        let listed = store.list().unwrap();
        assert_eq!(listed[0].claimed_by.as_deref(), Some("tab-a"));
        assert!(listed[0].claimed_at.is_some());
    }

    #[tokio::test]
    async fn test_rewrite_releases_claim() {
        let store = SqliteQueueStore::open_in_memory().unwrap();
        store.write_sync_events(vec![record("e1", "a")]).await.unwrap();
        assert!(store.claim_sync_event("e1", "tab-a").await.unwrap());

        let mut retried = record("e1", "a");
        retried.retry_count = 1;
        store.write_sync_events(vec![retried]).await.unwrap();

        let loaded = store.load_sync_queue().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].retry_count, 1);
        assert!(store.claim_sync_event("e1", "tab-b").await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_claim_can_be_taken_over() {
        let store = SqliteQueueStore::open_in_memory()
            .unwrap()
            .with_claim_expiration(Duration::ZERO);
        store.write_sync_events(vec![record("e1", "a")]).await.unwrap();
        assert!(store.claim_sync_event("e1", "tab-a").await.unwrap());

        std::thread::sleep(Duration::from_millis(5));
        assert!(store.claim_sync_event("e1", "tab-b").await.unwrap());
        assert_eq!(store.list().unwrap()[0].claimed_by.as_deref(), Some("tab-b"));
    }

    #[tokio::test]
    async fn test_two_connections_share_claims() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue").join("sync_queue.db");

        let tab_a = SqliteQueueStore::open(&path).unwrap();
        let tab_b = SqliteQueueStore::open(&path).unwrap();

        tab_a.write_sync_events(vec![record("evt1", "msg1")]).await.unwrap();
        assert_eq!(tab_b.load_sync_queue().await.unwrap().len(), 1);

        assert!(tab_a.claim_sync_event("evt1", "tab-a").await.unwrap());
        assert!(!tab_b.claim_sync_event("evt1", "tab-b").await.unwrap());

        tab_a.delete_sync_events(vec!["evt1".to_string()]).await.unwrap();
        assert_eq!(tab_b.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_busy_database_does_not_stall_the_runtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync_queue.db");
        let store = SqliteQueueStore::open(&path).unwrap();
        store.write_sync_events(vec![record("e1", "a")]).await.unwrap();

        // Another process holds the write lock
        let other = Connection::open(&path).unwrap();
        other.execute_batch("BEGIN IMMEDIATE").unwrap();

        let claim = tokio::spawn(async move { store.claim_sync_event("e1", "tab-a").await });

        // Timers still run on this single-threaded runtime while the claim waits
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!claim.is_finished());

        other.execute_batch("COMMIT").unwrap();
        assert!(claim.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_load_orders_by_creation() {
        let store = SqliteQueueStore::open_in_memory().unwrap();
        let mut later = record("later", "b");
        let mut earlier = record("earlier", "a");
        earlier.created_at = Utc.timestamp_millis_opt(1_000).unwrap();
        later.created_at = Utc.timestamp_millis_opt(2_000).unwrap();

        store.write_sync_events(vec![later, earlier]).await.unwrap();
        let ids: Vec<String> = store
            .load_sync_queue()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["earlier".to_string(), "later".to_string()]);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = SqliteQueueStore::open_in_memory().unwrap();
        store
            .write_sync_events(vec![record("e1", "a"), record("e2", "b")])
            .await
            .unwrap();
        assert_eq!(store.clear().unwrap(), 2);
        assert_eq!(store.count().unwrap(), 0);
    }
}
