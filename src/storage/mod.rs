//! Trace storage: the persistence collaborator behind the Trace Writer.
//! Appends are best-effort from the engine's perspective — a storage
//! failure degrades to a dropped step, never a failed query.

use async_trait::async_trait;
use rusqlite::Connection;
use tracing::warn;

use crate::core::trace::{QueryId, Step, TraceHandle};

/// Errors from the storage backend. Never surfaced to a query caller;
/// the Trace Writer logs and moves on.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The underlying database operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A step or trace could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// The blocking database task panicked.
    #[error("storage task panicked: {0}")]
    Task(String),
}

/// Persists and retrieves query traces. Implemented here with
/// `rusqlite`; the full project/document persistence layer this would
/// sit alongside in a complete deployment is out of scope.
#[async_trait]
pub trait TraceStorage: Send + Sync {
    /// Opens (creating if necessary) a trace for `query_id`, pruning
    /// older traces beyond the retention limit as a side effect.
    async fn open_trace(&self, query_id: &QueryId) -> Result<TraceHandle, StorageError>;

    /// Appends one step to an already-open trace. Best-effort: callers
    /// must not propagate failures from this as query failures.
    async fn append_step(&self, handle: &TraceHandle, step: Step) -> Result<(), StorageError>;

    /// Reads every step recorded for `query_id`, in append order.
    async fn read_trace(&self, query_id: &QueryId) -> Result<Vec<Step>, StorageError>;
}

/// Default number of most-recent traces retained before older ones are
/// pruned lazily on the next `open_trace`.
pub const DEFAULT_RETENTION: usize = 200;

/// `rusqlite`-backed [`TraceStorage`]. Blocking database calls are
/// dispatched through `spawn_blocking` so the async engine loop never
/// stalls on disk I/O.
pub struct SqliteTraceStorage {
    path: std::path::PathBuf,
    retention: usize,
}

impl SqliteTraceStorage {
    /// Opens (creating if necessary) a trace database at `path`.
    pub fn open(path: impl Into<std::path::PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS trace_steps (
                query_id TEXT NOT NULL,
                step_index INTEGER NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (query_id, step_index)
            );
            CREATE TABLE IF NOT EXISTS traces (
                query_id TEXT PRIMARY KEY,
                opened_at_ms INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            path,
            retention: DEFAULT_RETENTION,
        })
    }

    /// Overrides the default retention count.
    #[must_use]
    pub const fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    fn connect(&self) -> Result<Connection, StorageError> {
        Ok(Connection::open(&self.path)?)
    }
}

#[async_trait]
impl TraceStorage for SqliteTraceStorage {
    async fn open_trace(&self, query_id: &QueryId) -> Result<TraceHandle, StorageError> {
        let query_id = query_id.clone();
        let path = self.path.clone();
        let retention = self.retention;
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let conn = Connection::open(&path)?;
            conn.execute(
                "INSERT OR IGNORE INTO traces (query_id, opened_at_ms) VALUES (?1, 0)",
                [&query_id],
            )?;
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM traces", [], |row| row.get(0))?;
            if total as usize > retention {
                let excess = total as usize - retention;
                conn.execute(
                    "DELETE FROM traces WHERE query_id IN (
                        SELECT query_id FROM traces ORDER BY opened_at_ms ASC LIMIT ?1
                    )",
                    [excess as i64],
                )?;
                conn.execute(
                    "DELETE FROM trace_steps WHERE query_id NOT IN (SELECT query_id FROM traces)",
                    [],
                )?;
            }
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))??;

        Ok(TraceHandle { query_id })
    }

    async fn append_step(&self, handle: &TraceHandle, step: Step) -> Result<(), StorageError> {
        let query_id = handle.query_id.clone();
        let path = self.path.clone();
        let payload = serde_json::to_string(&step)?;
        let index = i64::try_from(step.index()).unwrap_or(i64::MAX);
        let result = tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let conn = Connection::open(&path)?;
            conn.execute(
                "INSERT OR REPLACE INTO trace_steps (query_id, step_index, payload) VALUES (?1, ?2, ?3)",
                rusqlite::params![query_id, index, payload],
            )?;
            Ok(())
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(join_err) => {
                warn!(error = %join_err, "trace append task panicked");
                Ok(())
            }
        }
    }

    async fn read_trace(&self, query_id: &QueryId) -> Result<Vec<Step>, StorageError> {
        let query_id = query_id.clone();
        let conn = self.connect()?;
        tokio::task::spawn_blocking(move || -> Result<Vec<Step>, StorageError> {
            let mut stmt = conn.prepare(
                "SELECT payload FROM trace_steps WHERE query_id = ?1 ORDER BY step_index ASC",
            )?;
            let rows = stmt.query_map([&query_id], |row| row.get::<_, String>(0))?;
            let mut steps = Vec::new();
            for row in rows {
                let payload: String = row?;
                steps.push(serde_json::from_str(&payload)?);
            }
            Ok(steps)
        })
        .await
        .unwrap_or(Ok(Vec::new()))
    }
}
