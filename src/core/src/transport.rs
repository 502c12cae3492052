//! Durable stream transport: an append-only per-session event log with
//! replay-from-offset and a flush/detach producer lifecycle.
//!
//! The runtime only depends on the two traits; `SqliteStreamStore` is
//! the bundled implementation.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::Value;

/// Identity under which a session's stream is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamScope {
    pub session_id: String,
    pub organization_id: String,
    pub workspace_id: Option<String>,
}

pub trait DurableStream: Send + Sync {
    /// Register the session's stream. Idempotent.
    fn ensure_session_stream(&self, scope: &StreamScope) -> Result<(), String>;

    fn create_producer(&self, session_id: &str) -> Result<Box<dyn StreamProducer>, String>;
}

/// Append handle for one session's event log.
pub trait StreamProducer: Send + Sync {
    fn append(&self, payload: &Value) -> Result<(), String>;
    fn flush(&self) -> Result<(), String>;
    /// After detach, further appends fail.
    fn detach(&self) -> Result<(), String>;
}

/// SQLite-backed durable stream.
///
/// Uses a `Mutex<Connection>` for thread-safe interior mutability.
/// The database is created/migrated on `open()`.
#[derive(Clone)]
pub struct SqliteStreamStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    conn: Mutex<Connection>,
}

impl SqliteStreamStore {
    /// Open (or create) a sqlite database at the given path.
    pub fn open(path: &Path) -> Result<Self, String> {
        let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory().map_err(|e| format!("sqlite open: {e}"))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, String> {
        let store = Self {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(conn),
            }),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), String> {
        let conn = self.inner.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS session_streams (
                session_id      TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                workspace_id    TEXT,
                created_at      TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS session_events (
                session_id    TEXT NOT NULL,
                stream_offset INTEGER NOT NULL,
                payload       TEXT NOT NULL,
                appended_at   TEXT NOT NULL,
                PRIMARY KEY (session_id, stream_offset)
            );
            ",
        )
        .map_err(|e| format!("sqlite migrate: {e}"))
    }

    /// Replay a session's log from the given offset, in append order.
    pub fn replay_from(&self, session_id: &str, offset: u64) -> Result<Vec<Value>, String> {
        let conn = self.inner.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let mut stmt = conn
            .prepare(
                "SELECT payload FROM session_events
                 WHERE session_id = ?1 AND stream_offset >= ?2
                 ORDER BY stream_offset ASC",
            )
            .map_err(|e| format!("sqlite prepare: {e}"))?;
        let rows = stmt
            .query_map(params![session_id, offset as i64], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| format!("sqlite query: {e}"))?;
        let mut events = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| format!("sqlite row: {e}"))?;
            let value =
                serde_json::from_str(&raw).map_err(|e| format!("decode stored event: {e}"))?;
            events.push(value);
        }
        Ok(events)
    }

    /// Session ids with a registered stream.
    pub fn sessions(&self) -> Result<Vec<String>, String> {
        let conn = self.inner.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let mut stmt = conn
            .prepare("SELECT session_id FROM session_streams ORDER BY session_id")
            .map_err(|e| format!("sqlite prepare: {e}"))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| format!("sqlite query: {e}"))?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row.map_err(|e| format!("sqlite row: {e}"))?);
        }
        Ok(sessions)
    }
}

impl DurableStream for SqliteStreamStore {
    fn ensure_session_stream(&self, scope: &StreamScope) -> Result<(), String> {
        let conn = self.inner.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.execute(
            "INSERT OR IGNORE INTO session_streams
             (session_id, organization_id, workspace_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                scope.session_id,
                scope.organization_id,
                scope.workspace_id,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| format!("sqlite insert stream: {e}"))?;
        Ok(())
    }

    fn create_producer(&self, session_id: &str) -> Result<Box<dyn StreamProducer>, String> {
        Ok(Box::new(SqliteStreamProducer {
            inner: self.inner.clone(),
            session_id: session_id.to_string(),
            detached: AtomicBool::new(false),
        }))
    }
}

struct SqliteStreamProducer {
    inner: Arc<StoreInner>,
    session_id: String,
    detached: AtomicBool,
}

impl StreamProducer for SqliteStreamProducer {
    fn append(&self, payload: &Value) -> Result<(), String> {
        if self.detached.load(Ordering::SeqCst) {
            return Err("producer detached".to_string());
        }
        let raw = serde_json::to_string(payload).map_err(|e| format!("encode event: {e}"))?;
        let conn = self.inner.conn.lock().map_err(|e| format!("lock: {e}"))?;
        // MAX+1 and the insert share the connection lock, so offsets are
        // contiguous even with many producers for one session.
        conn.execute(
            "INSERT INTO session_events (session_id, stream_offset, payload, appended_at)
             VALUES (
                ?1,
                COALESCE((SELECT MAX(stream_offset) + 1 FROM session_events WHERE session_id = ?1), 0),
                ?2,
                ?3
             )",
            params![self.session_id, raw, Utc::now().to_rfc3339()],
        )
        .map_err(|e| format!("sqlite append: {e}"))?;
        Ok(())
    }

    fn flush(&self) -> Result<(), String> {
        // Each append commits its own transaction.
        Ok(())
    }

    fn detach(&self) -> Result<(), String> {
        self.detached.store(true, Ordering::SeqCst);
        Ok(())
    }
}
