pub mod messages;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod rooms;

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use tracing::info;

use huddle_types::error::ChatError;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database lock poisoned")]
    Poisoned,

    #[error("write abandoned by caller")]
    Abandoned,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl From<DbError> for ChatError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => ChatError::NotFound(what),
            DbError::InvalidArgument(msg) => ChatError::InvalidArgument(msg),
            other => ChatError::Storage(other.to_string()),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// SQLite-backed storage for users, rooms, memberships and messages.
/// All statements go through a single connection, which also serializes
/// writers (direct-room creation and message appends rely on this).
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let db = Self::init(conn)?;

        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> DbResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&Connection) -> DbResult<T>,
    {
        let conn = self.conn.lock().map_err(|_| DbError::Poisoned)?;
        f(&conn)
    }

    /// Like [`Database::with_conn`] but hands out `&mut` so callers can open a transaction.
    pub fn with_conn_mut<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&mut Connection) -> DbResult<T>,
    {
        let mut conn = self.conn.lock().map_err(|_| DbError::Poisoned)?;
        f(&mut conn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Open,
    Committed,
    Closed,
}

/// Shared between a writer and the caller waiting on it. The writer commits
/// only while the gate is open; a caller that stops waiting closes it, after
/// which the write rolls back instead of landing late.
#[derive(Debug, Clone)]
pub struct CommitGate {
    state: Arc<Mutex<GateState>>,
}

impl Default for CommitGate {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState::Open)),
        }
    }
}

impl CommitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `commit` with the gate held. Fails with `Abandoned` if the gate
    /// was already closed, in which case `commit` is never called.
    pub fn commit_with<F>(&self, commit: F) -> DbResult<()>
    where
        F: FnOnce() -> DbResult<()>,
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == GateState::Closed {
            return Err(DbError::Abandoned);
        }
        commit()?;
        *state = GateState::Committed;
        Ok(())
    }

    /// Closes the gate. Returns false when the write has already committed.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == GateState::Committed {
            return false;
        }
        *state = GateState::Closed;
        true
    }
}

/// Timestamps are stored as fixed-width RFC 3339 so they sort as text.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> DbResult<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone; treat it as UTC.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .map_err(|e| DbError::Corrupt(format!("timestamp '{}': {}", raw, e)))
}

pub(crate) fn parse_uuid(raw: &str) -> DbResult<uuid::Uuid> {
    raw.parse()
        .map_err(|e| DbError::Corrupt(format!("uuid '{}': {}", raw, e)))
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> DbResult<Option<T>>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> DbResult<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_gate_skips_the_commit() {
        let gate = CommitGate::new();
        assert!(gate.close());

        let mut ran = false;
        let result = gate.commit_with(|| {
            ran = true;
            Ok(())
        });
        assert!(matches!(result, Err(DbError::Abandoned)));
        assert!(!ran);
    }

    #[test]
    fn committed_gate_cannot_be_closed() {
        let gate = CommitGate::new();
        gate.commit_with(|| Ok(())).unwrap();
        assert!(!gate.close());
    }
}
