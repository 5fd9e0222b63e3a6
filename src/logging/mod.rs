//! SQLite-backed request logging.
//!
//! Every request that reaches the scanner produces exactly one [`LogEntry`]
//! row in the `logs` table: its endpoint, the PII types found, whether the
//! body was redacted, the action taken and the upstream outcome. The raw
//! matched values are never stored.
//!
//! The database is accessed through an [`r2d2`] connection pool ([`DbPool`])
//! so the [`EventSink`](crate::sink::EventSink) writer can persist rows from
//! the blocking thread pool.

use rusqlite::Connection;

use crate::error::{Result, WiretapsError};
use crate::policy::evaluator::Action;

/// SQLite connection pool type alias (r2d2 + r2d2-sqlite).
pub type DbPool = r2d2::Pool<r2d2_sqlite::SqliteConnectionManager>;

/// Open a connection pool for the given database file path.
///
/// Creates the parent directory, the database and the `logs` table if they
/// don't exist. The pool is configured with a maximum of 4 connections.
pub fn open_pool(path: &std::path::Path) -> Result<DbPool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let manager = r2d2_sqlite::SqliteConnectionManager::file(path);
    let pool = r2d2::Pool::builder().max_size(4).build(manager)?;
    let conn = pool.get()?;
    init_db(&conn)?;
    Ok(pool)
}

/// In-memory pool shared by the unit tests of the writer and relay.
#[cfg(test)]
pub(crate) fn open_memory_pool() -> Result<DbPool> {
    let manager = r2d2_sqlite::SqliteConnectionManager::memory();
    let pool = r2d2::Pool::builder().max_size(1).build(manager)?;
    let conn = pool.get()?;
    init_db(&conn)?;
    Ok(pool)
}

/// One proxied request's PII outcome, as stored in the `logs` table.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Auto-incremented row ID (`None` before insert).
    pub id: Option<i64>,
    /// RFC 3339 timestamp of when the request was received.
    pub timestamp: String,
    /// HTTP method (e.g., `"POST"`).
    pub method: String,
    /// Request path (e.g., `"/v1/chat/completions"`).
    pub endpoint: String,
    /// Status returned to the caller, if a response was produced.
    pub status: Option<u16>,
    /// Tokens reported by the upstream's `usage` block, 0 if unknown.
    pub tokens: i64,
    /// Distinct PII pattern names, in order of first occurrence.
    pub pii_types: Vec<String>,
    /// Whether the forwarded body was rewritten.
    pub redacted: bool,
    pub action: Action,
    /// Upstream, inspection or disconnect marker.
    pub error: Option<String>,
    pub duration_ms: i64,
}

impl LogEntry {
    /// A clean pass-through entry stamped with the current time.
    pub fn new(method: &str, endpoint: &str) -> Self {
        Self {
            id: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            status: None,
            tokens: 0,
            pii_types: Vec::new(),
            redacted: false,
            action: Action::Pass,
            error: None,
            duration_ms: 0,
        }
    }

    pub fn has_pii(&self) -> bool {
        !self.pii_types.is_empty()
    }
}

/// Initialize the SQLite database and create the logs table if it doesn't exist.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS logs (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp   TEXT NOT NULL,
            method      TEXT NOT NULL,
            endpoint    TEXT NOT NULL,
            status      INTEGER,
            tokens      INTEGER NOT NULL DEFAULT 0,
            pii_types   TEXT NOT NULL DEFAULT '[]',
            redacted    INTEGER NOT NULL DEFAULT 0,
            action      TEXT NOT NULL,
            error       TEXT,
            duration_ms INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);",
    )?;
    Ok(())
}

/// Insert an entry and return its row ID.
pub fn insert_entry(conn: &Connection, entry: &LogEntry) -> Result<i64> {
    let pii_types = serde_json::to_string(&entry.pii_types)?;
    conn.execute(
        "INSERT INTO logs (timestamp, method, endpoint, status, tokens, pii_types,
                           redacted, action, error, duration_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            entry.timestamp,
            entry.method,
            entry.endpoint,
            entry.status,
            entry.tokens,
            pii_types,
            entry.redacted,
            entry.action.as_str(),
            entry.error,
            entry.duration_ms,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Query the most recent N entries, newest first.
///
/// With `pii_only`, entries without findings are skipped.
pub fn query_recent(conn: &Connection, limit: usize, pii_only: bool) -> Result<Vec<LogEntry>> {
    let sql = if pii_only {
        "SELECT id, timestamp, method, endpoint, status, tokens, pii_types,
                redacted, action, error, duration_ms
         FROM logs WHERE pii_types != '[]' ORDER BY id DESC LIMIT ?1"
    } else {
        "SELECT id, timestamp, method, endpoint, status, tokens, pii_types,
                redacted, action, error, duration_ms
         FROM logs ORDER BY id DESC LIMIT ?1"
    };
    let mut stmt = conn.prepare(sql)?;

    let rows = stmt.query_map(rusqlite::params![limit as i64], |row| {
        Ok((
            LogEntry {
                id: Some(row.get(0)?),
                timestamp: row.get(1)?,
                method: row.get(2)?,
                endpoint: row.get(3)?,
                status: row.get(4)?,
                tokens: row.get(5)?,
                pii_types: Vec::new(),
                redacted: row.get(7)?,
                action: Action::Pass,
                error: row.get(9)?,
                duration_ms: row.get(10)?,
            },
            row.get::<_, String>(6)?,
            row.get::<_, String>(8)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (mut entry, pii_types, action) = row?;
        entry.pii_types = serde_json::from_str(&pii_types)?;
        entry.action = Action::parse(&action).ok_or_else(|| {
            WiretapsError::Config(format!("unknown action '{}' in log row", action))
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Aggregated counts over the `logs` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogStats {
    pub total: usize,
    /// Entries with at least one finding.
    pub with_pii: usize,
    pub redacted: usize,
    pub blocked: usize,
    /// Entries carrying an error marker.
    pub errors: usize,
}

/// Query aggregated counts in a single pass.
pub fn query_stats(conn: &Connection) -> Result<LogStats> {
    let stats = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(pii_types != '[]'), 0),
                COALESCE(SUM(redacted), 0),
                COALESCE(SUM(action = 'block'), 0),
                COALESCE(SUM(error IS NOT NULL), 0)
         FROM logs",
        [],
        |row| {
            Ok(LogStats {
                total: row.get::<_, i64>(0)? as usize,
                with_pii: row.get::<_, i64>(1)? as usize,
                redacted: row.get::<_, i64>(2)? as usize,
                blocked: row.get::<_, i64>(3)? as usize,
                errors: row.get::<_, i64>(4)? as usize,
            })
        },
    )?;
    Ok(stats)
}

/// Open or create a SQLite database at the given path.
pub fn open_db(path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    init_db(&conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_memory_db() -> Result<Connection> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(conn)
    }

    fn sample_entry(endpoint: &str, pii_types: &[&str], action: Action) -> LogEntry {
        LogEntry {
            id: None,
            timestamp: "2026-02-12T10:00:00+00:00".to_string(),
            method: "POST".to_string(),
            endpoint: endpoint.to_string(),
            status: Some(200),
            tokens: 42,
            pii_types: pii_types.iter().map(|s| s.to_string()).collect(),
            redacted: action == Action::Redact,
            action,
            error: None,
            duration_ms: 12,
        }
    }

    #[test]
    fn init_and_insert() {
        let conn = open_memory_db().unwrap();
        let id = insert_entry(&conn, &sample_entry("/v1/chat", &[], Action::Pass)).unwrap();
        assert_eq!(id, 1);
    }

    #[test]
    fn entry_round_trips_through_table() {
        let conn = open_memory_db().unwrap();
        let mut entry = sample_entry("/v1/messages", &["email", "phone"], Action::Redact);
        entry.error = Some("upstream timeout".to_string());
        entry.status = None;
        insert_entry(&conn, &entry).unwrap();

        let logs = query_recent(&conn, 10, false).unwrap();
        assert_eq!(logs.len(), 1);
        let stored = &logs[0];
        assert_eq!(stored.id, Some(1));
        assert_eq!(stored.pii_types, vec!["email", "phone"]);
        assert!(stored.redacted);
        assert_eq!(stored.action, Action::Redact);
        assert_eq!(stored.status, None);
        assert_eq!(stored.error.as_deref(), Some("upstream timeout"));
        assert_eq!(stored.tokens, 42);
    }

    #[test]
    fn query_recent_returns_in_desc_order() {
        let conn = open_memory_db().unwrap();
        insert_entry(&conn, &sample_entry("/first", &[], Action::Pass)).unwrap();
        insert_entry(&conn, &sample_entry("/second", &["ssn"], Action::Block)).unwrap();
        insert_entry(&conn, &sample_entry("/third", &[], Action::Pass)).unwrap();

        let logs = query_recent(&conn, 2, false).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].endpoint, "/third");
        assert_eq!(logs[1].endpoint, "/second");
    }

    #[test]
    fn query_recent_pii_only() {
        let conn = open_memory_db().unwrap();
        insert_entry(&conn, &sample_entry("/clean", &[], Action::Pass)).unwrap();
        insert_entry(&conn, &sample_entry("/dirty", &["email"], Action::Pass)).unwrap();

        let logs = query_recent(&conn, 10, true).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].endpoint, "/dirty");
    }

    #[test]
    fn open_pool_creates_table_and_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("logs.db");
        let pool = open_pool(&db_path).unwrap();
        let conn = pool.get().unwrap();
        let id = insert_entry(&conn, &sample_entry("/pool", &[], Action::Pass)).unwrap();
        assert_eq!(id, 1);
        assert!(db_path.exists());
    }

    #[test]
    fn pool_sequential_writes() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir.path().join("many.db")).unwrap();

        for i in 0..10 {
            let conn = pool.get().unwrap();
            insert_entry(&conn, &sample_entry(&format!("/r{}", i), &[], Action::Pass)).unwrap();
        }

        let conn = pool.get().unwrap();
        assert_eq!(query_recent(&conn, 100, false).unwrap().len(), 10);
    }

    #[test]
    fn query_stats_mixed_entries() {
        let conn = open_memory_db().unwrap();
        insert_entry(&conn, &sample_entry("/a", &[], Action::Pass)).unwrap();
        insert_entry(&conn, &sample_entry("/b", &["email"], Action::Pass)).unwrap();
        insert_entry(&conn, &sample_entry("/c", &["email"], Action::Redact)).unwrap();
        insert_entry(&conn, &sample_entry("/d", &["ssn"], Action::Block)).unwrap();
        let mut failed = sample_entry("/e", &[], Action::Pass);
        failed.error = Some("upstream error".to_string());
        insert_entry(&conn, &failed).unwrap();

        let stats = query_stats(&conn).unwrap();
        assert_eq!(
            stats,
            LogStats {
                total: 5,
                with_pii: 3,
                redacted: 1,
                blocked: 1,
                errors: 1,
            }
        );
    }

    #[test]
    fn query_stats_empty_db() {
        let conn = open_memory_db().unwrap();
        assert_eq!(query_stats(&conn).unwrap(), LogStats::default());
    }

    #[test]
    fn open_db_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let conn = open_db(&db_path).unwrap();
        insert_entry(&conn, &sample_entry("/persisted", &[], Action::Pass)).unwrap();

        let conn2 = open_db(&db_path).unwrap();
        let logs = query_recent(&conn2, 10, false).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].endpoint, "/persisted");
    }

    #[test]
    fn new_entry_defaults() {
        let entry = LogEntry::new("GET", "/v1/models");
        assert_eq!(entry.action, Action::Pass);
        assert!(!entry.has_pii());
        assert!(chrono::DateTime::parse_from_rfc3339(&entry.timestamp).is_ok());
    }
}
