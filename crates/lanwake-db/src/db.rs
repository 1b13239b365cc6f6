//! LanWake SQLite database: connection handling and schema.

use chrono::{DateTime, Utc};
use lanwake_core::error::{LanWakeError, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Persistent store for machines, groups, scheduled tasks and wake history.
pub struct WakeDb {
    conn: Mutex<Connection>,
}

impl WakeDb {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| db_err("DB open", e))?;

        // WAL for concurrent readers while the scheduler writes
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        Self::with_connection(conn)
    }

    /// Private in-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| db_err("DB open", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| db_err("Enable foreign keys", e))?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS machines (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                mac_address TEXT NOT NULL,
                ip_address TEXT NOT NULL DEFAULT '',
                broadcast_address TEXT NOT NULL DEFAULT '255.255.255.255',
                port INTEGER NOT NULL DEFAULT 9,
                group_id INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE SET NULL
            );

            CREATE INDEX IF NOT EXISTS idx_machines_group ON machines(group_id);

            -- Append-only; machine_id survives as NULL when the machine is deleted
            CREATE TABLE IF NOT EXISTS wake_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                machine_id INTEGER,
                machine_name TEXT NOT NULL,
                mac_address TEXT NOT NULL,
                status TEXT NOT NULL,            -- 'success', 'failed'
                message TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                FOREIGN KEY (machine_id) REFERENCES machines(id) ON DELETE SET NULL
            );

            -- Exactly one of cron_expression / scheduled_time is non-empty
            CREATE TABLE IF NOT EXISTS scheduled_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                cron_expression TEXT NOT NULL DEFAULT '',
                scheduled_time TEXT NOT NULL DEFAULT '',
                target_type TEXT NOT NULL,       -- 'machine', 'group'
                target_id INTEGER NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                last_fired TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| db_err("Migration", e))?;

        // Databases created before duplicate-fire guards existed
        let has_last_fired: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('scheduled_tasks') WHERE name='last_fired'",
                [],
                |r| r.get::<_, i64>(0),
            )
            .unwrap_or(0)
            > 0;
        if !has_last_fired {
            conn.execute_batch("ALTER TABLE scheduled_tasks ADD COLUMN last_fired TEXT;")
                .map_err(|e| db_err("Migration", e))?;
        }

        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| LanWakeError::Database(format!("Lock: {e}")))
    }
}

pub(crate) fn db_err(context: &str, e: rusqlite::Error) -> LanWakeError {
    LanWakeError::Database(format!("{context}: {e}"))
}

pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub(crate) fn now_str() -> String {
    Utc::now().to_rfc3339()
}

pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.filter(|s| !s.is_empty())
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}
