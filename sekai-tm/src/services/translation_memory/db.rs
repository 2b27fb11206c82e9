use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::{StorageContext, TmError, TmResult};

pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tm_entries (
        id                  TEXT PRIMARY KEY,
        source_text         TEXT NOT NULL,
        source_hash         TEXT NOT NULL,
        target_language_id  TEXT NOT NULL,
        translated_text     TEXT NOT NULL,
        quality_score       REAL,
        usage_count         INTEGER NOT NULL DEFAULT 0,
        created_at          INTEGER NOT NULL,
        updated_at          INTEGER NOT NULL,
        last_used_at        INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_tm_entries_key
        ON tm_entries(source_hash, target_language_id);
    CREATE INDEX IF NOT EXISTS idx_tm_entries_language
        ON tm_entries(target_language_id);
    CREATE INDEX IF NOT EXISTS idx_tm_entries_last_used
        ON tm_entries(last_used_at);

    -- rowid mirrors tm_entries.rowid; kept in sync by RelevanceIndex
    CREATE VIRTUAL TABLE IF NOT EXISTS tm_fts USING fts5(
        source_text, tokenize = 'unicode61'
    );
";

/// Single SQLite connection shared by the store, index, retention and merge paths.
///
/// Writes run in one `IMMEDIATE` transaction per logical operation, so a
/// read-then-write merge holds the write lock from its first read.
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Database {
    pub fn open(path: &Path, busy_timeout_ms: u64) -> TmResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| TmError::io(parent, e))?;
        }

        let key = path.display().to_string();
        let conn = Connection::open(path).storage("open", &key)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )
        .storage("open", &key)?;

        Self::init(conn, Some(path.to_path_buf()), busy_timeout_ms)
    }

    pub fn open_in_memory() -> TmResult<Self> {
        let conn = Connection::open_in_memory().storage("open", ":memory:")?;
        Self::init(conn, None, 0)
    }

    fn init(conn: Connection, path: Option<PathBuf>, busy_timeout_ms: u64) -> TmResult<Self> {
        if busy_timeout_ms > 0 {
            conn.busy_timeout(Duration::from_millis(busy_timeout_ms))
                .storage("open", "busy_timeout")?;
        }

        conn.execute_batch(SCHEMA).storage("open", "schema")?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .storage("open", "user_version")?;

        tracing::debug!(path = ?path, "translation memory database ready");

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> TmResult<i32> {
        self.read(|conn| {
            conn.query_row("PRAGMA user_version", [], |row| row.get(0))
                .storage("schema_version", "user_version")
        })
    }

    fn lock(&self) -> TmResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| TmError::Lock(e.to_string()))
    }

    /// Runs `f` against the connection without opening a transaction.
    pub(crate) fn read<T, F>(&self, f: F) -> TmResult<T>
    where
        F: FnOnce(&Connection) -> TmResult<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Runs `f` inside one transaction. An `Err` from `f` drops the
    /// transaction, which rolls every write back.
    pub(crate) fn write<T, F>(&self, op: &'static str, f: F) -> TmResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> TmResult<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .storage(op, "begin")?;

        let out = f(&tx)?;

        tx.commit().storage(op, "commit")?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_versioned() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn failed_write_rolls_back() {
        let db = Database::open_in_memory().unwrap();

        let res: TmResult<()> = db.write("test", |tx| {
            tx.execute(
                "INSERT INTO tm_entries (id, source_text, source_hash, target_language_id, \
                 translated_text, usage_count, created_at, updated_at, last_used_at) \
                 VALUES ('a', 's', 'h', 'fr', 't', 0, 0, 0, 0)",
                [],
            )
            .storage("test", "a")?;
            Err(TmError::InvalidInput("abort".into()))
        });
        assert!(res.is_err());

        let count: i64 = db
            .read(|c| {
                c.query_row("SELECT COUNT(*) FROM tm_entries", [], |r| r.get(0))
                    .storage("test", "count")
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
