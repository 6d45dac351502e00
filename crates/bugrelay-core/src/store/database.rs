//! SQLite storage layer.
//!
//! Every operation opens its own connection, so a `Database` can be shared
//! freely between worker threads. Writes go through [`Database::write`],
//! which runs the closure inside a `BEGIN IMMEDIATE` transaction: SQLite
//! grants the write lock before the first read, so two writers touching the
//! same bug are serialized by the store itself, across connections and
//! processes alike.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, warn};

use crate::config::expand_tilde;
use crate::errors::{TrackerError, TrackerResult};
use crate::store::schema;

pub struct Database {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl Database {
    /// Create a new `Database`.  The path is expanded and parent directories
    /// are created if they do not already exist.
    pub fn open(db_path: &Path, busy_timeout: Duration) -> TrackerResult<Self> {
        let expanded = expand_tilde(&db_path.to_string_lossy());
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(&expanded)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            db_path: resolved,
            busy_timeout,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Open a new connection with foreign keys enforced and the configured
    /// busy timeout.
    pub fn connect(&self) -> TrackerResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Initialise the database schema: set WAL mode, create all tables,
    /// triggers and indexes, attempt FTS5 creation, then run pending
    /// migrations.
    pub fn init_schema(&self) -> TrackerResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;

        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        for stmt in schema::FTS_STATEMENTS {
            if let Err(e) = conn.execute_batch(stmt) {
                warn!("FTS5 unavailable, search falls back to LIKE: {e}");
            }
        }
        schema::migrate_schema(&conn)?;
        Ok(())
    }

    /// Run a read-only closure on a fresh connection. All statements inside
    /// `f` share one deferred transaction, so they see a single snapshot.
    pub fn read<T, F>(&self, f: F) -> TrackerResult<T>
    where
        F: FnOnce(&Connection) -> TrackerResult<T>,
    {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let value = f(&*tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run `f` inside one `BEGIN IMMEDIATE` transaction. The transaction
    /// commits only if `f` returns `Ok`; any error, including a failed
    /// commit, leaves the database exactly as it was.
    pub fn write<T, F>(&self, op: &str, f: F) -> TrackerResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> TrackerResult<T>,
    {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| match TrackerError::from(e) {
                TrackerError::Conflict(msg) => {
                    TrackerError::Conflict(format!("{op}: write lock unavailable: {msg}"))
                }
                other => other,
            })?;

        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                debug!("{op} rolled back: {e}");
                let _ = tx.rollback();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("nested/bugs.db"), Duration::from_secs(1)).unwrap();
        db.init_schema().unwrap();
        (dir, db)
    }

    fn meta_value(db: &Database, key: &str) -> Option<String> {
        db.read(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM tracker_meta WHERE key = ?1;",
                    [key],
                    |row| row.get(0),
                )
                .ok())
        })
        .unwrap()
    }

    #[test]
    fn open_creates_parent_directories() {
        let (dir, db) = open_temp();
        assert!(dir.path().join("nested").is_dir());
        assert!(db.db_path().ends_with("nested/bugs.db"));
    }

    #[test]
    fn init_schema_is_repeatable() {
        let (_dir, db) = open_temp();
        db.init_schema().unwrap();
        assert_eq!(
            meta_value(&db, "schema_version"),
            Some(schema::SCHEMA_VERSION.to_string())
        );
    }

    #[test]
    fn write_commits_on_success() {
        let (_dir, db) = open_temp();
        db.write("set_meta", |tx| {
            tx.execute(
                "INSERT INTO tracker_meta(key, value) VALUES ('k', 'v');",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        assert_eq!(meta_value(&db, "k"), Some("v".to_string()));
    }

    #[test]
    fn write_rolls_back_on_error() {
        let (_dir, db) = open_temp();
        let result: TrackerResult<()> = db.write("set_meta", |tx| {
            tx.execute(
                "INSERT INTO tracker_meta(key, value) VALUES ('k', 'v');",
                [],
            )?;
            Err(TrackerError::Validation("forced".into()))
        });
        assert!(result.is_err());
        assert_eq!(meta_value(&db, "k"), None);
    }

    #[test]
    fn read_sees_one_snapshot() {
        let (_dir, db) = open_temp();
        let count = |conn: &Connection| -> TrackerResult<i64> {
            Ok(conn.query_row("SELECT COUNT(*) FROM tracker_meta;", [], |row| row.get(0))?)
        };
        let (before, after) = db
            .read(|conn| {
                let before = count(conn)?;
                db.write("concurrent_insert", |tx| {
                    tx.execute(
                        "INSERT INTO tracker_meta(key, value) VALUES ('k', 'v');",
                        [],
                    )?;
                    Ok(())
                })?;
                Ok((before, count(conn)?))
            })
            .unwrap();
        assert_eq!(before, after);
        assert_eq!(meta_value(&db, "k"), Some("v".to_string()));
    }

    #[test]
    fn held_write_lock_surfaces_as_conflict() {
        let (_dir, db) = open_temp();
        let quick = Database::open(db.db_path(), Duration::from_millis(10)).unwrap();

        let mut holder = db.connect().unwrap();
        let _lock = holder
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .unwrap();

        let err = quick.write("blocked", |_tx| Ok(())).unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err}");
    }
}
