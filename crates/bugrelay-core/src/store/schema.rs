//! SQLite schema DDL and migration framework.

use rusqlite::Connection;

use crate::errors::TrackerResult;

/// Current schema version. Migrations run from whatever the DB currently
/// reports up to this value.
pub const SCHEMA_VERSION: i32 = 3;

/// Version-1 DDL: 10 CREATE TABLE + 2 CREATE TRIGGER + 14 CREATE INDEX, plus
/// the version seed. Later columns and indexes are added by the migration
/// steps, so a fresh database and an upgraded one end up identical.
///
/// Executed with `CREATE … IF NOT EXISTS` so they are safe to replay on an
/// already-initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // ── tables (10) ─────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS tracker_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS companies (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        created_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS applications (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        company_id TEXT REFERENCES companies(id),
        created_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS bug_reports (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'open'
            CHECK (status IN ('open', 'reviewing', 'fixed', 'wont_fix')),
        priority TEXT NOT NULL DEFAULT 'medium'
            CHECK (priority IN ('low', 'medium', 'high', 'critical')),
        application_id TEXT NOT NULL REFERENCES applications(id),
        reporter_id TEXT,
        assigned_company_id TEXT REFERENCES companies(id),
        vote_count INTEGER NOT NULL DEFAULT 0 CHECK (vote_count >= 0),
        comment_count INTEGER NOT NULL DEFAULT 0 CHECK (comment_count >= 0),
        resolved_at TEXT,
        deleted_at TEXT,
        deleted_reason TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS bug_tags (
        bug_id TEXT NOT NULL REFERENCES bug_reports(id),
        tag TEXT NOT NULL,
        PRIMARY KEY(bug_id, tag)
    );",
    "CREATE TABLE IF NOT EXISTS bug_votes (
        bug_id TEXT NOT NULL REFERENCES bug_reports(id),
        user_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE(bug_id, user_id)
    );",
    "CREATE TABLE IF NOT EXISTS comments (
        id TEXT PRIMARY KEY,
        bug_id TEXT NOT NULL REFERENCES bug_reports(id),
        user_id TEXT NOT NULL,
        content TEXT NOT NULL,
        is_company_response INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS file_attachments (
        id TEXT PRIMARY KEY,
        bug_id TEXT NOT NULL REFERENCES bug_reports(id),
        filename TEXT NOT NULL,
        file_url TEXT NOT NULL,
        file_size INTEGER,
        mime_type TEXT,
        uploaded_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS audit_logs (
        id TEXT PRIMARY KEY,
        action TEXT NOT NULL,
        resource TEXT NOT NULL,
        resource_id TEXT,
        details TEXT NOT NULL DEFAULT '',
        user_id TEXT NOT NULL,
        ip_address TEXT,
        user_agent TEXT,
        created_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    // ── triggers (2) ────────────────────────────────────────────────────
    "CREATE TRIGGER IF NOT EXISTS audit_logs_immutable_update
     BEFORE UPDATE ON audit_logs
     BEGIN SELECT RAISE(ABORT, 'audit log entries are immutable'); END;",
    "CREATE TRIGGER IF NOT EXISTS audit_logs_immutable_delete
     BEFORE DELETE ON audit_logs
     BEGIN SELECT RAISE(ABORT, 'audit log entries are immutable'); END;",
    // ── indexes (14) ────────────────────────────────────────────────────
    "CREATE INDEX IF NOT EXISTS idx_bug_reports_status ON bug_reports(status);",
    "CREATE INDEX IF NOT EXISTS idx_bug_reports_priority ON bug_reports(priority);",
    "CREATE INDEX IF NOT EXISTS idx_bug_reports_created ON bug_reports(created_at);",
    "CREATE INDEX IF NOT EXISTS idx_bug_reports_popular ON bug_reports(vote_count DESC, created_at DESC);",
    "CREATE INDEX IF NOT EXISTS idx_bug_reports_deleted ON bug_reports(deleted_at);",
    "CREATE INDEX IF NOT EXISTS idx_bug_reports_application ON bug_reports(application_id);",
    "CREATE INDEX IF NOT EXISTS idx_bug_tags_tag ON bug_tags(tag, bug_id);",
    "CREATE INDEX IF NOT EXISTS idx_bug_votes_user ON bug_votes(user_id);",
    "CREATE INDEX IF NOT EXISTS idx_comments_bug_created ON comments(bug_id, created_at);",
    "CREATE INDEX IF NOT EXISTS idx_file_attachments_bug ON file_attachments(bug_id);",
    "CREATE INDEX IF NOT EXISTS idx_applications_name ON applications(name COLLATE NOCASE);",
    "CREATE INDEX IF NOT EXISTS idx_audit_logs_action_created ON audit_logs(action, created_at);",
    "CREATE INDEX IF NOT EXISTS idx_audit_logs_resource ON audit_logs(resource, resource_id);",
    "CREATE INDEX IF NOT EXISTS idx_audit_logs_user_created ON audit_logs(user_id, created_at);",
    // A database that already carries a version keeps it.
    "INSERT OR IGNORE INTO tracker_meta(key, value) VALUES ('schema_version', '1');",
];

/// FTS5 virtual table over the searchable bug text.
///
/// Executed best-effort: SQLite builds without FTS5 fall back to `LIKE`
/// search in `query::listing`.
pub const FTS_STATEMENTS: &[&str] = &[
    "CREATE VIRTUAL TABLE IF NOT EXISTS bug_fts
     USING fts5(bug_id UNINDEXED, title, description, application_name);",
];

/// Whether the FTS table exists in this database.
pub fn fts_available(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'bug_fts';",
        [],
        |_| Ok(()),
    )
    .is_ok()
}

// ─── Migration framework ────────────────────────────────────────────────────

/// Run all pending migrations from the current stored version up to
/// [`SCHEMA_VERSION`].  Each step is wrapped in a SAVEPOINT so a failure
/// rolls back only that single step.
pub fn migrate_schema(conn: &Connection) -> TrackerResult<()> {
    let mut current_version = get_schema_version(conn);

    while current_version < SCHEMA_VERSION {
        let next_version = current_version + 1;
        conn.execute_batch("SAVEPOINT bugrelay_migrate_step;")?;

        let step_result = (|| -> TrackerResult<()> {
            match next_version {
                2 => migrate_to_v2(conn)?,
                3 => migrate_to_v3(conn)?,
                _ => {}
            }
            set_schema_version(conn, next_version)?;
            record_migration_step(conn, current_version, next_version, "success", None)?;
            conn.execute_batch("RELEASE SAVEPOINT bugrelay_migrate_step;")?;
            Ok(())
        })();

        match step_result {
            Ok(()) => {
                current_version = next_version;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT bugrelay_migrate_step;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT bugrelay_migrate_step;");
                let _ = record_migration_step(
                    conn,
                    current_version,
                    next_version,
                    "failed",
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Read the current schema version from `tracker_meta`.
/// Returns 0 when the key is absent or unparseable.
pub fn get_schema_version(conn: &Connection) -> i32 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM tracker_meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i32>().unwrap_or(0),
        Err(_) => 0,
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> TrackerResult<()> {
    conn.execute(
        "INSERT INTO tracker_meta(key, value) \
         VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

fn record_migration_step(
    conn: &Connection,
    from_v: i32,
    to_v: i32,
    status: &str,
    error_msg: Option<&str>,
) -> TrackerResult<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![from_v, to_v, status, error_msg],
    )?;
    Ok(())
}

// ─── Individual migration steps ─────────────────────────────────────────────

/// v1 -> v2: moderation flag on bug reports and system-authored comments.
fn migrate_to_v2(conn: &Connection) -> TrackerResult<()> {
    conn.execute_batch(
        "ALTER TABLE bug_reports ADD COLUMN flagged_at TEXT;
         ALTER TABLE bug_reports ADD COLUMN flag_reason TEXT;
         ALTER TABLE comments ADD COLUMN is_system INTEGER NOT NULL DEFAULT 0;",
    )?;
    Ok(())
}

/// v2 -> v3: index backing the moderation review predicate, and a backfill
/// of `bug_fts` for reports written before the FTS table existed.
fn migrate_to_v3(conn: &Connection) -> TrackerResult<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_bug_reports_review \
         ON bug_reports(flagged_at, vote_count, comment_count);",
    )?;
    if fts_available(conn) {
        conn.execute_batch(
            "INSERT INTO bug_fts(bug_id, title, description, application_name) \
             SELECT b.id, b.title, b.description, COALESCE(a.name, '') \
             FROM bug_reports b LEFT JOIN applications a ON a.id = b.application_id \
             WHERE b.id NOT IN (SELECT bug_id FROM bug_fts);",
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        for stmt in SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).unwrap();
        }
        for stmt in FTS_STATEMENTS {
            let _ = conn.execute_batch(stmt);
        }
        conn
    }

    #[test]
    fn schema_statement_counts() {
        // 10 tables + 2 triggers + 14 indexes + version seed
        assert_eq!(SCHEMA_STATEMENTS.len(), 27);
        assert_eq!(FTS_STATEMENTS.len(), 1);
    }

    #[test]
    fn migrate_fresh_database() {
        let conn = fresh();
        migrate_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);

        let steps: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM migration_history WHERE status = 'success';",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(steps, (SCHEMA_VERSION - 1) as i64);
    }

    #[test]
    fn upgrades_a_version_one_database() {
        let conn = fresh();
        conn.execute_batch(
            "INSERT INTO applications(id, name, created_at) VALUES ('app', 'Mail', 't');
             INSERT INTO bug_reports(id, title, description, application_id, created_at, updated_at)
                 VALUES ('b1', 'Inbox freezes', 'Inbox freezes on open', 'app', 't', 't');
             INSERT INTO comments(id, bug_id, user_id, content, created_at)
                 VALUES ('c1', 'b1', 'u1', 'same here', 't');",
        )
        .unwrap();
        assert_eq!(get_schema_version(&conn), 1);

        migrate_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);

        let (flagged, is_system): (Option<String>, bool) = conn
            .query_row(
                "SELECT b.flagged_at, c.is_system FROM bug_reports b \
                 JOIN comments c ON c.bug_id = b.id WHERE b.id = 'b1';",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(flagged, None);
        assert!(!is_system);

        if fts_available(&conn) {
            let indexed: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM bug_fts WHERE bug_fts MATCH 'freezes';",
                    [],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(indexed, 1);
        }
    }

    #[test]
    fn migrate_idempotent() {
        let conn = fresh();
        migrate_schema(&conn).unwrap();
        migrate_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn audit_rows_cannot_be_changed() {
        let conn = fresh();
        conn.execute(
            "INSERT INTO audit_logs(id, action, resource, user_id, created_at) \
             VALUES ('a1', 'bug_flag', 'bug_report', 'u1', '2026-01-01T00:00:00.000000Z');",
            [],
        )
        .unwrap();
        assert!(conn
            .execute("UPDATE audit_logs SET details = 'x' WHERE id = 'a1';", [])
            .is_err());
        assert!(conn
            .execute("DELETE FROM audit_logs WHERE id = 'a1';", [])
            .is_err());
    }

    #[test]
    fn one_vote_per_user_per_bug() {
        let conn = fresh();
        conn.execute_batch(
            "INSERT INTO applications(id, name, created_at) VALUES ('app', 'App', 't');
             INSERT INTO bug_reports(id, title, description, application_id, created_at, updated_at)
                 VALUES ('b1', 'title', 'description', 'app', 't', 't');
             INSERT INTO bug_votes(bug_id, user_id, created_at) VALUES ('b1', 'u1', 't');",
        )
        .unwrap();
        assert!(conn
            .execute(
                "INSERT INTO bug_votes(bug_id, user_id, created_at) VALUES ('b1', 'u1', 't');",
                [],
            )
            .is_err());
    }
}
