//! Loading `BugReport` rows.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::errors::{TrackerError, TrackerResult};
use crate::models::BugReport;
use crate::store::codec;

/// Separator for the aggregated tag column. Control characters never survive
/// sanitization, so it cannot appear inside a tag.
const TAG_SEPARATOR: char = '\u{1f}';

/// Column list decoded by [`bug_from_row`], in order.
pub const BUG_COLUMNS: &str = "b.id, b.title, b.description, b.status, b.priority, \
     (SELECT group_concat(tag, char(31) ORDER BY rowid) FROM bug_tags \
         WHERE bug_id = b.id) AS tags, \
     b.application_id, a.name, b.reporter_id, b.assigned_company_id, \
     b.vote_count, b.comment_count, b.flagged_at, b.flag_reason, \
     b.resolved_at, b.deleted_at, b.deleted_reason, b.created_at, b.updated_at";

pub const BUG_FROM: &str = "bug_reports b JOIN applications a ON a.id = b.application_id";

pub fn bug_from_row(row: &Row<'_>) -> rusqlite::Result<BugReport> {
    let tags: Option<String> = row.get(5)?;
    Ok(BugReport {
        id: codec::col_id(row, 0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: codec::col_parsed(row, 3)?,
        priority: codec::col_parsed(row, 4)?,
        tags: tags
            .map(|t| t.split(TAG_SEPARATOR).map(str::to_string).collect())
            .unwrap_or_default(),
        application_id: codec::col_id(row, 6)?,
        application_name: row.get(7)?,
        reporter_id: codec::col_opt_id(row, 8)?,
        assigned_company_id: codec::col_opt_id(row, 9)?,
        vote_count: row.get(10)?,
        comment_count: row.get(11)?,
        flagged_at: codec::col_opt_ts(row, 12)?,
        flag_reason: row.get(13)?,
        resolved_at: codec::col_opt_ts(row, 14)?,
        deleted_at: codec::col_opt_ts(row, 15)?,
        deleted_reason: row.get(16)?,
        created_at: codec::col_ts(row, 17)?,
        updated_at: codec::col_ts(row, 18)?,
    })
}

/// Fetch a bug whether or not it is removed.
pub fn find_bug(conn: &Connection, bug_id: Uuid) -> TrackerResult<Option<BugReport>> {
    let sql = format!("SELECT {BUG_COLUMNS} FROM {BUG_FROM} WHERE b.id = ?1;");
    let bug = conn
        .query_row(&sql, params![codec::id(&bug_id)], bug_from_row)
        .optional()?;
    Ok(bug)
}

/// Fetch a bug whether or not it is removed; `NotFound` if it never existed.
pub fn load_bug(conn: &Connection, bug_id: Uuid) -> TrackerResult<BugReport> {
    find_bug(conn, bug_id)?.ok_or_else(|| TrackerError::bug_not_found(bug_id))
}

/// Fetch a bug that is visible to public reads and user mutations.
/// Removed bugs are reported as `NotFound`.
pub fn load_live_bug(conn: &Connection, bug_id: Uuid) -> TrackerResult<BugReport> {
    match find_bug(conn, bug_id)? {
        Some(bug) if !bug.is_deleted() => Ok(bug),
        _ => Err(TrackerError::bug_not_found(bug_id)),
    }
}

/// Cheap existence check used inside write transactions.
pub fn require_live(conn: &Connection, bug_id: Uuid) -> TrackerResult<()> {
    let live: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM bug_reports WHERE id = ?1 AND deleted_at IS NULL;",
            params![codec::id(&bug_id)],
            |row| row.get(0),
        )
        .optional()?;
    match live {
        Some(_) => Ok(()),
        None => Err(TrackerError::bug_not_found(bug_id)),
    }
}

pub fn touch(conn: &Connection, bug_id: Uuid, now: &DateTime<Utc>) -> TrackerResult<()> {
    conn.execute(
        "UPDATE bug_reports SET updated_at = ?1 WHERE id = ?2;",
        params![codec::ts(now), codec::id(&bug_id)],
    )?;
    Ok(())
}
