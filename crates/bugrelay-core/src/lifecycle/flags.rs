//! Explicit moderation flag. A flagged bug stays in the review queue until a
//! moderator clears the flag, independent of its vote and comment counts.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::errors::TrackerResult;
use crate::lifecycle::audit::{self, AuditAction};
use crate::models::{Actor, BugReport};
use crate::store::{codec, rows};

/// Flag a live bug. Re-flagging replaces the reason and timestamp.
pub fn flag(
    conn: &Connection,
    bug_id: Uuid,
    reason: &str,
    actor: &Actor,
    now: &DateTime<Utc>,
) -> TrackerResult<BugReport> {
    let bug = rows::load_live_bug(conn, bug_id)?;
    conn.execute(
        "UPDATE bug_reports SET flagged_at = ?1, flag_reason = ?2, updated_at = ?1 WHERE id = ?3;",
        params![codec::ts(now), reason, codec::id(&bug_id)],
    )?;
    audit::append(
        conn,
        AuditAction::BugFlag,
        bug_id,
        format!("Flagged bug report '{}': {}", bug.title, reason),
        actor,
        now,
    )?;
    rows::load_bug(conn, bug_id)
}

/// Clear the flag. Works on removed bugs too, so a moderator can empty the
/// queue without restoring them.
pub fn clear_flag(
    conn: &Connection,
    bug_id: Uuid,
    actor: &Actor,
    now: &DateTime<Utc>,
) -> TrackerResult<BugReport> {
    let bug = rows::load_bug(conn, bug_id)?;
    conn.execute(
        "UPDATE bug_reports SET flagged_at = NULL, flag_reason = NULL, updated_at = ?1 WHERE id = ?2;",
        params![codec::ts(now), codec::id(&bug_id)],
    )?;
    audit::append(
        conn,
        AuditAction::BugUnflag,
        bug_id,
        format!("Cleared flag on bug report '{}'", bug.title),
        actor,
        now,
    )?;
    rows::load_bug(conn, bug_id)
}
