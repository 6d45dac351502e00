//! VoteLedger: one vote per user per bug, toggled on and off.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::errors::TrackerResult;
use crate::lifecycle::counters;
use crate::models::{Vote, VoteOutcome};
use crate::store::{codec, rows};

/// Flip the vote of `user_id` on `bug_id`.
///
/// Must run inside a write transaction: the existence check, the row change
/// and the counter update then commit as one unit. The counter is
/// re-derived from the rows rather than stepped, so it cannot drift even if
/// an earlier writer left it wrong.
pub fn toggle(
    conn: &Connection,
    bug_id: Uuid,
    user_id: Uuid,
    now: &DateTime<Utc>,
) -> TrackerResult<VoteOutcome> {
    rows::require_live(conn, bug_id)?;

    let removed = conn.execute(
        "DELETE FROM bug_votes WHERE bug_id = ?1 AND user_id = ?2;",
        params![codec::id(&bug_id), codec::id(&user_id)],
    )?;
    let voted = if removed == 0 {
        conn.execute(
            "INSERT INTO bug_votes(bug_id, user_id, created_at) VALUES (?1, ?2, ?3);",
            params![codec::id(&bug_id), codec::id(&user_id), codec::ts(now)],
        )?;
        true
    } else {
        false
    };

    let vote_count = counters::sync_vote_count(conn, bug_id)?;
    rows::touch(conn, bug_id, now)?;
    Ok(VoteOutcome { voted, vote_count })
}

pub fn has_voted(conn: &Connection, bug_id: Uuid, user_id: Uuid) -> TrackerResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM bug_votes WHERE bug_id = ?1 AND user_id = ?2;",
            params![codec::id(&bug_id), codec::id(&user_id)],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Votes on a bug, oldest first.
pub fn list(conn: &Connection, bug_id: Uuid) -> TrackerResult<Vec<Vote>> {
    let mut stmt = conn.prepare(
        "SELECT bug_id, user_id, created_at FROM bug_votes \
         WHERE bug_id = ?1 ORDER BY created_at, rowid;",
    )?;
    let votes = stmt
        .query_map(params![codec::id(&bug_id)], |row| {
            Ok(Vote {
                bug_id: codec::col_id(row, 0)?,
                user_id: codec::col_id(row, 1)?,
                created_at: codec::col_ts(row, 2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(votes)
}

/// Move the votes of `from` onto `to`. A vote whose user already voted on
/// `to` is dropped instead, so no user is counted twice. Returns
/// `(moved, dropped)`.
pub fn repoint(conn: &Connection, from: Uuid, to: Uuid) -> TrackerResult<(usize, usize)> {
    let dropped = conn.execute(
        "DELETE FROM bug_votes WHERE bug_id = ?1 \
         AND user_id IN (SELECT user_id FROM bug_votes WHERE bug_id = ?2);",
        params![codec::id(&from), codec::id(&to)],
    )?;
    let moved = conn.execute(
        "UPDATE bug_votes SET bug_id = ?1 WHERE bug_id = ?2;",
        params![codec::id(&to), codec::id(&from)],
    )?;
    Ok((moved, dropped))
}
