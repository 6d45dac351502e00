//! CommentThread: append-only comments on a bug.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::errors::TrackerResult;
use crate::lifecycle::counters;
use crate::models::Comment;
use crate::store::{codec, rows};

fn insert(conn: &Connection, comment: &Comment) -> TrackerResult<()> {
    conn.execute(
        "INSERT INTO comments(id, bug_id, user_id, content, is_company_response, is_system, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
        params![
            codec::id(&comment.id),
            codec::id(&comment.bug_id),
            codec::id(&comment.user_id),
            comment.content,
            comment.is_company_response,
            comment.is_system,
            codec::ts(&comment.created_at),
        ],
    )?;
    Ok(())
}

/// Add a user comment and bump `comment_count` in the same transaction.
/// `content` must already be sanitized.
pub fn add(
    conn: &Connection,
    bug_id: Uuid,
    user_id: Uuid,
    content: String,
    is_company_response: bool,
    now: &DateTime<Utc>,
) -> TrackerResult<Comment> {
    rows::require_live(conn, bug_id)?;
    let comment = Comment {
        id: Uuid::new_v4(),
        bug_id,
        user_id,
        content,
        is_company_response,
        is_system: false,
        created_at: *now,
    };
    insert(conn, &comment)?;
    counters::adjust_comment_count(conn, bug_id, 1)?;
    rows::touch(conn, bug_id, now)?;
    Ok(comment)
}

/// Add a system-authored comment. System comments are not counted.
pub fn add_system(
    conn: &Connection,
    bug_id: Uuid,
    author_id: Uuid,
    content: String,
    now: &DateTime<Utc>,
) -> TrackerResult<Comment> {
    let comment = Comment {
        id: Uuid::new_v4(),
        bug_id,
        user_id: author_id,
        content,
        is_company_response: false,
        is_system: true,
        created_at: *now,
    };
    insert(conn, &comment)?;
    Ok(comment)
}

/// All comments on a bug in chronological order, system comments included.
pub fn list(conn: &Connection, bug_id: Uuid) -> TrackerResult<Vec<Comment>> {
    let mut stmt = conn.prepare(
        "SELECT id, bug_id, user_id, content, is_company_response, is_system, created_at \
         FROM comments WHERE bug_id = ?1 ORDER BY created_at, rowid;",
    )?;
    let comments = stmt
        .query_map(params![codec::id(&bug_id)], |row| {
            Ok(Comment {
                id: codec::col_id(row, 0)?,
                bug_id: codec::col_id(row, 1)?,
                user_id: codec::col_id(row, 2)?,
                content: row.get(3)?,
                is_company_response: row.get(4)?,
                is_system: row.get(5)?,
                created_at: codec::col_ts(row, 6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(comments)
}

/// Move every comment of `from` onto `to`. Counters are left to the caller.
pub fn repoint(conn: &Connection, from: Uuid, to: Uuid) -> TrackerResult<usize> {
    let moved = conn.execute(
        "UPDATE comments SET bug_id = ?1 WHERE bug_id = ?2;",
        params![codec::id(&to), codec::id(&from)],
    )?;
    Ok(moved)
}
