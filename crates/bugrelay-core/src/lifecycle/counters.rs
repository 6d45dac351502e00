//! The one place `vote_count` and `comment_count` are written.
//!
//! Both columns are denormalizations of row counts: votes in `bug_votes`,
//! non-system comments in `comments`. Mutation paths either adjust them by a
//! known delta inside the same transaction as the row change, or re-derive
//! them from the rows. Reconciliation and merges always re-derive.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::TrackerResult;
use crate::store::codec;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedCounts {
    pub vote_count: i64,
    pub comment_count: i64,
}

/// Stored counters that disagreed with the rows, before repair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountDrift {
    pub bug_id: Uuid,
    pub stored: DerivedCounts,
    pub derived: DerivedCounts,
}

pub fn count_votes(conn: &Connection, bug_id: Uuid) -> TrackerResult<i64> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM bug_votes WHERE bug_id = ?1;",
        params![codec::id(&bug_id)],
        |row| row.get(0),
    )?;
    Ok(n)
}

pub fn count_comments(conn: &Connection, bug_id: Uuid) -> TrackerResult<i64> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM comments WHERE bug_id = ?1 AND is_system = 0;",
        params![codec::id(&bug_id)],
        |row| row.get(0),
    )?;
    Ok(n)
}

pub fn derive(conn: &Connection, bug_id: Uuid) -> TrackerResult<DerivedCounts> {
    Ok(DerivedCounts {
        vote_count: count_votes(conn, bug_id)?,
        comment_count: count_comments(conn, bug_id)?,
    })
}

pub fn stored(conn: &Connection, bug_id: Uuid) -> TrackerResult<DerivedCounts> {
    let counts = conn.query_row(
        "SELECT vote_count, comment_count FROM bug_reports WHERE id = ?1;",
        params![codec::id(&bug_id)],
        |row| {
            Ok(DerivedCounts {
                vote_count: row.get(0)?,
                comment_count: row.get(1)?,
            })
        },
    )?;
    Ok(counts)
}

/// Re-derive `vote_count` from the vote rows and store it.
pub fn sync_vote_count(conn: &Connection, bug_id: Uuid) -> TrackerResult<i64> {
    let votes = count_votes(conn, bug_id)?;
    conn.execute(
        "UPDATE bug_reports SET vote_count = ?1 WHERE id = ?2;",
        params![votes, codec::id(&bug_id)],
    )?;
    Ok(votes)
}

/// Add `delta` to the stored `comment_count`. Only valid in the transaction
/// that inserted or removed exactly `delta` counted comment rows.
pub fn adjust_comment_count(conn: &Connection, bug_id: Uuid, delta: i64) -> TrackerResult<i64> {
    let count = conn.query_row(
        "UPDATE bug_reports SET comment_count = comment_count + ?1 WHERE id = ?2 \
         RETURNING comment_count;",
        params![delta, codec::id(&bug_id)],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Re-derive both counters from rows and store them.
pub fn recompute(conn: &Connection, bug_id: Uuid) -> TrackerResult<DerivedCounts> {
    let derived = derive(conn, bug_id)?;
    conn.execute(
        "UPDATE bug_reports SET vote_count = ?1, comment_count = ?2 WHERE id = ?3;",
        params![derived.vote_count, derived.comment_count, codec::id(&bug_id)],
    )?;
    Ok(derived)
}

/// Compare stored counters with the rows; `None` when they agree.
pub fn detect_drift(conn: &Connection, bug_id: Uuid) -> TrackerResult<Option<CountDrift>> {
    let stored = stored(conn, bug_id)?;
    let derived = derive(conn, bug_id)?;
    if stored == derived {
        Ok(None)
    } else {
        Ok(Some(CountDrift {
            bug_id,
            stored,
            derived,
        }))
    }
}

/// Repair the counters of one bug. Returns the drift that was fixed, if any.
pub fn reconcile(conn: &Connection, bug_id: Uuid) -> TrackerResult<Option<CountDrift>> {
    let drift = detect_drift(conn, bug_id)?;
    if drift.is_some() {
        recompute(conn, bug_id)?;
    }
    Ok(drift)
}

/// Repair the counters of every bug, removed ones included.
pub fn reconcile_all(conn: &Connection) -> TrackerResult<Vec<CountDrift>> {
    let mut stmt = conn.prepare(
        "SELECT b.id FROM bug_reports b \
         WHERE b.vote_count != (SELECT COUNT(*) FROM bug_votes v WHERE v.bug_id = b.id) \
            OR b.comment_count != (SELECT COUNT(*) FROM comments c \
                                   WHERE c.bug_id = b.id AND c.is_system = 0) \
         ORDER BY b.created_at;",
    )?;
    let ids = stmt
        .query_map([], |row| codec::col_id(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut repaired = Vec::with_capacity(ids.len());
    for bug_id in ids {
        if let Some(drift) = reconcile(conn, bug_id)? {
            repaired.push(drift);
        }
    }
    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn corrupt(tracker: &crate::BugTracker, bug_id: Uuid, votes: i64, comments: i64) {
        tracker
            .database()
            .write("corrupt", |tx| {
                tx.execute(
                    "UPDATE bug_reports SET vote_count = ?1, comment_count = ?2 WHERE id = ?3;",
                    params![votes, comments, codec::id(&bug_id)],
                )?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn derived_counts_follow_rows() {
        let (_dir, tracker) = testutil::tracker();
        let bug = testutil::bug(&tracker, "Counted bug");
        for _ in 0..3 {
            tracker.toggle_vote(bug.id, Uuid::new_v4()).unwrap();
        }
        tracker
            .add_comment(bug.id, Uuid::new_v4(), "hello", false)
            .unwrap();

        let (stored, derived) = tracker
            .database()
            .read(|conn| Ok((stored(conn, bug.id)?, derive(conn, bug.id)?)))
            .unwrap();
        assert_eq!(stored, derived);
        assert_eq!(
            derived,
            DerivedCounts {
                vote_count: 3,
                comment_count: 1
            }
        );
    }

    #[test]
    fn reconcile_reports_and_repairs_drift() {
        let (_dir, tracker) = testutil::tracker();
        let bug = testutil::bug(&tracker, "Drifted bug");
        tracker.toggle_vote(bug.id, Uuid::new_v4()).unwrap();
        corrupt(&tracker, bug.id, 9, 4);

        let drift = tracker.reconcile_counts(bug.id).unwrap().unwrap();
        assert_eq!(drift.stored.vote_count, 9);
        assert_eq!(drift.derived.vote_count, 1);
        assert_eq!(drift.derived.comment_count, 0);

        let repaired = tracker.get_by_id(bug.id).unwrap();
        assert_eq!(repaired.vote_count, 1);
        assert_eq!(repaired.comment_count, 0);
        assert!(tracker.reconcile_counts(bug.id).unwrap().is_none());
    }

    #[test]
    fn reconcile_all_touches_only_drifted_bugs() {
        let (_dir, tracker) = testutil::tracker();
        let clean = testutil::bug(&tracker, "Clean bug");
        let dirty = testutil::bug(&tracker, "Dirty bug");
        tracker.toggle_vote(clean.id, Uuid::new_v4()).unwrap();
        corrupt(&tracker, dirty.id, 5, 0);

        let repaired = tracker.reconcile_all().unwrap();
        assert_eq!(repaired.len(), 1);
        assert_eq!(repaired[0].bug_id, dirty.id);
        assert_eq!(tracker.get_by_id(dirty.id).unwrap().vote_count, 0);
        assert_eq!(tracker.get_by_id(clean.id).unwrap().vote_count, 1);
    }
}
