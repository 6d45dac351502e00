//! StatusMachine. Every transition between the four statuses is legal; the
//! only state the machine tracks is when a bug became resolved.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::errors::TrackerResult;
use crate::lifecycle::audit::{self, AuditAction};
use crate::models::{Actor, BugReport, BugStatus};
use crate::store::{codec, rows};

/// `resolved_at` after moving from `previous` to `next`.
///
/// Entering the resolved set stamps `now`; staying inside it keeps the
/// original stamp; leaving it clears the stamp.
pub fn resolved_at_after(
    previous: BugStatus,
    next: BugStatus,
    previous_resolved_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match (previous.is_resolved(), next.is_resolved()) {
        (false, true) => Some(now),
        (true, true) => previous_resolved_at.or(Some(now)),
        (_, false) => None,
    }
}

pub fn set_status(
    conn: &Connection,
    bug_id: Uuid,
    next: BugStatus,
    actor: &Actor,
    now: &DateTime<Utc>,
) -> TrackerResult<BugReport> {
    let current = rows::load_live_bug(conn, bug_id)?;
    let resolved_at = resolved_at_after(current.status, next, current.resolved_at, *now);

    conn.execute(
        "UPDATE bug_reports SET status = ?1, resolved_at = ?2, updated_at = ?3 WHERE id = ?4;",
        params![
            next.as_str(),
            codec::opt_ts(resolved_at.as_ref()),
            codec::ts(now),
            codec::id(&bug_id),
        ],
    )?;
    audit::append(
        conn,
        AuditAction::BugStatusChange,
        bug_id,
        format!("Status of '{}' changed from {} to {}", current.title, current.status, next),
        actor,
        now,
    )?;
    rows::load_bug(conn, bug_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TrackerError;
    use crate::testutil;
    use chrono::Duration;

    #[test]
    fn resolution_stamp_rules() {
        let t0 = codec::now();
        let t1 = t0 + Duration::seconds(5);
        use BugStatus::*;

        assert_eq!(resolved_at_after(Open, Fixed, None, t0), Some(t0));
        assert_eq!(resolved_at_after(Fixed, WontFix, Some(t0), t1), Some(t0));
        assert_eq!(resolved_at_after(Fixed, Fixed, Some(t0), t1), Some(t0));
        assert_eq!(resolved_at_after(WontFix, Reviewing, Some(t0), t1), None);
        assert_eq!(resolved_at_after(Open, Reviewing, None, t1), None);
    }

    #[test]
    fn fixed_then_reopened() {
        let (_dir, tracker) = testutil::tracker();
        let bug = testutil::bug(&tracker, "Crash on save");
        let admin = testutil::admin();
        assert_eq!(bug.status, BugStatus::Open);
        assert!(bug.resolved_at.is_none());

        let fixed = tracker.set_status(bug.id, "fixed", &admin).unwrap();
        assert_eq!(fixed.status, BugStatus::Fixed);
        assert!(fixed.resolved_at.is_some());
        assert!(fixed.updated_at >= bug.updated_at);

        let reopened = tracker.set_status(bug.id, "open", &admin).unwrap();
        assert_eq!(reopened.status, BugStatus::Open);
        assert!(reopened.resolved_at.is_none());
    }

    #[test]
    fn same_status_twice_only_moves_updated_at() {
        let (_dir, tracker) = testutil::tracker();
        let bug = testutil::bug(&tracker, "Idempotent status");
        let admin = testutil::admin();

        let first = tracker.set_status(bug.id, "wont_fix", &admin).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = tracker.set_status(bug.id, "wont_fix", &admin).unwrap();

        assert_eq!(second.status, first.status);
        assert_eq!(second.resolved_at, first.resolved_at);
        assert!(second.updated_at > first.updated_at);

        let entries = tracker.audit_history(bug.id).unwrap();
        let changes = entries
            .iter()
            .filter(|e| e.action == AuditAction::BugStatusChange.as_str())
            .count();
        assert_eq!(changes, 2);
    }

    #[test]
    fn invalid_status_is_rejected_before_writing() {
        let (_dir, tracker) = testutil::tracker();
        let bug = testutil::bug(&tracker, "Bad status");
        let err = tracker
            .set_status(bug.id, "closed", &testutil::admin())
            .unwrap_err();
        assert!(matches!(err, TrackerError::Validation(_)));
        assert!(tracker.audit_history(bug.id).unwrap().is_empty());
    }
}
