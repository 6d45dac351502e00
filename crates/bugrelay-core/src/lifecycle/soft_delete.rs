//! SoftDeleteStore. Removal only hides a bug; its votes, comments and
//! attachments stay in place.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::errors::{TrackerError, TrackerResult};
use crate::lifecycle::audit::{self, AuditAction};
use crate::models::Actor;
use crate::store::{codec, rows};

/// Set the removal marker without auditing. Callers check state first.
pub(crate) fn mark_removed(
    conn: &Connection,
    bug_id: Uuid,
    reason: &str,
    now: &DateTime<Utc>,
) -> TrackerResult<()> {
    conn.execute(
        "UPDATE bug_reports SET deleted_at = ?1, deleted_reason = ?2, updated_at = ?1 \
         WHERE id = ?3;",
        params![codec::ts(now), reason, codec::id(&bug_id)],
    )?;
    Ok(())
}

pub fn remove(
    conn: &Connection,
    bug_id: Uuid,
    reason: &str,
    actor: &Actor,
    now: &DateTime<Utc>,
) -> TrackerResult<()> {
    let bug = rows::load_bug(conn, bug_id)?;
    if bug.is_deleted() {
        return Err(TrackerError::AlreadyDeleted(bug_id));
    }
    mark_removed(conn, bug_id, reason, now)?;
    audit::append(
        conn,
        AuditAction::BugRemove,
        bug_id,
        format!("Removed bug report '{}': {}", bug.title, reason),
        actor,
        now,
    )?;
    Ok(())
}

pub fn restore(
    conn: &Connection,
    bug_id: Uuid,
    actor: &Actor,
    now: &DateTime<Utc>,
) -> TrackerResult<()> {
    let bug = rows::load_bug(conn, bug_id)?;
    if !bug.is_deleted() {
        return Err(TrackerError::NotDeleted(bug_id));
    }
    conn.execute(
        "UPDATE bug_reports SET deleted_at = NULL, deleted_reason = NULL, updated_at = ?1 \
         WHERE id = ?2;",
        params![codec::ts(now), codec::id(&bug_id)],
    )?;
    audit::append(
        conn,
        AuditAction::BugRestore,
        bug_id,
        format!("Restored bug report '{}'", bug.title),
        actor,
        now,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewAttachment;
    use crate::testutil;

    #[test]
    fn remove_then_restore_keeps_everything() {
        let (_dir, tracker) = testutil::tracker();
        let bug = testutil::bug(&tracker, "Round trip");
        let admin = testutil::admin();
        let user = Uuid::new_v4();
        tracker.toggle_vote(bug.id, user).unwrap();
        tracker.add_comment(bug.id, user, "first", false).unwrap();
        tracker
            .add_attachment(
                bug.id,
                NewAttachment {
                    filename: "trace.log".into(),
                    file_url: "/uploads/trace.log".into(),
                    ..Default::default()
                },
            )
            .unwrap();

        tracker.remove(bug.id, "spam", &admin).unwrap();
        assert!(matches!(
            tracker.get_by_id(bug.id).unwrap_err(),
            TrackerError::NotFound { .. }
        ));
        let hidden = tracker.get_including_removed(bug.id).unwrap();
        assert_eq!(hidden.deleted_reason.as_deref(), Some("spam"));

        tracker.restore(bug.id, &admin).unwrap();
        let back = tracker.get_by_id(bug.id).unwrap();
        assert!(!back.is_deleted());
        assert!(back.deleted_reason.is_none());
        assert_eq!(back.vote_count, 1);
        assert_eq!(back.comment_count, 1);
        assert_eq!(tracker.votes(bug.id).unwrap().len(), 1);
        assert_eq!(tracker.comments(bug.id).unwrap().len(), 1);
        assert_eq!(tracker.attachments(bug.id).unwrap().len(), 1);

        let actions: Vec<String> = tracker
            .audit_history(bug.id)
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec!["bug_remove", "bug_restore"]);
    }

    #[test]
    fn state_mismatches_are_errors() {
        let (_dir, tracker) = testutil::tracker();
        let bug = testutil::bug(&tracker, "Mismatch");
        let admin = testutil::admin();

        assert!(matches!(
            tracker.restore(bug.id, &admin).unwrap_err(),
            TrackerError::NotDeleted(id) if id == bug.id
        ));
        tracker.remove(bug.id, "dup", &admin).unwrap();
        assert!(matches!(
            tracker.remove(bug.id, "dup", &admin).unwrap_err(),
            TrackerError::AlreadyDeleted(id) if id == bug.id
        ));
        assert!(matches!(
            tracker.remove(Uuid::new_v4(), "dup", &admin).unwrap_err(),
            TrackerError::NotFound { .. }
        ));
    }

    #[test]
    fn removed_bugs_reject_user_mutations() {
        let (_dir, tracker) = testutil::tracker();
        let bug = testutil::bug(&tracker, "Hidden bug");
        let admin = testutil::admin();
        tracker.remove(bug.id, "spam", &admin).unwrap();

        let user = Uuid::new_v4();
        assert!(matches!(
            tracker.toggle_vote(bug.id, user).unwrap_err(),
            TrackerError::NotFound { .. }
        ));
        assert!(matches!(
            tracker.add_comment(bug.id, user, "hello", false).unwrap_err(),
            TrackerError::NotFound { .. }
        ));
        assert!(matches!(
            tracker.set_status(bug.id, "fixed", &admin).unwrap_err(),
            TrackerError::NotFound { .. }
        ));
    }
}
