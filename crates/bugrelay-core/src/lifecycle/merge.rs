//! MergeCoordinator: fold a duplicate bug report into its canonical one.
//!
//! The whole merge runs in the caller's write transaction. Any failing step
//! returns early, the transaction rolls back, and neither bug is changed.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{TrackerError, TrackerResult};
use crate::lifecycle::audit::{self, AuditAction};
use crate::lifecycle::counters::{self, DerivedCounts};
use crate::lifecycle::{comments, soft_delete, votes};
use crate::models::{Actor, BugReport};
use crate::store::{entities, rows};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub votes_moved: usize,
    pub votes_dropped: usize,
    pub comments_moved: usize,
    pub attachments_moved: usize,
    /// Target counters after the merge, derived from rows.
    pub target_counts: DerivedCounts,
    pub summary_comment_id: Uuid,
}

fn load_mergeable(conn: &Connection, bug_id: Uuid, role: &str) -> TrackerResult<BugReport> {
    let bug = rows::load_bug(conn, bug_id)?;
    if bug.is_deleted() {
        return Err(TrackerError::InvalidMerge(format!(
            "{role} bug report {bug_id} is already removed"
        )));
    }
    Ok(bug)
}

pub fn merge(
    conn: &Connection,
    source_id: Uuid,
    target_id: Uuid,
    reason: &str,
    actor: &Actor,
    now: &DateTime<Utc>,
) -> TrackerResult<MergeReport> {
    if source_id == target_id {
        return Err(TrackerError::InvalidMerge(
            "cannot merge a bug report into itself".to_string(),
        ));
    }
    let source = load_mergeable(conn, source_id, "source")?;
    let target = load_mergeable(conn, target_id, "target")?;

    let (votes_moved, votes_dropped) = votes::repoint(conn, source_id, target_id)?;
    let comments_moved = comments::repoint(conn, source_id, target_id)?;
    let attachments_moved = entities::repoint_attachments(conn, source_id, target_id)?;

    let target_counts = counters::recompute(conn, target_id)?;
    counters::recompute(conn, source_id)?;

    let summary = comments::add_system(
        conn,
        target_id,
        actor.user_id,
        format!(
            "Merged duplicate bug report '{}' ({}) into this report. Reason: {}",
            source.title, source_id, reason
        ),
        now,
    )?;

    soft_delete::mark_removed(conn, source_id, &format!("Merged into {target_id}: {reason}"), now)?;
    rows::touch(conn, target_id, now)?;

    audit::append(
        conn,
        AuditAction::BugMerge,
        target_id,
        format!(
            "Merged bug report '{}' ({}) into '{}' ({}). Reason: {}",
            source.title, source_id, target.title, target_id, reason
        ),
        actor,
        now,
    )?;

    Ok(MergeReport {
        source_id,
        target_id,
        votes_moved,
        votes_dropped,
        comments_moved,
        attachments_moved,
        target_counts,
        summary_comment_id: summary.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewAttachment;
    use crate::testutil;

    #[test]
    fn overlapping_voters_are_counted_once() {
        let (_dir, tracker) = testutil::tracker();
        let source = testutil::bug(&tracker, "Duplicate crash");
        let target = testutil::bug(&tracker, "Original crash");
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        for user in [a, b] {
            tracker.toggle_vote(source.id, user).unwrap();
        }
        for user in [b, c] {
            tracker.toggle_vote(target.id, user).unwrap();
        }

        let report = tracker
            .merge(source.id, target.id, "duplicate", &testutil::admin())
            .unwrap();
        assert_eq!(report.votes_moved, 1);
        assert_eq!(report.votes_dropped, 1);

        let target = tracker.get_by_id(target.id).unwrap();
        assert_eq!(target.vote_count, 3);
        let source = tracker.get_including_removed(source.id).unwrap();
        assert!(source.is_deleted());
        assert_eq!(source.vote_count, 0);
    }

    #[test]
    fn comments_and_attachments_follow_the_merge() {
        let (_dir, tracker) = testutil::tracker();
        let source = testutil::bug(&tracker, "dup-1 title");
        let target = testutil::bug(&tracker, "orig-1 title");
        let user = Uuid::new_v4();
        tracker.add_comment(source.id, user, "one", false).unwrap();
        tracker.add_comment(source.id, user, "two", false).unwrap();
        tracker
            .add_attachment(
                source.id,
                NewAttachment {
                    filename: "shot.png".into(),
                    file_url: "/uploads/shot.png".into(),
                    file_size: Some(1024),
                    mime_type: Some("image/png".into()),
                },
            )
            .unwrap();

        tracker
            .merge(source.id, target.id, "duplicate", &testutil::admin())
            .unwrap();

        let merged = tracker.get_by_id(target.id).unwrap();
        assert_eq!(merged.comment_count, 2);
        let thread = tracker.comments(target.id).unwrap();
        assert_eq!(thread.len(), 3);
        assert_eq!(thread.iter().filter(|c| c.is_system).count(), 1);
        assert!(thread
            .iter()
            .any(|c| c.is_system && c.content.contains("duplicate")));
        assert_eq!(tracker.attachments(target.id).unwrap().len(), 1);

        let source = tracker.get_including_removed(source.id).unwrap();
        assert!(source.is_deleted());
        assert_eq!(source.comment_count, 0);

        assert!(tracker.audit_history(source.id).unwrap().is_empty());
        let entry = tracker
            .audit_history(target.id)
            .unwrap()
            .into_iter()
            .find(|e| e.action == "bug_merge")
            .unwrap();
        assert_eq!(entry.resource_id, Some(target.id));
        assert!(entry.details.contains(&source.id.to_string()));
        assert!(entry.details.contains(&target.id.to_string()));
        assert!(entry.details.contains("dup-1 title"));
        assert!(entry.details.contains("orig-1 title"));
    }

    #[test]
    fn failed_summary_insert_rolls_everything_back() {
        let (_dir, tracker) = testutil::tracker();
        let source = testutil::bug(&tracker, "Atomic source");
        let target = testutil::bug(&tracker, "Atomic target");
        let user = Uuid::new_v4();
        tracker.toggle_vote(source.id, user).unwrap();
        tracker.add_comment(source.id, user, "keep me", false).unwrap();
        tracker
            .database()
            .write("install_trigger", |tx| {
                tx.execute_batch(
                    "CREATE TRIGGER fail_system_comment BEFORE INSERT ON comments \
                     WHEN NEW.is_system = 1 BEGIN SELECT RAISE(ABORT, 'boom'); END;",
                )?;
                Ok(())
            })
            .unwrap();

        let err = tracker
            .merge(source.id, target.id, "duplicate", &testutil::admin())
            .unwrap_err();
        assert!(err.to_string().contains("boom"), "unexpected error: {err}");

        let source_after = tracker.get_by_id(source.id).unwrap();
        assert!(!source_after.is_deleted());
        assert_eq!(source_after.vote_count, 1);
        assert_eq!(source_after.comment_count, 1);
        assert_eq!(tracker.votes(source.id).unwrap().len(), 1);
        assert_eq!(tracker.comments(source.id).unwrap().len(), 1);

        let target_after = tracker.get_by_id(target.id).unwrap();
        assert_eq!(target_after.vote_count, 0);
        assert!(tracker.comments(target.id).unwrap().is_empty());
        assert!(tracker.audit_history(source.id).unwrap().is_empty());
        assert!(tracker.audit_history(target.id).unwrap().is_empty());
    }

    #[test]
    fn invalid_merges() {
        let (_dir, tracker) = testutil::tracker();
        let a = testutil::bug(&tracker, "Bug A here");
        let b = testutil::bug(&tracker, "Bug B here");
        let admin = testutil::admin();

        assert!(matches!(
            tracker.merge(a.id, a.id, "self", &admin).unwrap_err(),
            TrackerError::InvalidMerge(_)
        ));
        assert!(matches!(
            tracker.merge(Uuid::new_v4(), b.id, "gone", &admin).unwrap_err(),
            TrackerError::NotFound { .. }
        ));

        tracker.remove(a.id, "spam", &admin).unwrap();
        assert!(matches!(
            tracker.merge(a.id, b.id, "late", &admin).unwrap_err(),
            TrackerError::InvalidMerge(_)
        ));
        assert!(matches!(
            tracker.merge(b.id, a.id, "late", &admin).unwrap_err(),
            TrackerError::InvalidMerge(_)
        ));
    }
}
