//! bugrelay core: the lifecycle and moderation engine behind the bug report
//! service.
//!
//! Votes, comments, status changes, soft deletion, flagging and merges are
//! applied through [`BugTracker`], which runs every mutation in a single
//! SQLite write transaction and keeps the denormalized vote and comment
//! counters equal to their underlying rows. The HTTP layer, authentication
//! and company-membership checks live outside this crate.

pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod models;
pub mod query;
pub mod store;
pub mod tracker;
pub mod validation;

pub use config::TrackerConfig;
pub use errors::{TrackerError, TrackerResult};
pub use lifecycle::audit::{AuditAction, AuditFilter};
pub use lifecycle::counters::{CountDrift, DerivedCounts};
pub use lifecycle::merge::MergeReport;
pub use models::{
    Actor, Application, Attachment, AuditLogEntry, BugReport, BugStatus, Comment, Company,
    NewAttachment, NewBugReport, Page, PageRequest, Pagination, Priority, Vote, VoteOutcome,
};
pub use query::cache::CacheStats;
pub use query::listing::{BugFilter, DashboardStats, ModerationFilter, ModerationItem, SortMode};
pub use tracker::BugTracker;

#[cfg(test)]
pub(crate) mod testutil {
    use tempfile::TempDir;
    use uuid::Uuid;

    use crate::{Actor, BugReport, BugTracker, NewBugReport, TrackerConfig};

    pub fn tracker_with<F>(adjust: F) -> (TempDir, BugTracker)
    where
        F: FnOnce(TrackerConfig) -> TrackerConfig,
    {
        let dir = TempDir::new().unwrap();
        let config = adjust(TrackerConfig::new(dir.path().join("bugrelay.db")));
        let tracker = BugTracker::open(config).unwrap();
        (dir, tracker)
    }

    pub fn tracker() -> (TempDir, BugTracker) {
        tracker_with(|config| config)
    }

    pub fn bug_in(tracker: &BugTracker, title: &str, application: &str) -> BugReport {
        tracker
            .submit_bug(NewBugReport {
                title: title.to_string(),
                description: format!("Steps to reproduce: {title}"),
                application_name: application.to_string(),
                reporter_id: Some(Uuid::new_v4()),
                ..Default::default()
            })
            .unwrap()
    }

    pub fn bug(tracker: &BugTracker, title: &str) -> BugReport {
        bug_in(tracker, title, "Test App")
    }

    pub fn admin() -> Actor {
        Actor::new(Uuid::new_v4())
    }
}
