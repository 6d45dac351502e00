//! Shared typed models used across the store, lifecycle, and query layers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::TrackerError;

// ---------------------------------------------------------------------------
// Status / priority
// ---------------------------------------------------------------------------

/// Lifecycle status of a bug report. Any status may move to any other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BugStatus {
    Open,
    Reviewing,
    Fixed,
    WontFix,
}

impl BugStatus {
    pub const ALL: [BugStatus; 4] = [
        BugStatus::Open,
        BugStatus::Reviewing,
        BugStatus::Fixed,
        BugStatus::WontFix,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BugStatus::Open => "open",
            BugStatus::Reviewing => "reviewing",
            BugStatus::Fixed => "fixed",
            BugStatus::WontFix => "wont_fix",
        }
    }

    /// `fixed` and `wont_fix` carry a resolution timestamp.
    pub fn is_resolved(self) -> bool {
        matches!(self, BugStatus::Fixed | BugStatus::WontFix)
    }
}

impl fmt::Display for BugStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BugStatus {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BugStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim())
            .ok_or_else(|| TrackerError::Validation(format!("invalid status '{s}'")))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Priority::ALL
            .into_iter()
            .find(|priority| priority.as_str() == s.trim())
            .ok_or_else(|| TrackerError::Validation(format!("invalid priority '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: Uuid,
    pub name: String,
    pub company_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A bug report with its derived counters.
///
/// `vote_count` and `comment_count` are denormalizations: after every
/// committed operation they equal the number of vote rows and non-system
/// comment rows for this bug.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BugReport {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: BugStatus,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub application_id: Uuid,
    pub application_name: String,
    /// `None` for anonymous submissions.
    pub reporter_id: Option<Uuid>,
    pub assigned_company_id: Option<Uuid>,
    pub vote_count: i64,
    pub comment_count: i64,
    pub flagged_at: Option<DateTime<Utc>>,
    pub flag_reason: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BugReport {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_flagged(&self) -> bool {
        self.flagged_at.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub bug_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub bug_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    /// Fixed at creation from the author's company membership.
    pub is_company_response: bool,
    /// Written by the system (merge summaries); not counted in `comment_count`.
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub bug_id: Uuid,
    pub filename: String,
    pub file_url: String,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<Uuid>,
    pub details: String,
    pub user_id: Uuid,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Requests / results
// ---------------------------------------------------------------------------

/// The authenticated user performing an administrative or company action,
/// plus the request metadata recorded in the audit log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl Actor {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            ip_address: None,
            user_agent: None,
        }
    }

    pub fn with_request(mut self, ip_address: &str, user_agent: &str) -> Self {
        self.ip_address = Some(ip_address.to_string());
        self.user_agent = Some(user_agent.to_string());
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct NewBugReport {
    pub title: String,
    pub description: String,
    /// Matched case-insensitively against existing applications.
    pub application_name: String,
    pub priority: Option<Priority>,
    pub tags: Vec<String>,
    pub reporter_id: Option<Uuid>,
    pub assigned_company_id: Option<Uuid>,
    /// Overrides the submission time, for imports and seeding.
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default)]
pub struct NewAttachment {
    pub filename: String,
    pub file_url: String,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteOutcome {
    pub voted: bool,
    pub vote_count: i64,
}

/// Requested page; normalized by `query::guards::normalize_page`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl PageRequest {
    pub fn new(page: i64, limit: i64) -> Self {
        Self { page, limit }
    }

    pub fn first(limit: i64) -> Self {
        Self { page: 1, limit }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    /// Build exact pagination info from a counted total.
    pub fn from_total(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if limit > 0 { (total + limit - 1) / limit } else { 0 };
        Self {
            page,
            limit,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }

    /// Row offset of this page, saturating so an absurd page number reads
    /// past the end instead of overflowing.
    pub fn offset(&self) -> i64 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in BugStatus::ALL {
            assert_eq!(status.as_str().parse::<BugStatus>().unwrap(), status);
        }
        assert!("closed".parse::<BugStatus>().is_err());
    }

    #[test]
    fn resolved_statuses() {
        assert!(BugStatus::Fixed.is_resolved());
        assert!(BugStatus::WontFix.is_resolved());
        assert!(!BugStatus::Open.is_resolved());
        assert!(!BugStatus::Reviewing.is_resolved());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&BugStatus::WontFix).unwrap();
        assert_eq!(json, "\"wont_fix\"");
    }

    #[test]
    fn priority_defaults_to_medium() {
        assert_eq!(Priority::default(), Priority::Medium);
        assert_eq!("critical".parse::<Priority>().unwrap(), Priority::Critical);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn pagination_is_exact() {
        let p = Pagination::from_total(2, 20, 41);
        assert_eq!(p.total_pages, 3);
        assert!(p.has_next);
        assert!(p.has_prev);
        assert_eq!(p.offset(), 20);

        let last = Pagination::from_total(3, 20, 41);
        assert!(!last.has_next);

        let empty = Pagination::from_total(1, 20, 0);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next);
        assert!(!empty.has_prev);
    }
}
