//! Shared guardrails for listing bounds and moderation thresholds.

use crate::models::PageRequest;

pub const MAX_QUERY_LENGTH: usize = 512;
pub const MAX_PAGE_SIZE: i64 = 100;
pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const DEFAULT_AUDIT_PAGE_SIZE: i64 = 50;
pub const DASHBOARD_RECENT_ACTIONS: i64 = 50;

/// Trending only ranks bugs created within this many days.
pub const TRENDING_WINDOW_DAYS: i64 = 30;

// Moderation queue thresholds
pub const FLAG_VOTE_THRESHOLD: i64 = 100;
pub const FLAG_COMMENT_THRESHOLD: i64 = 50;

/// SQL predicate over `bug_reports b` selecting bugs that need moderator
/// attention. Kept in sync with [`needs_review`].
pub const NEEDS_REVIEW_SQL: &str =
    "(b.vote_count > 100 OR b.comment_count > 50 OR b.flagged_at IS NOT NULL)";

pub fn needs_review(vote_count: i64, comment_count: i64, flagged: bool) -> bool {
    vote_count > FLAG_VOTE_THRESHOLD || comment_count > FLAG_COMMENT_THRESHOLD || flagged
}

/// Pages start at 1; a limit outside `1..=MAX_PAGE_SIZE` falls back to
/// `default_limit` rather than being clamped.
pub fn normalize_page(page: PageRequest, default_limit: i64) -> PageRequest {
    let limit = if page.limit <= 0 || page.limit > MAX_PAGE_SIZE {
        default_limit
    } else {
        page.limit
    };
    PageRequest {
        page: page.page.max(1),
        limit,
    }
}

/// Trim a search term and cap it at `MAX_QUERY_LENGTH` bytes on a character
/// boundary. Blank terms become `None`.
pub fn truncate_query(query: &str) -> Option<String> {
    let stripped = query.trim();
    if stripped.is_empty() {
        return None;
    }
    if stripped.len() <= MAX_QUERY_LENGTH {
        return Some(stripped.to_string());
    }
    let mut end = MAX_QUERY_LENGTH;
    while !stripped.is_char_boundary(end) {
        end -= 1;
    }
    Some(stripped[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_normalization() {
        assert_eq!(normalize_page(PageRequest::new(0, 0), 20), PageRequest::new(1, 20));
        assert_eq!(normalize_page(PageRequest::new(-3, 500), 20), PageRequest::new(1, 20));
        assert_eq!(normalize_page(PageRequest::new(4, 100), 20), PageRequest::new(4, 100));
        assert_eq!(normalize_page(PageRequest::new(2, 0), 50), PageRequest::new(2, 50));
    }

    #[test]
    fn review_thresholds_are_strict() {
        assert!(!needs_review(100, 50, false));
        assert!(needs_review(101, 0, false));
        assert!(needs_review(0, 51, false));
        assert!(needs_review(0, 0, true));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_query("   "), None);
        assert_eq!(truncate_query("  crash  ").as_deref(), Some("crash"));
        let long = "é".repeat(400);
        let cut = truncate_query(&long).unwrap();
        assert!(cut.len() <= MAX_QUERY_LENGTH);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}
