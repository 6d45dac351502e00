//! Public and moderation listings of bug reports.
//!
//! Every listing runs an exact `COUNT(*)` with the same `FROM`/`WHERE` as the
//! page query, so pagination flags are never estimated.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::ToSql;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::errors::{TrackerError, TrackerResult};
use crate::lifecycle::audit;
use crate::models::{AuditLogEntry, BugReport, BugStatus, Page, PageRequest, Pagination, Priority};
use crate::query::guards::{
    needs_review, normalize_page, truncate_query, DASHBOARD_RECENT_ACTIONS, DEFAULT_PAGE_SIZE,
    NEEDS_REVIEW_SQL, TRENDING_WINDOW_DAYS,
};
use crate::query::relevance::{self, SearchPlan};
use crate::store::rows::{bug_from_row, BUG_COLUMNS, BUG_FROM};
use crate::store::{codec, schema};
use crate::validation::sanitize;

/// Filters for the public listing. Tags use AND semantics; `application`
/// and `company` are case-insensitive substrings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugFilter {
    pub status: Option<BugStatus>,
    pub priority: Option<Priority>,
    pub tags: Vec<String>,
    pub application: Option<String>,
    pub company: Option<String>,
    pub search: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    #[default]
    Recent,
    Popular,
    Trending,
    Oldest,
}

impl SortMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SortMode::Recent => "recent",
            SortMode::Popular => "popular",
            SortMode::Trending => "trending",
            SortMode::Oldest => "oldest",
        }
    }

    fn order_sql(self) -> &'static str {
        match self {
            SortMode::Recent => "b.created_at DESC, b.rowid DESC",
            SortMode::Popular | SortMode::Trending => {
                "b.vote_count DESC, b.created_at DESC, b.rowid DESC"
            }
            SortMode::Oldest => "b.created_at ASC, b.rowid ASC",
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortMode {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "recent" => Ok(SortMode::Recent),
            "popular" => Ok(SortMode::Popular),
            "trending" => Ok(SortMode::Trending),
            "oldest" => Ok(SortMode::Oldest),
            other => Err(TrackerError::Validation(format!("invalid sort '{other}'"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationFilter {
    pub status: Option<BugStatus>,
    /// Only bugs matching the review predicate.
    pub needs_review_only: bool,
    pub include_removed: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModerationItem {
    #[serde(flatten)]
    pub bug: BugReport,
    pub needs_review: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_bugs: i64,
    pub open_bugs: i64,
    pub needs_review: i64,
    pub removed_bugs: i64,
    pub recent_actions: Vec<AuditLogEntry>,
}

/// Accumulates `WHERE` clauses and their positional parameters.
#[derive(Default)]
struct QueryBuilder {
    from: String,
    clauses: Vec<String>,
    params: Vec<Box<dyn ToSql>>,
}

impl QueryBuilder {
    fn new(from: String) -> Self {
        Self {
            from,
            ..Default::default()
        }
    }

    /// Bind `value` and return its placeholder.
    fn bind<T: ToSql + 'static>(&mut self, value: T) -> String {
        self.params.push(Box::new(value));
        format!("?{}", self.params.len())
    }

    fn push(&mut self, clause: String) {
        self.clauses.push(clause);
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    fn count(&self, conn: &Connection) -> TrackerResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}{};", self.from, self.where_sql());
        let refs: Vec<&dyn ToSql> = self.params.iter().map(|p| p.as_ref()).collect();
        Ok(conn.query_row(&sql, refs.as_slice(), |row| row.get(0))?)
    }

    fn fetch<T, F>(
        &self,
        conn: &Connection,
        columns: &str,
        order_by: &str,
        pagination: &Pagination,
        map: F,
    ) -> TrackerResult<Vec<T>>
    where
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        let n = self.params.len();
        let sql = format!(
            "SELECT {columns} FROM {}{} ORDER BY {order_by} LIMIT ?{} OFFSET ?{};",
            self.from,
            self.where_sql(),
            n + 1,
            n + 2
        );
        let limit = pagination.limit;
        let offset = pagination.offset();
        let mut refs: Vec<&dyn ToSql> = self.params.iter().map(|p| p.as_ref()).collect();
        refs.push(&limit);
        refs.push(&offset);

        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(refs.as_slice(), map)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }
}

/// Substring pattern for user-entered names, escaped for `LIKE`.
fn contains_pattern(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(relevance::like_pattern(&sanitize(trimmed)))
    }
}

/// Public listing: removed bugs are never included.
pub fn list_public(
    conn: &Connection,
    filter: &BugFilter,
    sort: SortMode,
    page: PageRequest,
    now: &DateTime<Utc>,
) -> TrackerResult<Page<BugReport>> {
    let page = normalize_page(page, DEFAULT_PAGE_SIZE);
    let search = filter
        .search
        .as_deref()
        .and_then(truncate_query)
        .map(|term| SearchPlan::for_term(&sanitize(&term), schema::fts_available(conn)));

    let mut from = BUG_FROM.to_string();
    let mut relevance_order: Option<String> = None;
    let mut q = QueryBuilder::default();

    if let Some(SearchPlan::Fts(expr)) = &search {
        let param = q.bind(expr.clone());
        from.push_str(&format!(
            " JOIN (SELECT bug_id, {} AS score FROM bug_fts WHERE bug_fts MATCH {param}) s \
             ON s.bug_id = b.id",
            relevance::BM25_RANK
        ));
        relevance_order = Some("s.score ASC".to_string());
    }
    q.from = from;

    q.push("b.deleted_at IS NULL".to_string());
    if let Some(SearchPlan::Like(pattern)) = &search {
        let param = q.bind(pattern.clone());
        q.push(relevance::like_filter_sql(&param));
        relevance_order = Some(format!("{} DESC", relevance::like_score_sql(&param)));
    }
    if let Some(status) = filter.status {
        let param = q.bind(status.as_str());
        q.push(format!("b.status = {param}"));
    }
    if let Some(priority) = filter.priority {
        let param = q.bind(priority.as_str());
        q.push(format!("b.priority = {param}"));
    }
    for tag in &filter.tags {
        let tag = tag.trim().to_lowercase();
        if tag.is_empty() {
            continue;
        }
        let param = q.bind(sanitize(&tag));
        q.push(format!(
            "EXISTS (SELECT 1 FROM bug_tags t WHERE t.bug_id = b.id AND t.tag = {param})"
        ));
    }
    if let Some(pattern) = filter.application.as_deref().and_then(contains_pattern) {
        let param = q.bind(pattern);
        q.push(format!("a.name LIKE {param} ESCAPE '\\'"));
    }
    if let Some(pattern) = filter.company.as_deref().and_then(contains_pattern) {
        let param = q.bind(pattern);
        q.push(format!(
            "EXISTS (SELECT 1 FROM companies c \
             WHERE c.id = COALESCE(b.assigned_company_id, a.company_id) \
               AND c.name LIKE {param} ESCAPE '\\')"
        ));
    }
    if sort == SortMode::Trending {
        let since = *now - Duration::days(TRENDING_WINDOW_DAYS);
        let param = q.bind(codec::ts(&since));
        q.push(format!("b.created_at > {param}"));
    }

    let order_by = match relevance_order {
        Some(rank) => format!("{rank}, {}", sort.order_sql()),
        None => sort.order_sql().to_string(),
    };

    let total = q.count(conn)?;
    let pagination = Pagination::from_total(page.page, page.limit, total);
    let items = q.fetch(conn, BUG_COLUMNS, &order_by, &pagination, bug_from_row)?;
    Ok(Page { items, pagination })
}

/// Moderation listing, newest first, with the review predicate evaluated
/// per item.
pub fn list_for_moderation(
    conn: &Connection,
    filter: &ModerationFilter,
    page: PageRequest,
) -> TrackerResult<Page<ModerationItem>> {
    let page = normalize_page(page, DEFAULT_PAGE_SIZE);
    let mut q = QueryBuilder::new(BUG_FROM.to_string());

    if !filter.include_removed {
        q.push("b.deleted_at IS NULL".to_string());
    }
    if let Some(status) = filter.status {
        let param = q.bind(status.as_str());
        q.push(format!("b.status = {param}"));
    }
    if filter.needs_review_only {
        q.push(NEEDS_REVIEW_SQL.to_string());
    }

    let total = q.count(conn)?;
    let pagination = Pagination::from_total(page.page, page.limit, total);
    let items = q.fetch(
        conn,
        BUG_COLUMNS,
        "b.created_at DESC, b.rowid DESC",
        &pagination,
        |row| {
            let bug = bug_from_row(row)?;
            Ok(ModerationItem {
                needs_review: needs_review(bug.vote_count, bug.comment_count, bug.is_flagged()),
                bug,
            })
        },
    )?;
    Ok(Page { items, pagination })
}

pub fn dashboard(conn: &Connection) -> TrackerResult<DashboardStats> {
    let (total_bugs, open_bugs, review_count, removed_bugs): (i64, i64, i64, i64) = conn.query_row(
        &format!(
            "SELECT \
                 COALESCE(SUM(b.deleted_at IS NULL), 0), \
                 COALESCE(SUM(b.deleted_at IS NULL AND b.status = 'open'), 0), \
                 COALESCE(SUM(b.deleted_at IS NULL AND {NEEDS_REVIEW_SQL}), 0), \
                 COALESCE(SUM(b.deleted_at IS NOT NULL), 0) \
             FROM bug_reports b;"
        ),
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )?;
    Ok(DashboardStats {
        total_bugs,
        open_bugs,
        needs_review: review_count,
        removed_bugs,
        recent_actions: audit::recent(conn, DASHBOARD_RECENT_ACTIONS)?,
    })
}
