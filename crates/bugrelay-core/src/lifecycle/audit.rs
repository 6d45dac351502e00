//! Append-only audit log of administrative actions.
//!
//! Entries are written inside the transaction of the action they describe,
//! so an action without its audit entry can never commit. The schema's
//! triggers reject any UPDATE or DELETE on `audit_logs`.

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::errors::TrackerResult;
use crate::models::{Actor, AuditLogEntry, Page, PageRequest, Pagination};
use crate::query::guards::{normalize_page, DEFAULT_AUDIT_PAGE_SIZE};
use crate::store::codec;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuditAction {
    BugFlag,
    BugUnflag,
    BugStatusChange,
    BugRemove,
    BugRestore,
    BugMerge,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::BugFlag => "bug_flag",
            AuditAction::BugUnflag => "bug_unflag",
            AuditAction::BugStatusChange => "bug_status_change",
            AuditAction::BugRemove => "bug_remove",
            AuditAction::BugRestore => "bug_restore",
            AuditAction::BugMerge => "bug_merge",
        }
    }
}

pub const RESOURCE_BUG: &str = "bug_report";

/// Filters for [`list`]; `None` matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub action: Option<String>,
    pub resource: Option<String>,
    pub user_id: Option<Uuid>,
}

/// Append one entry about a bug report.
pub fn append(
    conn: &Connection,
    action: AuditAction,
    resource_id: Uuid,
    details: String,
    actor: &Actor,
    now: &DateTime<Utc>,
) -> TrackerResult<AuditLogEntry> {
    let entry = AuditLogEntry {
        id: Uuid::new_v4(),
        action: action.as_str().to_string(),
        resource: RESOURCE_BUG.to_string(),
        resource_id: Some(resource_id),
        details,
        user_id: actor.user_id,
        ip_address: actor.ip_address.clone(),
        user_agent: actor.user_agent.clone(),
        created_at: *now,
    };
    conn.execute(
        "INSERT INTO audit_logs ( \
             id, action, resource, resource_id, details, user_id, ip_address, user_agent, created_at \
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
        params![
            codec::id(&entry.id),
            entry.action,
            entry.resource,
            codec::opt_id(entry.resource_id.as_ref()),
            entry.details,
            codec::id(&entry.user_id),
            entry.ip_address,
            entry.user_agent,
            codec::ts(now),
        ],
    )?;
    Ok(entry)
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditLogEntry> {
    Ok(AuditLogEntry {
        id: codec::col_id(row, 0)?,
        action: row.get(1)?,
        resource: row.get(2)?,
        resource_id: codec::col_opt_id(row, 3)?,
        details: row.get(4)?,
        user_id: codec::col_id(row, 5)?,
        ip_address: row.get(6)?,
        user_agent: row.get(7)?,
        created_at: codec::col_ts(row, 8)?,
    })
}

const ENTRY_COLUMNS: &str =
    "id, action, resource, resource_id, details, user_id, ip_address, user_agent, created_at";

/// Newest-first page of audit entries.
pub fn list(
    conn: &Connection,
    filter: &AuditFilter,
    page: PageRequest,
) -> TrackerResult<Page<AuditLogEntry>> {
    let page = normalize_page(page, DEFAULT_AUDIT_PAGE_SIZE);

    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();
    if let Some(action) = &filter.action {
        params.push(Box::new(action.clone()));
        clauses.push(format!("action = ?{}", params.len()));
    }
    if let Some(resource) = &filter.resource {
        params.push(Box::new(resource.clone()));
        clauses.push(format!("resource = ?{}", params.len()));
    }
    if let Some(user_id) = &filter.user_id {
        params.push(Box::new(codec::id(user_id)));
        clauses.push(format!("user_id = ?{}", params.len()));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM audit_logs{where_sql};"),
        param_refs.as_slice(),
        |row| row.get(0),
    )?;
    let pagination = Pagination::from_total(page.page, page.limit, total);

    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM audit_logs{where_sql} \
         ORDER BY created_at DESC, rowid DESC LIMIT ?{} OFFSET ?{};",
        params.len() + 1,
        params.len() + 2
    );
    let limit = pagination.limit;
    let offset = pagination.offset();
    let mut all_params = param_refs;
    all_params.push(&limit);
    all_params.push(&offset);

    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(all_params.as_slice(), entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page { items, pagination })
}

/// Most recent entries, for the moderation dashboard.
pub fn recent(conn: &Connection, limit: i64) -> TrackerResult<Vec<AuditLogEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM audit_logs ORDER BY created_at DESC, rowid DESC LIMIT ?1;"
    ))?;
    let items = stmt
        .query_map(params![limit], entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

/// Every entry about one bug, oldest first.
pub fn for_bug(conn: &Connection, bug_id: Uuid) -> TrackerResult<Vec<AuditLogEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM audit_logs WHERE resource = ?1 AND resource_id = ?2 \
         ORDER BY created_at, rowid;"
    ))?;
    let items = stmt
        .query_map(params![RESOURCE_BUG, codec::id(&bug_id)], entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}
