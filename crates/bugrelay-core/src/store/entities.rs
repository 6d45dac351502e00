//! Creation and lookup of the entities the lifecycle engine operates on:
//! companies, applications, bug reports and their attachments.
//!
//! Inputs arrive already validated; these functions only write rows.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use crate::errors::{TrackerError, TrackerResult};
use crate::models::{Application, Attachment, Company, NewAttachment, NewBugReport, Priority};
use crate::store::{codec, schema};

pub fn insert_company(conn: &Connection, name: &str, now: &DateTime<Utc>) -> TrackerResult<Company> {
    let company = Company {
        id: Uuid::new_v4(),
        name: name.to_string(),
        created_at: *now,
    };
    conn.execute(
        "INSERT INTO companies(id, name, created_at) VALUES (?1, ?2, ?3);",
        params![codec::id(&company.id), company.name, codec::ts(now)],
    )?;
    Ok(company)
}

pub fn company_exists(conn: &Connection, company_id: Uuid) -> TrackerResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM companies WHERE id = ?1;",
            params![codec::id(&company_id)],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Look an application up by case-insensitive name, creating it when absent.
/// A newly created application is owned by `company_id`.
pub fn find_or_create_application(
    conn: &Connection,
    name: &str,
    company_id: Option<Uuid>,
    now: &DateTime<Utc>,
) -> TrackerResult<Application> {
    let existing = conn
        .query_row(
            "SELECT id, name, company_id, created_at FROM applications \
             WHERE name = ?1 COLLATE NOCASE ORDER BY created_at LIMIT 1;",
            params![name],
            |row| {
                Ok(Application {
                    id: codec::col_id(row, 0)?,
                    name: row.get(1)?,
                    company_id: codec::col_opt_id(row, 2)?,
                    created_at: codec::col_ts(row, 3)?,
                })
            },
        )
        .optional()?;
    if let Some(app) = existing {
        return Ok(app);
    }

    let app = Application {
        id: Uuid::new_v4(),
        name: name.to_string(),
        company_id,
        created_at: *now,
    };
    conn.execute(
        "INSERT INTO applications(id, name, company_id, created_at) VALUES (?1, ?2, ?3, ?4);",
        params![
            codec::id(&app.id),
            app.name,
            codec::opt_id(app.company_id.as_ref()),
            codec::ts(now)
        ],
    )?;
    debug!("created application '{}' ({})", app.name, app.id);
    Ok(app)
}

pub fn require_company(conn: &Connection, company_id: Uuid) -> TrackerResult<()> {
    if company_exists(conn, company_id)? {
        Ok(())
    } else {
        Err(TrackerError::NotFound {
            resource: "company",
            id: company_id.to_string(),
        })
    }
}

/// Insert a bug report, its tags and its search-index row. Counters start
/// at zero; status starts at `open`. The assigned company, if any, must
/// already exist.
pub fn insert_bug(
    conn: &Connection,
    bug: &NewBugReport,
    application: &Application,
    now: &DateTime<Utc>,
) -> TrackerResult<Uuid> {
    let bug_id = Uuid::new_v4();
    let created_at = codec::ts(&bug.created_at.unwrap_or(*now));
    conn.execute(
        "INSERT INTO bug_reports ( \
             id, title, description, status, priority, application_id, \
             reporter_id, assigned_company_id, created_at, updated_at \
         ) VALUES (?1, ?2, ?3, 'open', ?4, ?5, ?6, ?7, ?8, ?8);",
        params![
            codec::id(&bug_id),
            bug.title,
            bug.description,
            bug.priority.unwrap_or(Priority::Medium).as_str(),
            codec::id(&application.id),
            codec::opt_id(bug.reporter_id.as_ref()),
            codec::opt_id(bug.assigned_company_id.as_ref()),
            created_at,
        ],
    )?;

    let mut tag_stmt =
        conn.prepare("INSERT OR IGNORE INTO bug_tags(bug_id, tag) VALUES (?1, ?2);")?;
    for tag in &bug.tags {
        tag_stmt.execute(params![codec::id(&bug_id), tag])?;
    }

    if schema::fts_available(conn) {
        conn.execute(
            "INSERT INTO bug_fts(bug_id, title, description, application_name) \
             VALUES (?1, ?2, ?3, ?4);",
            params![codec::id(&bug_id), bug.title, bug.description, application.name],
        )?;
    }
    Ok(bug_id)
}

pub fn insert_attachment(
    conn: &Connection,
    bug_id: Uuid,
    attachment: &NewAttachment,
    now: &DateTime<Utc>,
) -> TrackerResult<Attachment> {
    let record = Attachment {
        id: Uuid::new_v4(),
        bug_id,
        filename: attachment.filename.clone(),
        file_url: attachment.file_url.clone(),
        file_size: attachment.file_size,
        mime_type: attachment.mime_type.clone(),
        uploaded_at: *now,
    };
    conn.execute(
        "INSERT INTO file_attachments(id, bug_id, filename, file_url, file_size, mime_type, uploaded_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
        params![
            codec::id(&record.id),
            codec::id(&bug_id),
            record.filename,
            record.file_url,
            record.file_size,
            record.mime_type,
            codec::ts(now),
        ],
    )?;
    Ok(record)
}

pub fn list_attachments(conn: &Connection, bug_id: Uuid) -> TrackerResult<Vec<Attachment>> {
    let mut stmt = conn.prepare(
        "SELECT id, bug_id, filename, file_url, file_size, mime_type, uploaded_at \
         FROM file_attachments WHERE bug_id = ?1 ORDER BY uploaded_at, rowid;",
    )?;
    let rows = stmt.query_map(params![codec::id(&bug_id)], |row| {
        Ok(Attachment {
            id: codec::col_id(row, 0)?,
            bug_id: codec::col_id(row, 1)?,
            filename: row.get(2)?,
            file_url: row.get(3)?,
            file_size: row.get(4)?,
            mime_type: row.get(5)?,
            uploaded_at: codec::col_ts(row, 6)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Move every attachment of `from` onto `to`. Returns the number moved.
pub fn repoint_attachments(conn: &Connection, from: Uuid, to: Uuid) -> TrackerResult<usize> {
    let moved = conn.execute(
        "UPDATE file_attachments SET bug_id = ?1 WHERE bug_id = ?2;",
        params![codec::id(&to), codec::id(&from)],
    )?;
    Ok(moved)
}
