//! `BugTracker`: the operations the HTTP layer calls.
//!
//! Each mutation follows the same path: validate and sanitize input, run the
//! lifecycle step inside one write transaction, invalidate the cache once
//! the transaction has committed, then log. Reads go through the cache where
//! one applies and otherwise straight to the store.

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::TrackerConfig;
use crate::errors::{TrackerError, TrackerResult};
use crate::lifecycle::audit::{self, AuditFilter};
use crate::lifecycle::counters::{self, CountDrift};
use crate::lifecycle::merge::{self, MergeReport};
use crate::lifecycle::{comments, flags, soft_delete, status, votes};
use crate::models::{
    Actor, Attachment, AuditLogEntry, BugReport, BugStatus, Comment, Company, NewAttachment,
    NewBugReport, Page, PageRequest, Vote, VoteOutcome,
};
use crate::query::cache::{self, CacheLayer, CacheStats};
use crate::query::guards::{normalize_page, DEFAULT_PAGE_SIZE};
use crate::query::listing::{self, BugFilter, DashboardStats, ModerationFilter, ModerationItem, SortMode};
use crate::store::database::Database;
use crate::store::{codec, entities, rows};
use crate::validation;

const MAX_COMPANY_NAME_LENGTH: usize = 255;
const MAX_FILENAME_LENGTH: usize = 255;
const MAX_FILE_URL_LENGTH: usize = 2048;

pub struct BugTracker {
    db: Database,
    cache: CacheLayer,
    config: TrackerConfig,
}

impl BugTracker {
    /// Open (creating if needed) the database named by `config` and bring
    /// its schema up to date.
    pub fn open(config: TrackerConfig) -> TrackerResult<Self> {
        let db = Database::open(&config.db_path, config.busy_timeout)?;
        db.init_schema()?;
        info!(
            "bug tracker ready at {} (cache {})",
            db.db_path().display(),
            if config.cache_enabled { "on" } else { "off" }
        );
        Ok(Self {
            cache: CacheLayer::new(&config),
            db,
            config,
        })
    }

    pub fn from_env() -> TrackerResult<Self> {
        Self::open(TrackerConfig::from_env())
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ── entity creation ────────────────────────────────────────────────

    pub fn create_company(&self, name: &str) -> TrackerResult<Company> {
        let name = validation::sanitized_text("company name", name, 1, MAX_COMPANY_NAME_LENGTH)?;
        let company = self.db.write("create_company", |tx| {
            entities::insert_company(tx, &name, &codec::now())
        })?;
        info!("created company '{}' ({})", company.name, company.id);
        Ok(company)
    }

    /// Submit a new bug report. The application is looked up by name and
    /// created on first use.
    pub fn submit_bug(&self, bug: NewBugReport) -> TrackerResult<BugReport> {
        let clean = NewBugReport {
            title: validation::title(&bug.title)?,
            description: validation::description(&bug.description)?,
            application_name: validation::application_name(&bug.application_name)?,
            tags: validation::tags(&bug.tags)?,
            ..bug
        };
        let report = self.db.write("submit_bug", |tx| {
            let now = codec::now();
            if let Some(company_id) = clean.assigned_company_id {
                entities::require_company(tx, company_id)?;
            }
            let app = entities::find_or_create_application(
                tx,
                &clean.application_name,
                clean.assigned_company_id,
                &now,
            )?;
            let bug_id = entities::insert_bug(tx, &clean, &app, &now)?;
            rows::load_bug(tx, bug_id)
        })?;
        self.cache.invalidate_listings();
        info!("submitted bug {} for '{}'", report.id, report.application_name);
        Ok(report)
    }

    pub fn add_attachment(&self, bug_id: Uuid, attachment: NewAttachment) -> TrackerResult<Attachment> {
        let filename =
            validation::sanitized_text("filename", &attachment.filename, 1, MAX_FILENAME_LENGTH)?;
        let file_url = attachment.file_url.trim().to_string();
        if file_url.is_empty() || file_url.len() > MAX_FILE_URL_LENGTH {
            return Err(TrackerError::Validation(format!(
                "file url must be between 1 and {MAX_FILE_URL_LENGTH} bytes"
            )));
        }
        if attachment.file_size.is_some_and(|size| size < 0) {
            return Err(TrackerError::Validation("file size cannot be negative".into()));
        }
        let clean = NewAttachment {
            filename,
            file_url,
            ..attachment
        };
        let record = self.db.write("add_attachment", |tx| {
            let now = codec::now();
            rows::require_live(tx, bug_id)?;
            let record = entities::insert_attachment(tx, bug_id, &clean, &now)?;
            rows::touch(tx, bug_id, &now)?;
            Ok(record)
        })?;
        self.cache.invalidate_bug(bug_id);
        info!("attached '{}' to bug {}", record.filename, bug_id);
        Ok(record)
    }

    // ── lifecycle ──────────────────────────────────────────────────────

    /// Flip `user_id`'s vote on a live bug. The returned count is read from
    /// the vote rows inside the committing transaction.
    pub fn toggle_vote(&self, bug_id: Uuid, user_id: Uuid) -> TrackerResult<VoteOutcome> {
        let outcome = self.db.write("toggle_vote", |tx| {
            votes::toggle(tx, bug_id, user_id, &codec::now())
        })?;
        self.cache.invalidate_bug(bug_id);
        info!(
            "vote on bug {} by {}: voted={} count={}",
            bug_id, user_id, outcome.voted, outcome.vote_count
        );
        Ok(outcome)
    }

    /// `is_company_response` is decided by the caller and stored as given.
    pub fn add_comment(
        &self,
        bug_id: Uuid,
        user_id: Uuid,
        content: &str,
        is_company_response: bool,
    ) -> TrackerResult<Comment> {
        let content = validation::comment_content(content)?;
        let comment = self.db.write("add_comment", |tx| {
            comments::add(tx, bug_id, user_id, content, is_company_response, &codec::now())
        })?;
        self.cache.invalidate_bug(bug_id);
        info!("comment {} added to bug {}", comment.id, bug_id);
        Ok(comment)
    }

    pub fn set_status(&self, bug_id: Uuid, new_status: &str, actor: &Actor) -> TrackerResult<BugReport> {
        let next: BugStatus = new_status.parse()?;
        let bug = self.db.write("set_status", |tx| {
            status::set_status(tx, bug_id, next, actor, &codec::now())
        })?;
        self.cache.invalidate_bug(bug_id);
        info!("bug {} status set to {} by {}", bug_id, next, actor.user_id);
        Ok(bug)
    }

    pub fn flag(&self, bug_id: Uuid, reason: &str, actor: &Actor) -> TrackerResult<BugReport> {
        let reason = validation::reason(reason)?;
        let bug = self.db.write("flag", |tx| {
            flags::flag(tx, bug_id, &reason, actor, &codec::now())
        })?;
        self.cache.invalidate_bug(bug_id);
        info!("bug {} flagged by {}", bug_id, actor.user_id);
        Ok(bug)
    }

    pub fn clear_flag(&self, bug_id: Uuid, actor: &Actor) -> TrackerResult<BugReport> {
        let bug = self.db.write("clear_flag", |tx| {
            flags::clear_flag(tx, bug_id, actor, &codec::now())
        })?;
        self.cache.invalidate_bug(bug_id);
        info!("bug {} flag cleared by {}", bug_id, actor.user_id);
        Ok(bug)
    }

    pub fn remove(&self, bug_id: Uuid, reason: &str, actor: &Actor) -> TrackerResult<()> {
        let reason = validation::reason(reason)?;
        self.db.write("remove", |tx| {
            soft_delete::remove(tx, bug_id, &reason, actor, &codec::now())
        })?;
        self.cache.invalidate_bug(bug_id);
        info!("bug {} removed by {}", bug_id, actor.user_id);
        Ok(())
    }

    pub fn restore(&self, bug_id: Uuid, actor: &Actor) -> TrackerResult<()> {
        self.db.write("restore", |tx| {
            soft_delete::restore(tx, bug_id, actor, &codec::now())
        })?;
        self.cache.invalidate_bug(bug_id);
        info!("bug {} restored by {}", bug_id, actor.user_id);
        Ok(())
    }

    /// Merge `source_id` into `target_id` in one transaction.
    pub fn merge(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        reason: &str,
        actor: &Actor,
    ) -> TrackerResult<MergeReport> {
        let reason = validation::reason(reason)?;
        let report = self.db.write("merge", |tx| {
            merge::merge(tx, source_id, target_id, &reason, actor, &codec::now())
        })?;
        self.cache.invalidate_bug(source_id);
        self.cache.invalidate_bug(target_id);
        info!(
            "merged bug {} into {}: {} votes moved, {} dropped, {} comments, {} attachments",
            source_id,
            target_id,
            report.votes_moved,
            report.votes_dropped,
            report.comments_moved,
            report.attachments_moved
        );
        Ok(report)
    }

    // ── reads ──────────────────────────────────────────────────────────

    /// Public listing. First pages without a search term are cached.
    pub fn list(
        &self,
        filter: &BugFilter,
        sort: SortMode,
        page: PageRequest,
    ) -> TrackerResult<Page<BugReport>> {
        let page = normalize_page(page, DEFAULT_PAGE_SIZE);
        let key = if self.cache.is_enabled() {
            cache::listing_key(filter, sort, page)?
        } else {
            None
        };
        if let Some(hit) = key.as_deref().and_then(|k| self.cache.get_listing(k)) {
            return Ok(hit);
        }

        let ticket = self.cache.ticket();
        let result = self.db.read(|conn| {
            listing::list_public(conn, filter, sort, page, &codec::now())
        })?;
        if let Some(key) = key {
            self.cache.put_listing(ticket, key, &result);
        }
        Ok(result)
    }

    pub fn list_for_moderation(
        &self,
        filter: &ModerationFilter,
        page: PageRequest,
    ) -> TrackerResult<Page<ModerationItem>> {
        self.db.read(|conn| listing::list_for_moderation(conn, filter, page))
    }

    /// A live bug; removed bugs are `NotFound`.
    pub fn get_by_id(&self, bug_id: Uuid) -> TrackerResult<BugReport> {
        if let Some(hit) = self.cache.get_bug(bug_id) {
            return Ok(hit);
        }
        let ticket = self.cache.ticket();
        let bug = self.db.read(|conn| rows::load_live_bug(conn, bug_id))?;
        self.cache.put_bug(ticket, &bug);
        Ok(bug)
    }

    /// Any bug that exists, removed or not. Never cached.
    pub fn get_including_removed(&self, bug_id: Uuid) -> TrackerResult<BugReport> {
        self.db.read(|conn| rows::load_bug(conn, bug_id))
    }

    fn read_for_bug<T, F>(&self, bug_id: Uuid, f: F) -> TrackerResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> TrackerResult<T>,
    {
        self.db.read(|conn| {
            if rows::find_bug(conn, bug_id)?.is_none() {
                return Err(TrackerError::bug_not_found(bug_id));
            }
            f(conn)
        })
    }

    pub fn comments(&self, bug_id: Uuid) -> TrackerResult<Vec<Comment>> {
        self.read_for_bug(bug_id, |conn| comments::list(conn, bug_id))
    }

    pub fn attachments(&self, bug_id: Uuid) -> TrackerResult<Vec<Attachment>> {
        self.read_for_bug(bug_id, |conn| entities::list_attachments(conn, bug_id))
    }

    pub fn votes(&self, bug_id: Uuid) -> TrackerResult<Vec<Vote>> {
        self.read_for_bug(bug_id, |conn| votes::list(conn, bug_id))
    }

    pub fn has_voted(&self, bug_id: Uuid, user_id: Uuid) -> TrackerResult<bool> {
        self.read_for_bug(bug_id, |conn| votes::has_voted(conn, bug_id, user_id))
    }

    pub fn audit_log(&self, filter: &AuditFilter, page: PageRequest) -> TrackerResult<Page<AuditLogEntry>> {
        self.db.read(|conn| audit::list(conn, filter, page))
    }

    /// Audit entries about one bug, oldest first.
    pub fn audit_history(&self, bug_id: Uuid) -> TrackerResult<Vec<AuditLogEntry>> {
        self.db.read(|conn| audit::for_bug(conn, bug_id))
    }

    pub fn dashboard(&self) -> TrackerResult<DashboardStats> {
        self.db.read(listing::dashboard)
    }

    // ── maintenance ────────────────────────────────────────────────────

    /// Re-derive one bug's counters from its rows.
    pub fn reconcile_counts(&self, bug_id: Uuid) -> TrackerResult<Option<CountDrift>> {
        let drift = self.db.write("reconcile_counts", |tx| {
            rows::load_bug(tx, bug_id)?;
            counters::reconcile(tx, bug_id)
        })?;
        if let Some(d) = &drift {
            warn!(
                "repaired counters of bug {}: votes {} -> {}, comments {} -> {}",
                bug_id,
                d.stored.vote_count,
                d.derived.vote_count,
                d.stored.comment_count,
                d.derived.comment_count
            );
            self.cache.invalidate_bug(bug_id);
        }
        Ok(drift)
    }

    /// Re-derive the counters of every bug and report what was repaired.
    pub fn reconcile_all(&self) -> TrackerResult<Vec<CountDrift>> {
        let repaired = self.db.write("reconcile_all", |tx| counters::reconcile_all(tx))?;
        if !repaired.is_empty() {
            warn!("repaired counters of {} bug(s)", repaired.len());
            self.cache.clear();
        }
        Ok(repaired)
    }
}
