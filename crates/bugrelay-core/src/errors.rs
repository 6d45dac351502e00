//! Error types for the bug-report lifecycle core.

use rusqlite::ErrorCode;
use uuid::Uuid;

/// Top-level error enum for the lifecycle and moderation engine.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("Bug report {0} is already removed")]
    AlreadyDeleted(Uuid),

    #[error("Bug report {0} is not removed")]
    NotDeleted(Uuid),

    #[error("Invalid merge: {0}")]
    InvalidMerge(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Lock contention or a constraint race. The transaction was rolled back
    /// and the call is safe to retry.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrackerError {
    pub fn bug_not_found(id: Uuid) -> Self {
        TrackerError::NotFound {
            resource: "bug report",
            id: id.to_string(),
        }
    }

    /// Whether the caller may retry the same call unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TrackerError::Conflict(_))
    }

    /// Status code the HTTP layer reports for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            TrackerError::Validation(_)
            | TrackerError::InvalidMerge(_)
            | TrackerError::AlreadyDeleted(_)
            | TrackerError::NotDeleted(_) => 400,
            TrackerError::NotFound { .. } => 404,
            TrackerError::Conflict(_) => 409,
            TrackerError::Sqlite(_) | TrackerError::Io(_) | TrackerError::Json(_) => 500,
        }
    }
}

impl From<rusqlite::Error> for TrackerError {
    fn from(err: rusqlite::Error) -> TrackerError {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::ConstraintViolation => TrackerError::Conflict(err.to_string()),
                _ => TrackerError::Sqlite(err),
            },
            _ => TrackerError::Sqlite(err),
        }
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_is_retryable_conflict() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        let mapped = TrackerError::from(err);
        assert!(mapped.is_retryable());
        assert_eq!(mapped.http_status(), 409);
    }

    #[test]
    fn constraint_violation_is_conflict() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        );
        assert!(matches!(TrackerError::from(err), TrackerError::Conflict(_)));
    }

    #[test]
    fn query_errors_are_not_retryable() {
        let mapped = TrackerError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(!mapped.is_retryable());
        assert_eq!(mapped.http_status(), 500);
    }

    #[test]
    fn taxonomy_maps_to_http_statuses() {
        let id = Uuid::new_v4();
        assert_eq!(TrackerError::bug_not_found(id).http_status(), 404);
        assert_eq!(TrackerError::AlreadyDeleted(id).http_status(), 400);
        assert_eq!(TrackerError::NotDeleted(id).http_status(), 400);
        assert_eq!(
            TrackerError::InvalidMerge("same bug".into()).http_status(),
            400
        );
        assert_eq!(TrackerError::Validation("empty".into()).http_status(), 400);
    }
}
