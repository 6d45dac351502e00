//! Text encodings for identifiers and timestamps stored in SQLite.
//!
//! Timestamps are fixed-width RFC 3339 strings with microsecond precision and
//! a `Z` suffix, so lexicographic order in SQL equals chronological order.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use uuid::Uuid;

/// Current time truncated to what the store can represent.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn opt_ts(value: Option<&DateTime<Utc>>) -> Option<String> {
    value.map(ts)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

pub fn id(value: &Uuid) -> String {
    value.hyphenated().to_string()
}

pub fn opt_id(value: Option<&Uuid>) -> Option<String> {
    value.map(id)
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Read a TEXT column holding a UUID.
pub fn col_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

pub fn col_opt_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|v| Uuid::parse_str(&v).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

/// Read a TEXT column holding a timestamp written by [`ts`].
pub fn col_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| conversion_error(idx, e))
}

pub fn col_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|v| parse_ts(&v).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

/// Read a TEXT column holding a value with a `FromStr` impl (status, priority).
pub fn col_parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion_error(idx, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn timestamps_are_fixed_width_and_sortable() {
        let a = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let b = a + Duration::microseconds(1);
        assert_eq!(ts(&a), "2026-01-02T03:04:05.000000Z");
        assert_eq!(ts(&a).len(), ts(&b).len());
        assert!(ts(&a) < ts(&b));
    }

    #[test]
    fn now_round_trips_exactly() {
        let t = now();
        assert_eq!(parse_ts(&ts(&t)).unwrap(), t);
    }
}
