//! Sanitization and length checks for user-supplied text.
//!
//! Everything here runs before a transaction is opened, so a rejected input
//! never touches the store.

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{TrackerError, TrackerResult};

pub const MAX_COMMENT_LENGTH: usize = 2000;
pub const MAX_REASON_LENGTH: usize = 500;
pub const MIN_TITLE_LENGTH: usize = 5;
pub const MAX_TITLE_LENGTH: usize = 255;
pub const MIN_DESCRIPTION_LENGTH: usize = 10;
pub const MAX_APPLICATION_NAME_LENGTH: usize = 255;
pub const MAX_TAG_LENGTH: usize = 50;
pub const MAX_TAGS: usize = 10;

/// Letters, digits, space, hyphen and underscore.
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\p{L}\p{N} _-]+$").unwrap());

const SUSPICIOUS_PATTERNS: &[&str] = &[
    "<script",
    "</script",
    "javascript:",
    "data:",
    "vbscript:",
    "onload=",
    "onerror=",
    "onclick=",
    "onmouseover=",
];

/// Strip NUL and control characters (except newline and tab), HTML-escape,
/// and trim.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\0' => {}
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            '\n' | '\t' => out.push(ch),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out.trim().to_string()
}

/// Sanitize `input` and require its length (in characters) to fall within
/// `[min, max]`. `field` names the input in the error message.
pub fn sanitized_text(field: &str, input: &str, min: usize, max: usize) -> TrackerResult<String> {
    // Patterns are checked on the raw text; escaping would hide `<script`.
    let lowered = input.to_lowercase();
    if let Some(pattern) = SUSPICIOUS_PATTERNS.iter().find(|p| lowered.contains(*p)) {
        return Err(TrackerError::Validation(format!(
            "{field} contains a disallowed pattern '{pattern}'"
        )));
    }
    let sanitized = sanitize(input);
    let len = sanitized.chars().count();
    if len < min || len > max {
        return Err(TrackerError::Validation(format!(
            "{field} must be between {min} and {max} characters, got {len}"
        )));
    }
    Ok(sanitized)
}

pub fn comment_content(input: &str) -> TrackerResult<String> {
    sanitized_text("comment", input, 1, MAX_COMMENT_LENGTH)
}

pub fn reason(input: &str) -> TrackerResult<String> {
    sanitized_text("reason", input, 1, MAX_REASON_LENGTH)
}

pub fn title(input: &str) -> TrackerResult<String> {
    sanitized_text("title", input, MIN_TITLE_LENGTH, MAX_TITLE_LENGTH)
}

pub fn description(input: &str) -> TrackerResult<String> {
    sanitized_text("description", input, MIN_DESCRIPTION_LENGTH, usize::MAX)
}

pub fn application_name(input: &str) -> TrackerResult<String> {
    sanitized_text("application name", input, 1, MAX_APPLICATION_NAME_LENGTH)
}

/// Normalize a tag list: sanitized, lowercased, deduplicated, order kept.
pub fn tags(input: &[String]) -> TrackerResult<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for raw in input {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !TAG_RE.is_match(trimmed) {
            return Err(TrackerError::Validation(format!(
                "tag '{trimmed}' may only contain letters, digits, spaces, '-' and '_'"
            )));
        }
        let tag = sanitized_text("tag", raw, 1, MAX_TAG_LENGTH)?.to_lowercase();
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    if out.len() > MAX_TAGS {
        return Err(TrackerError::Validation(format!(
            "at most {MAX_TAGS} tags are allowed, got {}",
            out.len()
        )));
    }
    Ok(out)
}
