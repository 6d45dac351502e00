//! Free-text search over title, description and application name.
//!
//! With FTS5 the search term becomes a match expression ranked by `bm25`;
//! without it a weighted `LIKE` score stands in.

use std::sync::LazyLock;

use regex::Regex;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\p{L}\p{N}_]+").unwrap());

/// Column weights for `bm25(bug_fts, ...)`; `bug_id` is unindexed.
pub const BM25_RANK: &str = "bm25(bug_fts, 0.0, 3.0, 2.0, 1.0)";

/// Lowercased word tokens in input order, without duplicates.
pub fn tokens(value: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for m in TOKEN_RE.find_iter(value) {
        let token = m.as_str().to_lowercase();
        if !out.contains(&token) {
            out.push(token);
        }
    }
    out
}

/// How a search term is applied to a listing query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchPlan {
    /// FTS5 match expression; every token must appear.
    Fts(String),
    /// `LIKE` pattern with `%`, `_` and `\` escaped.
    Like(String),
}

impl SearchPlan {
    /// FTS is used when the table exists and the term has word tokens.
    pub fn for_term(term: &str, fts_available: bool) -> Self {
        let toks = tokens(term);
        if fts_available && !toks.is_empty() {
            SearchPlan::Fts(fts_match_expression(&toks))
        } else {
            SearchPlan::Like(like_pattern(term))
        }
    }
}

/// Quote every token so FTS5 operators in user input stay literal. Adjacent
/// quoted strings are combined with implicit AND.
pub fn fts_match_expression(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

/// Relevance score for the `LIKE` fallback, higher is better. `param` is the
/// placeholder bound to the pattern, e.g. `?3`.
pub fn like_score_sql(param: &str) -> String {
    format!(
        "((CASE WHEN b.title LIKE {param} ESCAPE '\\' THEN 3 ELSE 0 END) + \
          (CASE WHEN b.description LIKE {param} ESCAPE '\\' THEN 2 ELSE 0 END) + \
          (CASE WHEN a.name LIKE {param} ESCAPE '\\' THEN 1 ELSE 0 END))"
    )
}

pub fn like_filter_sql(param: &str) -> String {
    format!(
        "(b.title LIKE {param} ESCAPE '\\' OR b.description LIKE {param} ESCAPE '\\' \
          OR a.name LIKE {param} ESCAPE '\\')"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_deduplicated_and_lowercased() {
        assert_eq!(tokens("Crash crash on LOGIN!"), vec!["crash", "on", "login"]);
        assert!(tokens("!!! ---").is_empty());
        assert_eq!(tokens("café über"), vec!["café", "über"]);
    }

    #[test]
    fn operators_are_quoted() {
        let plan = SearchPlan::for_term("login OR NEAR(x)", true);
        assert_eq!(
            plan,
            SearchPlan::Fts("\"login\" \"or\" \"near\" \"x\"".to_string())
        );
    }

    #[test]
    fn falls_back_to_like() {
        assert_eq!(
            SearchPlan::for_term("100%_done", false),
            SearchPlan::Like("%100\\%\\_done%".to_string())
        );
        assert_eq!(
            SearchPlan::for_term("???", true),
            SearchPlan::Like("%???%".to_string())
        );
    }
}
