//! SQL anonymization (spec §4.10): strips literal values out of captured
//! query text before it ever leaves the process, and derives a stable
//! fingerprint from the normalized shape so the same query always maps to
//! the same series regardless of which literals happened to appear.
//!
//! Generalizes the length-bounded truncation a naive `pg_stat_statements`
//! reader would do into a full literal-scrubbing normalizer.

use crate::model::fingerprint::sql_fingerprint;
use once_cell::sync::Lazy;
use regex::Regex;

const MAX_QUERY_LEN: usize = 4096;

static STRING_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"'(?:[^'\\]|\\.|'')*'").unwrap_or_else(|_| unreachable!("static regex"))
});
static UUID_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
        .unwrap_or_else(|_| unreachable!("static regex"))
});
static HEX_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b0x[0-9a-fA-F]+\b").unwrap_or_else(|_| unreachable!("static regex")));
static IP_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").unwrap_or_else(|_| unreachable!("static regex"))
});
static EMAIL_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[\w.+-]+@[\w-]+\.[\w.-]+\b").unwrap_or_else(|_| unreachable!("static regex"))
});
static DATE_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{4}-\d{2}-\d{2}(?:[ T]\d{2}:\d{2}:\d{2}(?:\.\d+)?)?\b")
        .unwrap_or_else(|_| unreachable!("static regex"))
});
static BOOLEAN_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:true|false)\b").unwrap_or_else(|_| unreachable!("static regex"))
});
static NUMBER_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d+(\.\d+)?\b").unwrap_or_else(|_| unreachable!("static regex")));
static IN_LIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bIN\s*\(\s*\?(?:\s*,\s*\?)*\s*\)").unwrap_or_else(|_| unreachable!("static regex"))
});
static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").unwrap_or_else(|_| unreachable!("static regex")));

/// Normalized SQL text plus a stable fingerprint of its shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnonymizedQuery {
    pub text: String,
    pub fingerprint: u64,
}

/// Replace every literal value in `sql` with `?`, normalize whitespace, and
/// truncate. Idempotent: running this on its own output is a no-op (spec §8).
#[must_use]
pub fn anonymize_sql(sql: &str) -> AnonymizedQuery {
    let mut text = sql.to_string();
    text = UUID_LITERAL.replace_all(&text, "?").into_owned();
    text = IP_LITERAL.replace_all(&text, "?").into_owned();
    text = EMAIL_LITERAL.replace_all(&text, "?").into_owned();
    text = HEX_LITERAL.replace_all(&text, "?").into_owned();
    text = DATE_LITERAL.replace_all(&text, "?").into_owned();
    text = STRING_LITERAL.replace_all(&text, "?").into_owned();
    text = BOOLEAN_LITERAL.replace_all(&text, "?").into_owned();
    text = NUMBER_LITERAL.replace_all(&text, "?").into_owned();
    text = IN_LIST.replace_all(&text, "IN (?)").into_owned();
    text = WHITESPACE.replace_all(text.trim(), " ").into_owned();

    if text.len() > MAX_QUERY_LEN {
        text.truncate(MAX_QUERY_LEN);
    }

    let fingerprint = sql_fingerprint(&text);
    AnonymizedQuery { text, fingerprint }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrubs_string_and_numeric_literals() {
        let out = anonymize_sql("SELECT * FROM users WHERE id = 42 AND name = 'alice'");
        assert_eq!(out.text, "SELECT * FROM users WHERE id = ? AND name = ?");
    }

    #[test]
    fn scrubs_in_lists() {
        let out = anonymize_sql("SELECT * FROM t WHERE id IN (1, 2, 3)");
        assert_eq!(out.text, "SELECT * FROM t WHERE id IN (?)");
    }

    #[test]
    fn scrubs_uuids_and_emails() {
        let out = anonymize_sql(
            "SELECT * FROM sessions WHERE id = '550e8400-e29b-41d4-a716-446655440000' \
             OR email = 'user@example.com'",
        );
        assert!(!out.text.contains("550e8400"));
        assert!(!out.text.contains("user@example.com"));
    }

    #[test]
    fn scrubs_booleans_and_unquoted_dates() {
        let out = anonymize_sql("SELECT * FROM users WHERE is_deleted = true AND created_at > 2024-01-01");
        assert_eq!(out.text, "SELECT * FROM users WHERE is_deleted = ? AND created_at > ?");
    }

    #[test]
    fn scrubs_uppercase_boolean_keywords() {
        let out = anonymize_sql("SELECT * FROM flags WHERE enabled = FALSE");
        assert_eq!(out.text, "SELECT * FROM flags WHERE enabled = ?");
    }

    #[test]
    fn is_idempotent() {
        let once = anonymize_sql("SELECT * FROM t WHERE x = 1 AND y = 'z'");
        let twice = anonymize_sql(&once.text);
        assert_eq!(once, twice);
    }

    #[test]
    fn same_shape_same_fingerprint() {
        let a = anonymize_sql("SELECT * FROM t WHERE id = 1");
        let b = anonymize_sql("SELECT * FROM t WHERE id = 999999");
        assert_eq!(a.fingerprint, b.fingerprint);
    }
}
