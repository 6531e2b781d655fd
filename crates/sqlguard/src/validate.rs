//! Allow-list grammars and the dangerous-token denylist.
//!
//! Every function here is pure: it classifies an untrusted fragment as accepted
//! (`Ok(())`) or returns the [`ValidationError`] describing the rejection.
//! Checks run cheapest first: emptiness, length, denylist, then grammar.

use crate::error::ValidationError;
use std::sync::OnceLock;

/// Maximum length of a table or column identifier.
pub const MAX_IDENTIFIER_LEN: usize = 64;
/// Maximum length of an ORDER BY clause.
pub const MAX_ORDER_BY_LEN: usize = 256;
/// Maximum length of a JOIN clause.
pub const MAX_JOIN_CLAUSE_LEN: usize = 512;
/// Maximum length of a WHERE/HAVING fragment.
pub const MAX_WHERE_CLAUSE_LEN: usize = 1024;

/// Tokens matched anywhere in the input.
const PUNCTUATION_TOKENS: &[&str] = &["--", "/*", "*/", ";"];

/// Keywords matched as whole words.
const KEYWORD_TOKENS: &[&str] = &[
    "UNION",
    "DELETE",
    "DROP",
    "INSERT",
    "UPDATE",
    "EXEC",
    "EXECUTE",
    "DECLARE",
    "SELECT",
    "CREATE",
    "ALTER",
    "TRUNCATE",
    "INFORMATION_SCHEMA",
];

/// Metadata namespaces matched at the start of a word.
const PREFIX_TOKENS: &[&str] = &["SYS.", "MYSQL.", "PG_"];

const ALLOWED_OPERATORS: &[&str] = &[
    "=",
    "!=",
    "<>",
    "<",
    ">",
    "<=",
    ">=",
    "LIKE",
    "ILIKE",
    "NOT LIKE",
    "NOT ILIKE",
    "IN",
    "NOT IN",
    "IS",
    "IS NOT",
    "BETWEEN",
    "NOT BETWEEN",
    "AND",
    "OR",
    "NOT",
];

fn identifier_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("invalid built-in identifier regex")
    })
}

fn column_name_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z0-9_]+$").expect("invalid built-in column name regex")
    })
}

fn order_by_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        const TERM: &str = r"[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?(?:\s+(?:ASC|DESC))?";
        regex::Regex::new(&format!(r"(?i)^{TERM}(?:\s*,\s*{TERM})*$"))
            .expect("invalid built-in order by regex")
    })
}

fn join_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(
            r"(?is)^(?:(?:INNER|LEFT|RIGHT|FULL\s+OUTER)\s+)?JOIN\s+[A-Za-z_][A-Za-z0-9_]*(?:\s+AS\s+[A-Za-z_][A-Za-z0-9_]*)?\s+ON\s+.+$",
        )
        .expect("invalid built-in join regex")
    })
}

#[inline]
fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Returns `true` if `upper` contains `token` with no identifier characters glued
/// to its start (and, unless `prefix_only`, to its end).
fn contains_word(upper: &str, token: &str, prefix_only: bool) -> bool {
    let bytes = upper.as_bytes();
    let mut from = 0;
    while let Some(pos) = upper[from..].find(token) {
        let start = from + pos;
        let end = start + token.len();
        // Digits before a keyword still count as a boundary: `1UNION` is two tokens to most parsers.
        let left_ok = start == 0 || !(bytes[start - 1].is_ascii_alphabetic() || bytes[start - 1] == b'_');
        let right_ok = prefix_only || end == bytes.len() || !is_word_byte(bytes[end]);
        if left_ok && right_ok {
            return true;
        }
        from = start + 1;
    }
    false
}

/// Returns `true` if `input` contains any denylisted token (case-insensitive).
pub fn contains_suspicious_pattern(input: &str) -> bool {
    let upper = input.to_ascii_uppercase();
    PUNCTUATION_TOKENS.iter().any(|t| upper.contains(t))
        || KEYWORD_TOKENS.iter().any(|t| contains_word(&upper, t, false))
        || PREFIX_TOKENS.iter().any(|t| contains_word(&upper, t, true))
}

fn check_denylist(input: &str) -> Result<(), ValidationError> {
    if contains_suspicious_pattern(input) {
        return Err(ValidationError::SuspiciousPattern(input.to_string()));
    }
    Ok(())
}

fn too_long(input: &str, max: usize) -> ValidationError {
    ValidationError::IdentifierTooLong {
        input: input.to_string(),
        len: input.len(),
        max,
    }
}

/// Accepts `^[A-Za-z_][A-Za-z0-9_]*$` up to [`MAX_IDENTIFIER_LEN`] bytes.
pub fn validate_identifier(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::InvalidIdentifier(String::new()));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(too_long(name, MAX_IDENTIFIER_LEN));
    }
    if !identifier_re().is_match(name) {
        return Err(ValidationError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Table names follow the identifier grammar.
pub fn validate_table_name(name: &str) -> Result<(), ValidationError> {
    validate_identifier(name)
}

/// Looser column check (`^[A-Za-z0-9_]+$`) used for field-map filtering.
pub fn validate_column_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::InvalidColumnName(String::new()));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(too_long(name, MAX_IDENTIFIER_LEN));
    }
    if !column_name_re().is_match(name) {
        return Err(ValidationError::InvalidColumnName(name.to_string()));
    }
    Ok(())
}

/// Validates a comma-separated list of `[table.]column [ASC|DESC]` terms.
///
/// Empty input is accepted as "no ordering".
pub fn validate_order_by(clause: &str) -> Result<(), ValidationError> {
    if clause.is_empty() {
        return Ok(());
    }
    if clause.len() > MAX_ORDER_BY_LEN {
        return Err(ValidationError::InvalidOrderBy(clause.to_string()));
    }
    check_denylist(clause)?;
    if !order_by_re().is_match(clause.trim()) {
        return Err(ValidationError::InvalidOrderBy(clause.to_string()));
    }
    Ok(())
}

/// Validates `[INNER|LEFT|RIGHT|FULL OUTER] JOIN table [AS alias] ON <condition>`.
///
/// The ON predicate is free text; only the denylist constrains it.
pub fn validate_join_clause(clause: &str) -> Result<(), ValidationError> {
    if clause.is_empty() {
        return Ok(());
    }
    if clause.len() > MAX_JOIN_CLAUSE_LEN {
        return Err(ValidationError::InvalidJoinClause(clause.to_string()));
    }
    check_denylist(clause)?;
    if !join_re().is_match(clause.trim()) {
        return Err(ValidationError::InvalidJoinClause(clause.to_string()));
    }
    Ok(())
}

/// Length and denylist check for a free-form predicate fragment.
pub fn validate_where_clause(clause: &str) -> Result<(), ValidationError> {
    if clause.len() > MAX_WHERE_CLAUSE_LEN {
        return Err(ValidationError::SuspiciousPattern(clause.to_string()));
    }
    check_denylist(clause)
}

/// Applies [`validate_where_clause`] to every HAVING clause.
///
/// Aggregate usage is not enforced.
pub fn validate_having_clauses<S: AsRef<str>>(clauses: &[S]) -> Result<(), ValidationError> {
    clauses
        .iter()
        .try_for_each(|c| validate_where_clause(c.as_ref()))
}

/// Case-insensitive exact match against the comparison/logical operator allow-list.
pub fn validate_sql_operator(op: &str) -> Result<(), ValidationError> {
    let normalized = op
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase();
    if ALLOWED_OPERATORS.contains(&normalized.as_str()) {
        Ok(())
    } else {
        Err(ValidationError::SuspiciousPattern(op.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_grammar() {
        for ok in ["id", "_x", "User_1", "a".repeat(64).as_str()] {
            assert!(validate_identifier(ok).is_ok(), "{ok}");
        }
        for bad in ["", "1abc", "a-b", "a b", "a.b", "x;"] {
            assert!(
                matches!(
                    validate_identifier(bad),
                    Err(ValidationError::InvalidIdentifier(_))
                ),
                "{bad}"
            );
        }
        assert!(matches!(
            validate_identifier(&"a".repeat(65)),
            Err(ValidationError::IdentifierTooLong { len: 65, max: 64, .. })
        ));
    }

    #[test]
    fn column_name_allows_leading_digit() {
        assert!(validate_column_name("1st_place").is_ok());
        assert!(validate_column_name("first-place").is_err());
        assert!(validate_column_name("").is_err());
    }

    #[test]
    fn order_by_accepts_terms() {
        for ok in [
            "",
            "name",
            "name ASC",
            "created_at DESC",
            "users.name desc, id",
            "a ASC,b DESC ,  c",
        ] {
            assert!(validate_order_by(ok).is_ok(), "{ok}");
        }
    }

    #[test]
    fn order_by_rejects_malformed() {
        for bad in ["name ASCENDING", "1name", "name, ", "a.b.c", "name DESC NULLS FIRST"] {
            assert!(
                matches!(validate_order_by(bad), Err(ValidationError::InvalidOrderBy(_))),
                "{bad}"
            );
        }
        assert!(matches!(
            validate_order_by(&"a".repeat(257)),
            Err(ValidationError::InvalidOrderBy(_))
        ));
    }

    #[test]
    fn order_by_denylist_wins_over_grammar() {
        assert!(matches!(
            validate_order_by("name ASC; DROP TABLE users"),
            Err(ValidationError::SuspiciousPattern(_))
        ));
        assert!(matches!(
            validate_order_by("name; DROP TABLE users; --"),
            Err(ValidationError::SuspiciousPattern(_))
        ));
        // grammatically a column name, still a keyword
        assert!(matches!(
            validate_order_by("select"),
            Err(ValidationError::SuspiciousPattern(_))
        ));
    }

    #[test]
    fn denylist_respects_word_boundaries() {
        assert!(!contains_suspicious_pattern("created_at"));
        assert!(!contains_suspicious_pattern("updated_at DESC"));
        assert!(!contains_suspicious_pattern("last_selected"));
        assert!(contains_suspicious_pattern("x UNION y"));
        assert!(contains_suspicious_pattern("1UNION SELECT 1"));
        assert!(contains_suspicious_pattern("id = (select 1)"));
        assert!(contains_suspicious_pattern("pg_catalog.pg_tables"));
        assert!(contains_suspicious_pattern("information_schema.tables"));
        assert!(contains_suspicious_pattern("sys.objects"));
        assert!(contains_suspicious_pattern("a/**/b"));
        assert!(!contains_suspicious_pattern("my_pg_stats"));
    }

    #[test]
    fn join_grammar() {
        for ok in [
            "JOIN orders ON orders.user_id = users.id",
            "LEFT JOIN orders AS o ON o.user_id = users.id",
            "left join orders on orders.user_id = users.id",
            "FULL OUTER JOIN t ON t.a = ?",
            "",
        ] {
            assert!(validate_join_clause(ok).is_ok(), "{ok}");
        }
        for bad in [
            "CROSS JOIN orders",
            "JOIN orders",
            "LEFT JOIN orders o ON o.id = 1",
            "JOIN 1orders ON x",
        ] {
            assert!(
                matches!(
                    validate_join_clause(bad),
                    Err(ValidationError::InvalidJoinClause(_))
                ),
                "{bad}"
            );
        }
        assert!(matches!(
            validate_join_clause("JOIN t ON t.a = 1; DROP TABLE t"),
            Err(ValidationError::SuspiciousPattern(_))
        ));
    }

    #[test]
    fn having_is_permissive_but_denylisted() {
        assert!(validate_having_clauses(&["COUNT(*) > ?", "status = 'x'"]).is_ok());
        assert!(validate_having_clauses::<&str>(&[]).is_ok());
        assert!(matches!(
            validate_having_clauses(&["COUNT(*) > 1", "1=1 UNION SELECT password FROM users"]),
            Err(ValidationError::SuspiciousPattern(_))
        ));
        assert!(matches!(
            validate_having_clauses(&["x".repeat(1025)]),
            Err(ValidationError::SuspiciousPattern(_))
        ));
    }

    #[test]
    fn operator_allow_list() {
        for ok in ["=", "like", " NOT  ILIKE ", "is not", "<>", "between"] {
            assert!(validate_sql_operator(ok).is_ok(), "{ok}");
        }
        for bad in ["==", "; DROP", "LIKE LIKE", "", "REGEXP"] {
            assert!(
                matches!(
                    validate_sql_operator(bad),
                    Err(ValidationError::SuspiciousPattern(_))
                ),
                "{bad}"
            );
        }
    }
}
