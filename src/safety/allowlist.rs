//! Security allow-list check.
//!
//! Only single read-only statements get through: the first token must be
//! SELECT or WITH, no data- or schema-modifying keyword may appear as an
//! unquoted word, and the text must not split into several statements.

use super::lexer::{bare_word, SqlTokens};
use super::{RejectionKind, ValidationVerdict};

/// Keywords that reject a statement wherever they appear as an unquoted word.
///
/// `REPLACE` also matches the `replace()` string function. Queries using it
/// are rejected as well; the model is told to avoid the word altogether.
pub const FORBIDDEN_KEYWORDS: [&str; 10] = [
    "DROP", "DELETE", "UPDATE", "INSERT", "TRUNCATE", "ALTER", "CREATE", "REPLACE", "GRANT",
    "REVOKE",
];

/// Runs the allow-list check on raw SQL text.
pub fn check_allowlist(sql: &str) -> ValidationVerdict {
    let tokens = match SqlTokens::tokenize(sql) {
        Ok(tokens) => tokens,
        Err(e) => return ValidationVerdict::malformed(e.to_string()),
    };

    if tokens.is_empty() {
        return ValidationVerdict::rejected(
            RejectionKind::Empty,
            "The SQL statement is empty",
            "Generate a single SELECT (or WITH ... SELECT) statement",
        );
    }

    let first_token = tokens
        .as_slice()
        .first()
        .map(|t| bare_word(t).unwrap_or_else(|| t.to_string()))
        .unwrap_or_default();
    if first_token != "SELECT" && first_token != "WITH" {
        return ValidationVerdict::rejected(
            RejectionKind::NotReadOnly {
                first_token: first_token.clone(),
            },
            format!("Only SELECT or WITH queries are allowed, statement starts with '{first_token}'"),
            "Rewrite the request as a read-only query starting with SELECT or WITH",
        );
    }

    if let Some(keyword) = tokens
        .words()
        .find(|word| FORBIDDEN_KEYWORDS.contains(&word.as_str()))
    {
        return ValidationVerdict::rejected(
            RejectionKind::ForbiddenKeyword {
                keyword: keyword.clone(),
            },
            format!("Forbidden keyword '{keyword}' found in the statement"),
            format!("Remove '{keyword}'; only read-only queries are permitted"),
        );
    }

    let statements = tokens.statement_count();
    if statements > 1 {
        return ValidationVerdict::rejected(
            RejectionKind::MultipleStatements { count: statements },
            format!("Found {statements} statements, only one is allowed"),
            "Combine the logic into one statement using CTEs or subqueries",
        );
    }

    ValidationVerdict::accepted()
}
