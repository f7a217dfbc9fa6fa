//! Structural heuristics for statements that passed the allow-list.
//!
//! These are not a SQL parser. A handful of pattern checks run over the
//! token stream, looking for constructs PostgreSQL is known to reject
//! (set-returning calls in filters) and for cheap sanity failures
//! (unbalanced parentheses, WHERE without FROM).

use sqlparser::tokenizer::Token;

use super::lexer::{bare_word, is_word, SqlTokens};
use super::{RejectionKind, ValidationVerdict};

/// Set-returning functions that PostgreSQL refuses inside WHERE/HAVING.
pub const SET_RETURNING_FUNCTIONS: [&str; 15] = [
    "generate_series",
    "generate_subscripts",
    "unnest",
    "regexp_matches",
    "regexp_split_to_table",
    "json_array_elements",
    "json_array_elements_text",
    "jsonb_array_elements",
    "jsonb_array_elements_text",
    "json_each",
    "json_each_text",
    "jsonb_each",
    "jsonb_each_text",
    "json_object_keys",
    "jsonb_object_keys",
];

/// Words that end a WHERE/HAVING clause at the outermost nesting level.
const CLAUSE_TERMINATORS: [&str; 12] = [
    "GROUP",
    "ORDER",
    "LIMIT",
    "OFFSET",
    "HAVING",
    "WINDOW",
    "UNION",
    "INTERSECT",
    "EXCEPT",
    "FETCH",
    "FOR",
    "RETURNING",
];

/// Returns the index just past the parenthesis matching the one at `open`.
fn skip_group(tokens: &[Token], open: usize) -> usize {
    let mut depth = 0usize;
    let mut i = open;
    while i < tokens.len() {
        match tokens[i] {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    tokens.len()
}

/// Looks for a set-returning call directly inside a WHERE or HAVING clause.
///
/// Parenthesized subqueries inside the filter are skipped; a set-returning
/// call there is legal and is exactly the rewrite we suggest.
fn find_set_returning_in_filter(tokens: &[Token]) -> Option<(String, String)> {
    for (start, token) in tokens.iter().enumerate() {
        let clause = match bare_word(token) {
            Some(w) if w == "WHERE" || w == "HAVING" => w,
            _ => continue,
        };

        let mut depth = 0usize;
        let mut i = start + 1;
        while i < tokens.len() {
            match &tokens[i] {
                Token::LParen => {
                    if is_word(tokens.get(i + 1), &["SELECT", "WITH"]) {
                        i = skip_group(tokens, i);
                        continue;
                    }
                    depth += 1;
                }
                Token::RParen => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                Token::SemiColon => break,
                token => {
                    if let Some(word) = bare_word(token) {
                        if depth == 0 && CLAUSE_TERMINATORS.contains(&word.as_str()) {
                            break;
                        }
                        let lower = word.to_lowercase();
                        if SET_RETURNING_FUNCTIONS.contains(&lower.as_str())
                            && tokens.get(i + 1) == Some(&Token::LParen)
                        {
                            return Some((lower, clause));
                        }
                    }
                }
            }
            i += 1;
        }
    }
    None
}

/// Runs the structural checks over raw SQL text.
pub fn check_structure(sql: &str) -> ValidationVerdict {
    let lexed = match SqlTokens::tokenize(sql) {
        Ok(lexed) => lexed,
        Err(e) => return ValidationVerdict::malformed(e.to_string()),
    };
    let tokens = lexed.as_slice();

    if let Some((function, clause)) = find_set_returning_in_filter(tokens) {
        return ValidationVerdict::rejected(
            RejectionKind::SetReturningInFilter {
                function: function.clone(),
                clause: clause.clone(),
            },
            format!(
                "{function}() is a set-returning function and PostgreSQL does not allow it in {clause}"
            ),
            format!(
                "Move {function}() into a CTE or a FROM-clause subquery and filter on its output column, \
                 e.g. WITH months AS (SELECT {function}(...) AS value) SELECT ... FROM months WHERE value ..."
            ),
        );
    }

    let open = lexed.count(&Token::LParen);
    let close = lexed.count(&Token::RParen);
    if open != close {
        let verdict = ValidationVerdict::rejected(
            RejectionKind::UnbalancedParentheses { open, close },
            format!("Unbalanced parentheses: {open} opening, {close} closing"),
            "Check that every opening parenthesis has a matching closing one",
        );
        // No correction when the text ends in a comment.
        if open > close && !lexed.ends_with_comment() {
            let trimmed = sql.trim_end().trim_end_matches(';').trim_end();
            return verdict.with_correction(format!("{trimmed}{}", ")".repeat(open - close)));
        }
        return verdict;
    }

    if !lexed.words().any(|w| w == "SELECT") {
        return ValidationVerdict::rejected(
            RejectionKind::MissingSelect,
            "The statement has no SELECT",
            "Write a SELECT query that returns the requested data",
        );
    }

    let has_where = lexed.words().any(|w| w == "WHERE");
    let has_from = lexed.words().any(|w| w == "FROM");
    if has_where && !has_from {
        return ValidationVerdict::rejected(
            RejectionKind::MissingFrom,
            "The statement has a WHERE clause but no FROM clause",
            "Add the FROM clause naming the table being filtered",
        );
    }

    ValidationVerdict::accepted()
}
