//! SQL safety gate.
//!
//! Accepts or rejects a candidate SQL string before it reaches the database.
//! Two ordered checks run over the text: a security allow-list check
//! (read-only, single statement, no forbidden keywords) and a structural
//! heuristic check (known dialect incompatibilities plus cheap sanity
//! checks). Both are pure functions of the SQL text and share one
//! tokenizer, so literals, quoted identifiers and comments are told apart
//! the same way in each.

mod allowlist;
mod heuristics;
mod lexer;

pub use allowlist::{check_allowlist, FORBIDDEN_KEYWORDS};
pub use heuristics::{check_structure, SET_RETURNING_FUNCTIONS};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which of the two gate stages produced a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStage {
    /// Security allow-list check.
    Security,
    /// Structural/compatibility heuristic check.
    Structure,
}

/// Reason a statement was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionKind {
    /// The text cannot be tokenized (unterminated literal, identifier or comment).
    Malformed { detail: String },
    /// Nothing left after stripping comments and whitespace.
    Empty,
    /// First token is neither SELECT nor WITH.
    NotReadOnly { first_token: String },
    /// A forbidden keyword appears as a standalone token.
    ForbiddenKeyword { keyword: String },
    /// More than one non-empty statement.
    MultipleStatements { count: usize },
    /// A set-returning function is called inside WHERE or HAVING.
    SetReturningInFilter { function: String, clause: String },
    /// Parentheses do not balance.
    UnbalancedParentheses { open: usize, close: usize },
    /// No SELECT keyword anywhere in the statement.
    MissingSelect,
    /// WHERE is present but FROM is not.
    MissingFrom,
}

impl RejectionKind {
    /// Returns the category tag recorded in the context log.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "malformed_sql",
            Self::Empty => "empty_statement",
            Self::NotReadOnly { .. } => "not_read_only",
            Self::ForbiddenKeyword { .. } => "forbidden_keyword",
            Self::MultipleStatements { .. } => "multiple_statements",
            Self::SetReturningInFilter { .. } => "set_returning_in_filter",
            Self::UnbalancedParentheses { .. } => "unbalanced_parentheses",
            Self::MissingSelect => "missing_select",
            Self::MissingFrom => "missing_from",
        }
    }

    /// Returns the gate stage responsible for this kind of rejection.
    pub fn stage(&self) -> GateStage {
        match self {
            Self::Malformed { .. }
            | Self::Empty
            | Self::NotReadOnly { .. }
            | Self::ForbiddenKeyword { .. }
            | Self::MultipleStatements { .. } => GateStage::Security,
            Self::SetReturningInFilter { .. }
            | Self::UnbalancedParentheses { .. }
            | Self::MissingSelect
            | Self::MissingFrom => GateStage::Structure,
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict produced by the gate for one candidate statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    /// Whether the statement may be executed.
    pub accepted: bool,
    /// Rejection reason, `None` when accepted.
    pub rejection: Option<RejectionKind>,
    /// Human-readable explanation.
    pub message: String,
    /// Remediation suggestion for the next generation attempt.
    pub suggestion: String,
    /// Best-effort corrected statement, when a mechanical fix exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_sql: Option<String>,
}

impl ValidationVerdict {
    /// Creates an accepting verdict.
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            rejection: None,
            message: String::new(),
            suggestion: String::new(),
            corrected_sql: None,
        }
    }

    /// Creates a rejecting verdict.
    pub fn rejected(
        kind: RejectionKind,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            accepted: false,
            rejection: Some(kind),
            message: message.into(),
            suggestion: suggestion.into(),
            corrected_sql: None,
        }
    }

    /// Creates a rejection for text the tokenizer could not read.
    pub fn malformed(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self::rejected(
            RejectionKind::Malformed {
                detail: detail.clone(),
            },
            format!("The SQL could not be tokenized: {detail}"),
            "Close every string literal, quoted identifier and block comment",
        )
    }

    /// Attaches a corrected statement to a rejecting verdict.
    pub fn with_correction(mut self, sql: impl Into<String>) -> Self {
        self.corrected_sql = Some(sql.into());
        self
    }

    /// Returns the category tag, or `"accepted"`.
    pub fn category(&self) -> &'static str {
        self.rejection
            .as_ref()
            .map(RejectionKind::as_str)
            .unwrap_or("accepted")
    }

    /// Builds the remediation text handed to the next generation call.
    pub fn feedback_for(&self, sql: &str) -> String {
        let mut feedback = format!(
            "Your SQL failed validation:\nSQL: {}\n\nReason: {}\nFix suggestion: {}\n",
            sql.trim(),
            self.message,
            self.suggestion
        );
        if let Some(corrected) = &self.corrected_sql {
            feedback.push_str(&format!("Possible correction: {corrected}\n"));
        }
        feedback.push_str("\nRe-check the SQL and generate a corrected statement.");
        feedback
    }
}

/// Runs both gate checks in order and returns the first rejection.
///
/// The structural check only runs when the allow-list check passes.
pub fn validate_sql(sql: &str) -> ValidationVerdict {
    let verdict = check_allowlist(sql);
    if !verdict.accepted {
        return verdict;
    }
    check_structure(sql)
}

/// Stateless gate handle, for callers that prefer an object.
#[derive(Debug, Default, Clone, Copy)]
pub struct SafetyGate;

impl SafetyGate {
    /// Creates a new gate.
    pub fn new() -> Self {
        Self
    }

    /// Validates a candidate statement.
    pub fn check(&self, sql: &str) -> ValidationVerdict {
        validate_sql(sql)
    }
}
