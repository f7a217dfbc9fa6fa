//! Execution error classifier.
//!
//! Maps a raw database error message (and the SQL that produced it) to a
//! structured diagnosis. The diagnosis is never shown to the end user; it
//! is folded into the feedback for the next generation attempt.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static RELATION_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)relation "([^"]+)" does not exist"#).expect("relation name pattern")
});

static COLUMN_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)column "([^"]+)"(?: of relation "[^"]+")? does not exist"#)
        .expect("column name pattern")
});

/// Category of an execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// A set-returning function was called in WHERE/HAVING.
    SetReturningInFilter,
    /// A table or view does not exist.
    MissingRelation,
    /// A column does not exist.
    MissingColumn,
    /// Generic syntax error.
    SyntaxError,
    /// A selected column is neither grouped nor aggregated.
    GroupingError,
    /// Anything else.
    Unclassified,
}

impl ErrorCategory {
    /// Returns the category tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SetReturningInFilter => "set_returning_in_filter",
            Self::MissingRelation => "missing_relation",
            Self::MissingColumn => "missing_column",
            Self::SyntaxError => "syntax_error",
            Self::GroupingError => "grouping_error",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured diagnosis of one execution failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDiagnosis {
    pub category: ErrorCategory,
    /// Relation or column name extracted from the message, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_name: Option<String>,
    pub diagnosis: String,
    pub root_cause: String,
    pub fix_strategy: String,
    /// Minimal corrective example, when a fixed rewrite pattern exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    pub next_step: String,
}

impl ErrorDiagnosis {
    /// Renders the diagnosis as feedback for the next generation call.
    pub fn feedback(&self, sql: &str, raw_error: &str) -> String {
        let mut text = format!(
            "The previous query failed.\nSQL: {}\nError: {}\n\nError type: {}\nDiagnosis: {}\nRoot cause: {}\nFix strategy: {}\n",
            sql.trim(),
            raw_error.trim(),
            self.category,
            self.diagnosis,
            self.root_cause,
            self.fix_strategy,
        );
        if let Some(example) = &self.example {
            text.push_str("Example:\n");
            text.push_str(example);
            text.push('\n');
        }
        text.push_str("Next step: ");
        text.push_str(&self.next_step);
        text
    }
}

const SET_RETURNING_EXAMPLE: &str = "\
-- wrong: set-returning call inside WHERE
SELECT e.employee_id FROM employees e
WHERE generate_series(e.hire_date, CURRENT_DATE, interval '1 month') IS NOT NULL;

-- right: produce the set in a named subquery, then filter on its column
WITH months AS (
    SELECT generate_series(DATE '2024-01-01', DATE '2024-12-01', interval '1 month')::date AS month
)
SELECT m.month, COUNT(e.employee_id)
FROM months m
LEFT JOIN employees e ON e.hire_date <= m.month
GROUP BY m.month;";

/// Classifies a raw execution error.
///
/// Checks run in a fixed order over the lower-cased message; the first
/// match wins.
pub fn classify_execution_error(sql: &str, raw_error: &str) -> ErrorDiagnosis {
    let lowered = raw_error.to_lowercase();

    if lowered.contains("set-returning functions are not allowed in where")
        || lowered.contains("set-returning functions are not allowed in having")
    {
        return ErrorDiagnosis {
            category: ErrorCategory::SetReturningInFilter,
            object_name: None,
            diagnosis: "A set-returning function such as generate_series() was used in a WHERE or HAVING clause".to_string(),
            root_cause: "PostgreSQL does not allow set-returning functions in filter clauses; they may only appear in the select list or in FROM".to_string(),
            fix_strategy: "Restructure via a named subquery: generate the set in a CTE or FROM-clause subquery and filter on its output column".to_string(),
            example: Some(SET_RETURNING_EXAMPLE.to_string()),
            next_step: "Rewrite the query so the set-returning call lives in a CTE, then join or filter against it".to_string(),
        };
    }

    // `column "x" of relation "y" does not exist` is a column problem.
    if lowered.contains("relation")
        && lowered.contains("does not exist")
        && !lowered.contains("of relation")
    {
        let name = RELATION_NAME
            .captures(raw_error)
            .map(|c| c[1].to_string());
        let named = name.as_deref().unwrap_or("the referenced table");
        return ErrorDiagnosis {
            category: ErrorCategory::MissingRelation,
            diagnosis: format!("Table or view \"{named}\" does not exist"),
            object_name: name,
            root_cause: "The query references a table name that is not in the schema".to_string(),
            fix_strategy: "Re-check the schema for the correct table name".to_string(),
            example: None,
            next_step: "Use only tables listed in the schema and regenerate the query".to_string(),
        };
    }

    if lowered.contains("column") && lowered.contains("does not exist") {
        let name = COLUMN_NAME.captures(raw_error).map(|c| c[1].to_string());
        let named = name.as_deref().unwrap_or("the referenced column");
        return ErrorDiagnosis {
            category: ErrorCategory::MissingColumn,
            diagnosis: format!("Column \"{named}\" does not exist"),
            object_name: name,
            root_cause: "The query references a column that is not defined on the table, or uses the wrong table alias".to_string(),
            fix_strategy: "Re-check the schema for the correct column name and table alias".to_string(),
            example: None,
            next_step: "Correct the column reference and regenerate the query".to_string(),
        };
    }

    if lowered.contains("syntax error") {
        return ErrorDiagnosis {
            category: ErrorCategory::SyntaxError,
            object_name: None,
            diagnosis: "The SQL statement has a syntax error".to_string(),
            root_cause: raw_error.trim().to_string(),
            fix_strategy: "Re-check SQL grammar (keywords, parentheses, commas)".to_string(),
            example: None,
            next_step: "Fix the syntax near the reported position and regenerate the query".to_string(),
        };
    }

    if lowered.contains("must appear in the group by") {
        return ErrorDiagnosis {
            category: ErrorCategory::GroupingError,
            object_name: None,
            diagnosis: "A selected column is neither grouped nor aggregated".to_string(),
            root_cause: "Every non-aggregated column in the select list must appear in GROUP BY".to_string(),
            fix_strategy: "Add all non-aggregated selected columns to GROUP BY or aggregate them".to_string(),
            example: None,
            next_step: "Adjust the GROUP BY clause and regenerate the query".to_string(),
        };
    }

    let excerpt: String = sql.trim().chars().take(200).collect();
    ErrorDiagnosis {
        category: ErrorCategory::Unclassified,
        object_name: None,
        diagnosis: format!("Query execution failed: {excerpt}"),
        root_cause: raw_error.trim().to_string(),
        fix_strategy: "Read the database error carefully and check the SQL against the schema".to_string(),
        example: None,
        next_step: "Revise the query based on the error message".to_string(),
    }
}
