//! Answers that need no synthesis call.

use crate::db::{QueryResult, Row, Value};

/// Rows listed one by one before the formatted answer falls back to a count.
const MAX_LISTED_ROWS: usize = 10;

/// Answers directly from a single-scalar result.
///
/// Applies only when the result is exactly one row with exactly one
/// numeric column. Count-like columns read as a record count.
pub fn scalar_answer(result: &QueryResult) -> Option<String> {
    if result.row_count != 1 || result.columns.len() != 1 {
        return None;
    }
    let value = result.rows.first()?.first()?;
    let rendered = render_number(value)?;
    let column = &result.columns[0].name;

    if column.to_lowercase().contains("count") {
        Some(format!("There are {rendered} records."))
    } else {
        Some(format!("{column}: {rendered}"))
    }
}

/// Formats a result as a plain answer without calling the synthesizer.
///
/// One row reads as `column: value` pairs, up to ten rows as a numbered
/// list, and anything larger as a record count. NULLs are left out.
pub fn formatted_answer(result: &QueryResult) -> String {
    let total = result.total_rows.unwrap_or(result.row_count);

    match result.rows.as_slice() {
        [] => "The query returned no rows.".to_string(),
        [row] if total <= 1 => format!("Query result: {}", describe_row(result, row)),
        rows if total <= MAX_LISTED_ROWS => {
            let mut answer = format!("The query returned {total} records:");
            for (i, row) in rows.iter().enumerate() {
                answer.push_str(&format!("\n{}. {}", i + 1, describe_row(result, row)));
            }
            answer
        }
        _ => format!("The query returned {total} records (too many to list here)."),
    }
}

fn describe_row(result: &QueryResult, row: &Row) -> String {
    result
        .columns
        .iter()
        .zip(row)
        .filter(|(_, value)| !value.is_null())
        .map(|(column, value)| format!("{}: {}", column.name, render_field(value)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_field(value: &Value) -> String {
    match value {
        Value::Float(f) => format!("{f:.2}"),
        other => other.to_display_string(),
    }
}

fn render_number(value: &Value) -> Option<String> {
    match value {
        Value::Int(i) => Some(i.to_string()),
        Value::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
            Some(format!("{}", *f as i64))
        }
        Value::Float(f) if f.is_finite() => Some(f.to_string()),
        Value::Numeric(n) => Some(n.clone()),
        _ => None,
    }
}
