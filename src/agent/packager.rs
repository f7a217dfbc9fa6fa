//! Result data packager.
//!
//! Decides how much of a successful result set is forwarded to answer
//! synthesis, so that large results never blow up the downstream call.

use crate::db::QueryResult;
use serde::Serialize;
use serde_json::Value as JsonValue;

/// Results up to this size pass through unchanged.
pub const PASS_THROUGH_LIMIT: usize = 500;

/// Results up to this size are cut to the first `PASS_THROUGH_LIMIT` rows.
pub const HEAD_ONLY_LIMIT: usize = 1000;

/// Rows kept from the front of very large results.
pub const SAMPLE_HEAD: usize = 800;

/// Rows kept from the back of very large results.
pub const SAMPLE_TAIL: usize = 100;

/// Rows selected for synthesis plus the truncation annotation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Packaged<T> {
    pub rows: Vec<T>,
    /// True row count of the result the rows were taken from.
    pub total_rows: usize,
    pub truncated: bool,
    /// Disclosure text for the synthesis prompt when rows were dropped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Packaged result rows rendered as JSON records.
pub type PackagedResult = Packaged<JsonValue>;

/// Applies the sizing policy to `rows`, whose true count is `row_count`.
///
/// Slicing is bounded by `rows.len()`, so a `row_count` larger than the
/// rows actually present never panics.
pub fn package<T: Clone>(rows: &[T], row_count: usize) -> Packaged<T> {
    let available = rows.len();

    if row_count <= PASS_THROUGH_LIMIT {
        return Packaged {
            rows: rows.to_vec(),
            total_rows: row_count,
            truncated: false,
            note: None,
        };
    }

    if row_count <= HEAD_ONLY_LIMIT {
        let kept = &rows[..available.min(PASS_THROUGH_LIMIT)];
        return Packaged {
            rows: kept.to_vec(),
            total_rows: row_count,
            truncated: true,
            note: Some(format!(
                "Showing the first {} of {row_count} rows.",
                kept.len()
            )),
        };
    }

    let head_end = available.min(SAMPLE_HEAD);
    let tail_start = available.saturating_sub(SAMPLE_TAIL).max(head_end);
    let mut sampled = rows[..head_end].to_vec();
    sampled.extend_from_slice(&rows[tail_start..]);
    let tail_len = available - tail_start;

    Packaged {
        rows: sampled,
        total_rows: row_count,
        truncated: true,
        note: Some(format!(
            "The result has {row_count} rows in total; showing the first {head_end} and the last {tail_len}. \
             Mention that the data shown is a sample when it matters for the answer."
        )),
    }
}

/// Packages an executed result as JSON records.
///
/// When the execution service itself dropped rows beyond its cap, the
/// note says so as well.
pub fn package_result(result: &QueryResult) -> PackagedResult {
    let records = result.records();
    let mut packaged = package(&records, result.row_count);

    if result.was_truncated {
        let total = result.total_rows.unwrap_or(result.row_count);
        let cap_note = format!(
            "The database returned {total} rows but only the first {} were fetched.",
            result.row_count
        );
        packaged.note = Some(match packaged.note.take() {
            Some(note) => format!("{note} {cap_note}"),
            None => cap_note,
        });
        packaged.truncated = true;
    }

    packaged
}
