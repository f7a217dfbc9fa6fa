//! Prompt construction for the three model calls.
//!
//! Each call gets a system message describing the task and output format,
//! and a user message carrying the question and whatever evidence the task
//! needs.

use chrono::NaiveDate;
use serde_json::Value as JsonValue;

use crate::agent::{ContextEntry, GenerationRequest, JudgmentRequest, SynthesisRequest};
use crate::llm::types::Message;

/// Opening line of the generation system prompt.
pub const GENERATION_ROLE: &str =
    "You are a read-only SQL analyst for a PostgreSQL payroll and HR database.";

/// Opening line of the judgment system prompt.
pub const JUDGMENT_ROLE: &str =
    "You judge whether a SQL query result is sufficient to answer a question.";

/// Opening line of the synthesis system prompt.
pub const SYNTHESIS_ROLE: &str =
    "You are a data analyst writing the final answer to a question from query results.";

/// Most recent context entries shown to the generation call.
const GENERATION_CONTEXT_ENTRIES: usize = 6;

/// Most recent context entries shown to the judgment call.
const JUDGMENT_CONTEXT_ENTRIES: usize = 3;

/// Sample rows shown to the judgment call.
const JUDGMENT_SAMPLE_ROWS: usize = 10;

const GENERATION_RULES: &str = r#"RULES:
- Generate exactly one PostgreSQL SELECT (or WITH ... SELECT) statement per step.
- Never modify data: no INSERT, UPDATE, DELETE, DROP, ALTER, CREATE, TRUNCATE, GRANT, REVOKE or EXEC.
- Never call set-returning functions such as generate_series or unnest inside WHERE or HAVING; produce the set in a CTE or FROM-clause subquery and filter on its column.
- Every non-aggregated column in the select list must appear in GROUP BY.
- Qualify columns with table aliases when joining.
- Resolve relative dates ("last month", "this year") against the current date below.
- If the question does not need the database (greetings, questions about yourself), answer directly.

OUTPUT FORMAT:
Respond with one JSON object and nothing else:
{"thought": "<your reasoning>", "action": "execute_sql", "sql": "<statement>", "is_final": false}
or
{"thought": "<your reasoning>", "action": "answer", "answer": "<final answer>", "is_final": true}"#;

const JUDGMENT_RULES: &str = r#"Respond with one JSON object and nothing else:
{
  "completeness": <number between 0 and 1>,
  "is_sufficient": <true|false>,
  "key_findings": ["<finding>", ...],
  "anomalies": ["<anything suspicious, e.g. empty or implausible values>", ...],
  "suggestion": "<what the next query should do, if anything>",
  "next_action": "generate_answer" | "continue_query" | "retry_query"
}
Choose "generate_answer" only when the rows already answer the question.
Choose "retry_query" when the query itself looks wrong, "continue_query" when more data is needed."#;

const SYNTHESIS_RULES: &str = r#"REQUIREMENTS:
- Answer the question clearly and directly, in the language of the question.
- Include the concrete numbers from the results.
- Point out anything unusual in the data.
- Avoid SQL and database jargon.
- If the rows were truncated, say the answer is based on a subset."#;

/// Builds the messages for a generation call.
pub fn generation_messages(
    request: &GenerationRequest<'_>,
    schema: Option<&str>,
    today: NaiveDate,
) -> Vec<Message> {
    let mut system = format!("{GENERATION_ROLE}\n\n{GENERATION_RULES}\n\nCURRENT DATE: {today}");
    if let Some(schema) = schema.map(str::trim).filter(|s| !s.is_empty()) {
        system.push_str("\n\nDATABASE SCHEMA:\n");
        system.push_str(schema);
    }

    let mut user = format!("QUESTION:\n{}\n", request.question);

    let history = render_context(request.context, GENERATION_CONTEXT_ENTRIES);
    if !history.is_empty() {
        user.push_str("\nPREVIOUS STEPS:\n");
        user.push_str(&history);
    }

    if let Some(feedback) = request.error_feedback {
        user.push_str("\nERROR FEEDBACK (fix this before anything else):\n");
        user.push_str(feedback);
        user.push('\n');
    }

    user.push_str(&format!(
        "\nThis is step {}. Reply with the JSON object only.",
        request.context.len() + 1
    ));

    vec![Message::system(system), Message::user(user)]
}

/// Builds the messages for a judgment call.
pub fn judgment_messages(request: &JudgmentRequest<'_>) -> Vec<Message> {
    let system = format!("{JUDGMENT_ROLE}\n\n{JUDGMENT_RULES}");

    let sample: Vec<JsonValue> = request
        .result
        .records()
        .into_iter()
        .take(JUDGMENT_SAMPLE_ROWS)
        .collect();

    let mut user = format!(
        "QUESTION:\n{}\n\nSQL:\n{}\n\nROW COUNT: {}\nCOLUMNS: {}\n\nSAMPLE ROWS (up to {}):\n{}\n",
        request.question,
        request.sql.trim(),
        request.result.row_count,
        request.result.column_names().join(", "),
        JUDGMENT_SAMPLE_ROWS,
        to_json_text(&sample),
    );

    let history = render_context(request.context, JUDGMENT_CONTEXT_ENTRIES);
    if !history.is_empty() {
        user.push_str("\nRECENT STEPS:\n");
        user.push_str(&history);
    }

    vec![Message::system(system), Message::user(user)]
}

/// Builds the messages for a synthesis call.
pub fn synthesis_messages(request: &SynthesisRequest<'_>) -> Vec<Message> {
    let system = format!("{SYNTHESIS_ROLE}\n\n{SYNTHESIS_RULES}");
    let packaged = request.packaged;

    let mut user = format!(
        "QUESTION:\n{}\n\nSQL:\n{}\n\nTOTAL ROWS: {}\n",
        request.question,
        request.sql.trim(),
        packaged.total_rows
    );
    if let Some(note) = &packaged.note {
        user.push_str(&format!("NOTE: {note}\n"));
    }
    user.push_str(&format!("\nROWS:\n{}\n", to_json_text(&packaged.rows)));
    user.push_str("\nWrite the answer now.");

    vec![Message::system(system), Message::user(user)]
}

/// Renders the last `limit` context entries, one block per iteration.
fn render_context(context: &[ContextEntry], limit: usize) -> String {
    let skip = context.len().saturating_sub(limit);
    let mut out = String::new();
    for entry in &context[skip..] {
        out.push_str(&format!("Step {}:\n", entry.iteration));
        if !entry.thought.is_empty() {
            out.push_str(&format!("  Thought: {}\n", entry.thought));
        }
        if let Some(step) = entry.sql_step() {
            out.push_str(&format!("  SQL: {}\n", step.sql.trim()));
        }
        out.push_str(&format!("  Outcome: {}\n", entry.summary()));
    }
    out
}

fn to_json_text(rows: &[JsonValue]) -> String {
    serde_json::to_string_pretty(rows).unwrap_or_else(|_| "[]".to_string())
}
