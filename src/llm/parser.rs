//! Response parsing for model outputs.
//!
//! Models are asked for a single JSON object but routinely wrap it in
//! markdown fences or prose. Parsing tries, in order: the raw text, the
//! first fenced code block, the outermost braces, and finally the same
//! candidates with single quotes swapped for double quotes.

use serde_json::{Map, Value as JsonValue};

use crate::agent::{GeneratedAction, Generation};

/// Extracts a JSON object from free-form model output.
///
/// Returns `None` when no candidate parses as a JSON object.
pub fn extract_json_object(text: &str) -> Option<JsonValue> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let mut candidates: Vec<&str> = vec![text];
    if let Some(block) = extract_code_block(text, "json").or_else(|| extract_code_block(text, "")) {
        candidates.push(block);
    }
    if let Some(braced) = outermost_braces(text) {
        candidates.push(braced);
    }

    candidates
        .iter()
        .find_map(|c| parse_object(c))
        .or_else(|| {
            candidates
                .iter()
                .find_map(|c| parse_object(&c.replace('\'', "\"")))
        })
}

fn parse_object(candidate: &str) -> Option<JsonValue> {
    match serde_json::from_str::<JsonValue>(candidate.trim()) {
        Ok(value @ JsonValue::Object(_)) => Some(value),
        _ => None,
    }
}

/// Returns the text between the first `{` and the last `}`.
fn outermost_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Extracts the body of the first fenced code block tagged `lang`.
///
/// Pass an empty string for `lang` to match blocks without a language tag.
fn extract_code_block<'a>(text: &'a str, lang: &str) -> Option<&'a str> {
    let start_pattern = format!("```{}", lang);
    let start_idx = text.find(&start_pattern)?;

    let after_fence = start_idx + start_pattern.len();
    let content_start = text[after_fence..].find('\n').map(|i| after_fence + i + 1)?;

    // An untagged fence must not carry a language specifier.
    if lang.is_empty() && !text[start_idx + 3..content_start - 1].trim().is_empty() {
        return None;
    }

    let end_idx = text[content_start..].find("```")?;
    Some(&text[content_start..content_start + end_idx])
}

/// Parses a generation response into a [`Generation`].
///
/// Unusable output becomes an `error` action rather than an `Err`.
pub fn parse_generation(text: &str) -> Generation {
    let Some(JsonValue::Object(record)) = extract_json_object(text) else {
        return Generation::error(format!(
            "Could not parse the model output as JSON: {}",
            preview(text)
        ));
    };

    let thought = string_field(&record, "thought").unwrap_or_default();
    let is_final = record.get("is_final").and_then(JsonValue::as_bool);
    let sql = string_field(&record, "sql").filter(|s| !s.trim().is_empty());
    let answer = string_field(&record, "answer").filter(|s| !s.trim().is_empty());

    let action_name = match string_field(&record, "action") {
        Some(name) => name.trim().to_lowercase(),
        None if sql.is_some() => "execute_sql".to_string(),
        None if answer.is_some() => "answer".to_string(),
        None => String::new(),
    };

    let action = match action_name.as_str() {
        "execute_sql" => match sql {
            Some(sql) => GeneratedAction::ExecuteSql {
                sql: sql.trim().to_string(),
            },
            None => GeneratedAction::Error {
                message: "Action execute_sql was chosen but no SQL was provided".to_string(),
            },
        },
        "answer" => match answer {
            Some(answer) => GeneratedAction::Answer { answer },
            None => GeneratedAction::Error {
                message: "Action answer was chosen but no answer was provided".to_string(),
            },
        },
        "" => GeneratedAction::Error {
            message: "Model output named no action".to_string(),
        },
        _ => GeneratedAction::Unsupported {
            action: action_name,
        },
    };

    Generation {
        thought,
        action,
        is_final,
    }
}

fn string_field(record: &Map<String, JsonValue>, key: &str) -> Option<String> {
    record.get(key).and_then(JsonValue::as_str).map(String::from)
}

fn preview(text: &str) -> String {
    const PREVIEW_CHARS: usize = 120;
    let trimmed = text.trim();
    if trimmed.chars().count() <= PREVIEW_CHARS {
        trimmed.to_string()
    } else {
        format!("{}...", trimmed.chars().take(PREVIEW_CHARS).collect::<String>())
    }
}
