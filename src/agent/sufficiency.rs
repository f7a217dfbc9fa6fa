//! Sufficiency decision protocol.
//!
//! The judgment collaborator's output is untrusted. Every field is coerced
//! into range here, and only the normalized `next_action` drives control
//! flow; findings and suggestions are informational.

use crate::agent::collaborators::RawJudgment;
use crate::llm::parser::extract_json_object;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Completeness used when the judgment's value cannot be coerced.
const DEFAULT_COMPLETENESS: f64 = 0.5;

const AFFIRMATIVE_CUES: [&str; 3] = ["sufficient", "enough", "complete"];

const NEGATIVE_CUES: [&str; 9] = [
    "insufficient",
    "not enough",
    "incomplete",
    "need more",
    "continue",
    "no data",
    "no rows",
    "cannot",
    "unable",
];

/// Words that flip an affirmative cue when they precede it closely.
const NEGATORS: [&str; 6] = ["not", "no", "isn't", "aren't", "never", "hardly"];

/// What the judgment recommends doing next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    GenerateAnswer,
    ContinueQuery,
    RetryQuery,
}

impl NextAction {
    /// Returns the wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenerateAnswer => "generate_answer",
            Self::ContinueQuery => "continue_query",
            Self::RetryQuery => "retry_query",
        }
    }

    /// Parses a wire name; anything else is `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "generate_answer" => Some(Self::GenerateAnswer),
            "continue_query" => Some(Self::ContinueQuery),
            "retry_query" => Some(Self::RetryQuery),
            _ => None,
        }
    }

    /// Maps the action to the orchestrator's decision.
    pub fn decision(&self) -> Decision {
        match self {
            Self::GenerateAnswer => Decision::Finalize,
            Self::ContinueQuery => Decision::Continue,
            Self::RetryQuery => Decision::Retry,
        }
    }
}

impl fmt::Display for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator decision after a successful execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Finalize,
    Continue,
    Retry,
}

/// Normalized sufficiency judgment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SufficiencyJudgment {
    /// Completeness score, always within [0, 1].
    pub completeness: f64,
    pub is_sufficient: bool,
    pub next_action: NextAction,
    pub key_findings: Vec<String>,
    pub anomalies: Vec<String>,
    pub suggestion: String,
    /// Set when the judgment came from the keyword scan rather than a record.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub from_keyword_scan: bool,
}

impl SufficiencyJudgment {
    /// Returns the decision the orchestrator acts on.
    pub fn decision(&self) -> Decision {
        self.next_action.decision()
    }
}

/// Interprets raw judgment output.
///
/// Records are normalized field by field. Text is parsed as JSON when
/// possible, otherwise scanned for sufficiency cues.
pub fn interpret(raw: &RawJudgment) -> SufficiencyJudgment {
    match raw {
        RawJudgment::Record(value) => normalize_record(value),
        RawJudgment::Text(text) => match extract_json_object(text) {
            Some(value) => normalize_record(&value),
            None => keyword_scan(text),
        },
    }
}

/// Normalizes an untrusted judgment record.
///
/// Non-object input is treated as an empty record.
pub fn normalize_record(value: &JsonValue) -> SufficiencyJudgment {
    let field = |name: &str| value.get(name).unwrap_or(&JsonValue::Null);

    let completeness = match value.get("completeness") {
        None => DEFAULT_COMPLETENESS,
        Some(raw) => coerce_completeness(raw),
    };
    let is_sufficient = coerce_bool(field("is_sufficient"));
    let next_action = field("next_action")
        .as_str()
        .and_then(NextAction::parse)
        .unwrap_or(if is_sufficient {
            NextAction::GenerateAnswer
        } else {
            NextAction::ContinueQuery
        });

    SufficiencyJudgment {
        completeness,
        is_sufficient,
        next_action,
        key_findings: string_list(field("key_findings")),
        anomalies: string_list(field("anomalies")),
        suggestion: field("suggestion").as_str().unwrap_or_default().to_string(),
        from_keyword_scan: false,
    }
}

/// Scans free text for sufficiency cues.
///
/// Negative cues override affirmative ones, so "insufficient" never reads
/// as "sufficient".
pub fn keyword_scan(text: &str) -> SufficiencyJudgment {
    let lowered = text.to_lowercase();
    let affirmative = AFFIRMATIVE_CUES.iter().any(|cue| lowered.contains(cue));
    let negative =
        NEGATIVE_CUES.iter().any(|cue| lowered.contains(cue)) || negated_affirmative(&lowered);
    let is_sufficient = affirmative && !negative;

    SufficiencyJudgment {
        completeness: if is_sufficient { 0.7 } else { 0.4 },
        is_sufficient,
        next_action: if is_sufficient {
            NextAction::GenerateAnswer
        } else {
            NextAction::ContinueQuery
        },
        key_findings: Vec::new(),
        anomalies: vec!["Judgment was not a JSON record; inferred from its wording".to_string()],
        suggestion: String::new(),
        from_keyword_scan: true,
    }
}

/// True when an affirmative cue has a negator within the two words before it.
fn negated_affirmative(lowered: &str) -> bool {
    let words: Vec<&str> = lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .collect();
    words.iter().enumerate().any(|(i, word)| {
        AFFIRMATIVE_CUES.iter().any(|cue| word.starts_with(cue))
            && words[i.saturating_sub(2)..i]
                .iter()
                .any(|w| NEGATORS.contains(w))
    })
}

fn coerce_completeness(raw: &JsonValue) -> f64 {
    let parsed = match raw {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => v.clamp(0.0, 1.0),
        _ => DEFAULT_COMPLETENESS,
    }
}

fn coerce_bool(raw: &JsonValue) -> bool {
    match raw {
        JsonValue::Bool(b) => *b,
        JsonValue::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "1"),
        JsonValue::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
        JsonValue::Null => false,
    }
}

fn string_list(raw: &JsonValue) -> Vec<String> {
    match raw {
        JsonValue::Array(items) => items
            .iter()
            .map(|item| match item {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        _ => Vec::new(),
    }
}
