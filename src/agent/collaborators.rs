//! Collaborator contracts consumed by the orchestrator.
//!
//! Generation, judgment and synthesis are delegated to an external
//! completion service; execution goes through [`crate::db::DatabaseClient`].

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::agent::packager::PackagedResult;
use crate::agent::state::ContextEntry;
use crate::db::QueryResult;
use crate::error::Result;

/// Input to the generation collaborator.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub question: &'a str,
    /// Every context entry recorded so far, oldest first.
    pub context: &'a [ContextEntry],
    /// Remediation text from the previous iteration's failure, if any.
    pub error_feedback: Option<&'a str>,
}

/// The action chosen by one generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GeneratedAction {
    /// Run this SQL.
    ExecuteSql { sql: String },
    /// Answer directly, without touching the database.
    Answer { answer: String },
    /// The generation step failed or produced unusable output.
    Error { message: String },
    /// An action name outside the contract.
    Unsupported {
        #[serde(rename = "requested")]
        action: String,
    },
}

impl GeneratedAction {
    /// Returns the action name as recorded in the context log.
    pub fn name(&self) -> &str {
        match self {
            Self::ExecuteSql { .. } => "execute_sql",
            Self::Answer { .. } => "answer",
            Self::Error { .. } => "error",
            Self::Unsupported { action } => action,
        }
    }
}

/// Output of one generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Generation {
    /// The model's reasoning for this step.
    pub thought: String,
    pub action: GeneratedAction,
    /// Informational only; the loop stops on answers, not on this flag.
    pub is_final: Option<bool>,
}

impl Generation {
    /// Creates an `execute_sql` generation.
    pub fn sql(thought: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            thought: thought.into(),
            action: GeneratedAction::ExecuteSql { sql: sql.into() },
            is_final: Some(false),
        }
    }

    /// Creates an `answer` generation.
    pub fn answer(thought: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            thought: thought.into(),
            action: GeneratedAction::Answer {
                answer: answer.into(),
            },
            is_final: Some(true),
        }
    }

    /// Creates an `error` generation.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            thought: String::new(),
            action: GeneratedAction::Error {
                message: message.into(),
            },
            is_final: None,
        }
    }
}

/// Input to the sufficiency-judgment collaborator.
#[derive(Debug, Clone, Copy)]
pub struct JudgmentRequest<'a> {
    pub question: &'a str,
    pub sql: &'a str,
    pub result: &'a QueryResult,
    /// Every context entry recorded so far; implementations pick the tail.
    pub context: &'a [ContextEntry],
}

/// Raw, untrusted judgment output.
#[derive(Debug, Clone, PartialEq)]
pub enum RawJudgment {
    /// Already-structured record.
    Record(JsonValue),
    /// Free text from the completion service.
    Text(String),
}

/// Input to the answer-synthesis collaborator.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisRequest<'a> {
    pub question: &'a str,
    pub sql: &'a str,
    pub packaged: &'a PackagedResult,
    pub context: &'a [ContextEntry],
}

/// Turns a question and the context so far into the next action.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    /// Generates the next step. Unusable output should come back as
    /// [`GeneratedAction::Error`] rather than `Err`.
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<Generation>;
}

/// Judges whether an executed result already answers the question.
#[async_trait]
pub trait SufficiencyJudge: Send + Sync {
    async fn judge(&self, request: &JudgmentRequest<'_>) -> Result<RawJudgment>;
}

/// Writes the final natural-language answer.
#[async_trait]
pub trait AnswerSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<String>;
}
