//! Per-query state and the append-only context log.

use serde::Serialize;
use std::time::{Duration, Instant};

use crate::agent::diagnosis::ErrorDiagnosis;
use crate::agent::sufficiency::SufficiencyJudgment;
use crate::db::{duration_secs, QueryResult};
use crate::safety::ValidationVerdict;

/// One iteration of the loop, as recorded in the context log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextEntry {
    pub iteration: u32,
    /// Reasoning text from the generation step.
    pub thought: String,
    #[serde(flatten)]
    pub step: Step,
}

impl ContextEntry {
    /// Returns the action tag of this entry.
    pub fn action(&self) -> &'static str {
        self.step.action()
    }

    /// Returns the SQL step, if this entry proposed SQL.
    pub fn sql_step(&self) -> Option<&SqlStep> {
        match &self.step {
            Step::ExecuteSql(sql) => Some(sql),
            _ => None,
        }
    }

    /// Renders a one-line summary for prompts and audit logs.
    pub fn summary(&self) -> String {
        match &self.step {
            Step::ExecuteSql(step) => match &step.outcome {
                SqlOutcome::Rejected { .. } => {
                    format!("rejected by safety gate: {}", step.verdict.message)
                }
                SqlOutcome::Failed { execution, .. } => format!(
                    "failed: {}",
                    execution.error.as_deref().unwrap_or("unknown error")
                ),
                SqlOutcome::Succeeded {
                    execution,
                    judgment,
                    ..
                } => {
                    let mut line = format!(
                        "succeeded, {} rows in {:.3}s",
                        execution.row_count,
                        execution.execution_time.as_secs_f64()
                    );
                    match judgment {
                        JudgmentOutcome::Judged(j) => line.push_str(&format!(
                            "; judged {} (completeness {:.2})",
                            j.next_action, j.completeness
                        )),
                        JudgmentOutcome::Unavailable { .. } => line.push_str("; judgment unavailable"),
                    }
                    line
                }
            },
            Step::Answer { answer } => format!("answered: {answer}"),
            Step::Error { message } => format!("error: {message}"),
        }
    }
}

/// What happened in one iteration. Exactly one path is populated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    ExecuteSql(SqlStep),
    Answer { answer: String },
    Error { message: String },
}

impl Step {
    /// Returns the action tag.
    pub fn action(&self) -> &'static str {
        match self {
            Self::ExecuteSql(_) => "execute_sql",
            Self::Answer { .. } => "answer",
            Self::Error { .. } => "error",
        }
    }
}

/// A proposed SQL statement and everything that followed from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlStep {
    pub sql: String,
    pub verdict: ValidationVerdict,
    #[serde(flatten)]
    pub outcome: SqlOutcome,
}

/// Outcome of a proposed statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SqlOutcome {
    /// The safety gate refused it; nothing was executed.
    Rejected {
        /// Remediation text for the next generation call.
        feedback: String,
    },
    /// Execution was attempted and failed.
    Failed {
        execution: ExecutionRecord,
        diagnosis: ErrorDiagnosis,
        feedback: String,
    },
    /// Execution succeeded.
    Succeeded {
        execution: ExecutionRecord,
        judgment: JudgmentOutcome,
        #[serde(skip_serializing_if = "Option::is_none")]
        answer: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        synthesis_error: Option<String>,
    },
}

/// Result of the sufficiency judgment for a successful execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JudgmentOutcome {
    Judged(SufficiencyJudgment),
    /// The judgment call failed or timed out.
    Unavailable { error: String },
}

/// Summary of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRecord {
    pub success: bool,
    pub row_count: usize,
    pub columns: Vec<String>,
    #[serde(with = "duration_secs")]
    pub execution_time: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Rows were dropped by the execution service's row cap.
    pub truncated: bool,
}

impl ExecutionRecord {
    /// Summarizes a successful result.
    pub fn succeeded(result: &QueryResult) -> Self {
        Self {
            success: true,
            row_count: result.row_count,
            columns: result.column_names(),
            execution_time: result.execution_time,
            error: None,
            truncated: result.was_truncated,
        }
    }

    /// Records a failure after `elapsed`.
    pub fn failed(error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            row_count: 0,
            columns: Vec::new(),
            execution_time: elapsed,
            error: Some(error.into()),
            truncated: false,
        }
    }
}

/// The most recent successful execution, kept for the fallback answer.
#[derive(Debug, Clone)]
pub struct LastSuccess {
    pub iteration: u32,
    pub sql: String,
    pub result: QueryResult,
}

/// State owned by the orchestrator for one question.
#[derive(Debug)]
pub struct QueryState {
    question: String,
    pub iteration: u32,
    context: Vec<ContextEntry>,
    answer: Option<String>,
    pub success: bool,
    started: Instant,
    pub error: Option<String>,
    pub last_success: Option<LastSuccess>,
}

impl QueryState {
    /// Starts the clock for a new question.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            iteration: 0,
            context: Vec::new(),
            answer: None,
            success: false,
            started: Instant::now(),
            error: None,
            last_success: None,
        }
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    /// Returns the context log so far.
    pub fn context(&self) -> &[ContextEntry] {
        &self.context
    }

    /// Appends a finished entry. Entries are never modified afterwards.
    pub fn record(&mut self, entry: ContextEntry) {
        self.context.push(entry);
    }

    /// Returns the final answer, if one was set.
    pub fn answer(&self) -> Option<&str> {
        self.answer.as_deref()
    }

    /// Sets the final answer and marks the query successful.
    ///
    /// The answer slot is write-once; returns false if it was already set.
    pub fn finish(&mut self, answer: impl Into<String>) -> bool {
        if self.answer.is_some() {
            return false;
        }
        self.answer = Some(answer.into());
        self.success = true;
        self.error = None;
        true
    }

    /// Remediation text for the next generation call.
    ///
    /// Only produced when the previous iteration ended in a gate rejection
    /// or an execution failure.
    pub fn error_feedback(&self) -> Option<String> {
        let step = self.context.last()?.sql_step()?;
        match &step.outcome {
            SqlOutcome::Rejected { feedback } | SqlOutcome::Failed { feedback, .. } => {
                Some(feedback.clone())
            }
            SqlOutcome::Succeeded { .. } => None,
        }
    }

    /// Wall-clock time since the question arrived.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Consumes the state into the reported result.
    pub fn into_result(self) -> AgentResult {
        let elapsed = self.elapsed();
        AgentResult {
            success: self.success,
            answer: self.answer,
            iteration_count: self.iteration,
            context_log: self.context,
            elapsed,
            error: if self.success { None } else { self.error },
        }
    }
}

/// Final result of one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentResult {
    pub success: bool,
    pub answer: Option<String>,
    pub iteration_count: u32,
    pub context_log: Vec<ContextEntry>,
    /// Total wall-clock time, serialized as fractional seconds.
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl AgentResult {
    /// Builds a failure result that never reached the loop.
    pub fn failure(error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            answer: None,
            iteration_count: 0,
            context_log: Vec::new(),
            elapsed,
            error: Some(error.into()),
        }
    }
}
