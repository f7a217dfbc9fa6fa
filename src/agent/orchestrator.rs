//! The query orchestration loop.
//!
//! One sequential loop per question: generate, gate, execute, judge, then
//! either finish or go round again. Every collaborator failure becomes a
//! context entry or the result's `error`; nothing escapes `query`.

use futures::future::FutureExt;
use futures::stream::{self, BoxStream, StreamExt};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::agent::collaborators::{
    AnswerSynthesizer, GeneratedAction, Generation, GenerationRequest, JudgmentRequest,
    SqlGenerator, SufficiencyJudge, SynthesisRequest,
};
use crate::agent::diagnosis::classify_execution_error;
use crate::agent::events::{AgentEvent, EventSink};
use crate::agent::fallback::{formatted_answer, scalar_answer};
use crate::agent::packager::package_result;
use crate::agent::state::{
    AgentResult, ContextEntry, ExecutionRecord, JudgmentOutcome, LastSuccess, QueryState,
    SqlOutcome, SqlStep, Step,
};
use crate::agent::sufficiency::{interpret, Decision};
use crate::agent::AgentSettings;
use crate::db::{DatabaseClient, QueryResult};
use crate::error::{AgentError, Result};
use crate::logging::log_iteration;
use crate::safety::SafetyGate;

/// Whether the loop should keep going after an iteration.
enum Flow {
    Continue,
    Stop,
}

/// Drives one question at a time through the generate/execute loop.
///
/// Holds only read-only configuration and shared collaborator handles, so
/// a single instance can serve concurrent questions.
pub struct Orchestrator {
    generator: Arc<dyn SqlGenerator>,
    judge: Arc<dyn SufficiencyJudge>,
    synthesizer: Arc<dyn AnswerSynthesizer>,
    database: Arc<dyn DatabaseClient>,
    gate: SafetyGate,
    settings: AgentSettings,
}

impl Orchestrator {
    /// Creates an orchestrator from individual collaborators.
    pub fn new(
        generator: Arc<dyn SqlGenerator>,
        judge: Arc<dyn SufficiencyJudge>,
        synthesizer: Arc<dyn AnswerSynthesizer>,
        database: Arc<dyn DatabaseClient>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            generator,
            judge,
            synthesizer,
            database,
            gate: SafetyGate::new(),
            settings,
        }
    }

    /// Creates an orchestrator whose three language collaborators are one service.
    pub fn with_service<S>(
        service: Arc<S>,
        database: Arc<dyn DatabaseClient>,
        settings: AgentSettings,
    ) -> Self
    where
        S: SqlGenerator + SufficiencyJudge + AnswerSynthesizer + 'static,
    {
        Self::new(
            service.clone(),
            service.clone(),
            service,
            database,
            settings,
        )
    }

    /// Returns the settings this orchestrator was built with.
    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Answers a question, returning once the loop has finished.
    pub async fn query(&self, question: &str) -> AgentResult {
        let started = Instant::now();
        let (sink, mut events) = EventSink::channel();
        self.run(question, &sink).await;
        drop(sink);

        let mut last = None;
        while let Some(event) = events.recv().await {
            if let AgentEvent::Final { result } = event {
                last = Some(result);
            }
        }
        last.unwrap_or_else(|| {
            AgentResult::failure("Query finished without a final result", started.elapsed())
        })
    }

    /// Answers a question, yielding progress events as they happen.
    ///
    /// The last event is always [`AgentEvent::Final`]. Dropping the stream
    /// stops the loop at the next iteration boundary.
    pub fn query_stream(self: Arc<Self>, question: impl Into<String>) -> BoxStream<'static, AgentEvent> {
        let question = question.into();
        let (sink, events) = EventSink::channel();
        tokio::spawn(async move {
            self.run(&question, &sink).await;
        });
        stream::unfold(events, |mut events| async move {
            events.recv().await.map(|event| (event, events))
        })
        .boxed()
    }

    /// Runs the loop behind a panic boundary and emits the final event.
    async fn run(&self, question: &str, sink: &EventSink) {
        let started = Instant::now();
        let result = match AssertUnwindSafe(self.drive(question, sink))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(question, "Orchestration panicked: {message}");
                AgentResult::failure(
                    format!("Internal error while processing the question: {message}"),
                    started.elapsed(),
                )
            }
        };

        info!(
            success = result.success,
            iterations = result.iteration_count,
            duration_ms = result.elapsed.as_millis() as u64,
            "Query finished"
        );
        sink.emit(AgentEvent::Final { result });
    }

    async fn drive(&self, question: &str, sink: &EventSink) -> AgentResult {
        let max_iterations = self.settings.max_iterations;
        let mut state = QueryState::new(question);
        info!(question, max_iterations, "Starting query");

        let mut aborted = false;
        while state.iteration < max_iterations {
            if sink.is_closed() {
                warn!(iteration = state.iteration, "Event consumer went away, stopping");
                state.error = Some("Client disconnected before the query finished".to_string());
                aborted = true;
                break;
            }

            state.iteration += 1;
            sink.emit(AgentEvent::IterationStarted {
                iteration: state.iteration,
                max_iterations,
            });

            match self.iterate(&mut state, sink).await {
                Flow::Continue => {}
                Flow::Stop => {
                    aborted = !state.success;
                    break;
                }
            }
        }

        if !state.success && !aborted {
            self.finalize_without_answer(&mut state, sink).await;
        }

        state.into_result()
    }

    /// Runs one iteration; the context entry is complete before it is recorded.
    async fn iterate(&self, state: &mut QueryState, sink: &EventSink) -> Flow {
        let iteration = state.iteration;
        let feedback = state.error_feedback();
        let request = GenerationRequest {
            question: state.question(),
            context: state.context(),
            error_feedback: feedback.as_deref(),
        };

        let generation = match self
            .bounded("generation", self.generator.generate(&request))
            .await
        {
            Ok(generation) => generation,
            Err(e) => Generation::error(e.to_string()),
        };
        let Generation {
            thought, action, ..
        } = generation;

        if !thought.is_empty() {
            sink.emit(AgentEvent::Thought {
                iteration,
                thought: thought.clone(),
            });
        }
        sink.emit(AgentEvent::ActionChosen {
            iteration,
            action: action.name().to_string(),
        });

        match action {
            GeneratedAction::Answer { answer } if !answer.trim().is_empty() => {
                log_iteration(state.question(), iteration, None, "answered directly", "finish");
                state.record(ContextEntry {
                    iteration,
                    thought,
                    step: Step::Answer {
                        answer: answer.clone(),
                    },
                });
                sink.emit(AgentEvent::Answer {
                    iteration,
                    answer: answer.clone(),
                });
                state.finish(answer);
                Flow::Stop
            }
            GeneratedAction::Answer { .. } => {
                self.record_generation_error(state, sink, thought, "Generated answer was empty")
            }
            GeneratedAction::Error { message } => {
                self.record_generation_error(state, sink, thought, &message)
            }
            GeneratedAction::Unsupported { action } => {
                let message = format!("Unsupported action '{action}'");
                warn!(iteration, "{message}");
                log_iteration(state.question(), iteration, None, &message, "continue");
                state.record(ContextEntry {
                    iteration,
                    thought,
                    step: Step::Error {
                        message: message.clone(),
                    },
                });
                sink.emit(AgentEvent::Error { iteration, message });
                Flow::Continue
            }
            GeneratedAction::ExecuteSql { sql } => {
                sink.emit(AgentEvent::SqlSubmitted {
                    iteration,
                    sql: sql.clone(),
                });
                self.handle_sql(state, sink, thought, sql).await
            }
        }
    }

    /// Generation failures abort on the first iteration and are retried later.
    fn record_generation_error(
        &self,
        state: &mut QueryState,
        sink: &EventSink,
        thought: String,
        message: &str,
    ) -> Flow {
        let iteration = state.iteration;
        state.record(ContextEntry {
            iteration,
            thought,
            step: Step::Error {
                message: message.to_string(),
            },
        });
        sink.emit(AgentEvent::Error {
            iteration,
            message: message.to_string(),
        });

        if iteration == 1 {
            error!(iteration, "Generation failed on the first iteration: {message}");
            log_iteration(state.question(), iteration, None, message, "abort");
            state.error = Some(message.to_string());
            Flow::Stop
        } else {
            warn!(iteration, "Generation failed, retrying: {message}");
            log_iteration(state.question(), iteration, None, message, "retry");
            Flow::Continue
        }
    }

    async fn handle_sql(
        &self,
        state: &mut QueryState,
        sink: &EventSink,
        thought: String,
        sql: String,
    ) -> Flow {
        let iteration = state.iteration;
        let verdict = self.gate.check(&sql);

        if !verdict.accepted {
            let feedback = verdict.feedback_for(&sql);
            warn!(
                iteration,
                category = verdict.category(),
                "SQL rejected by safety gate: {}",
                verdict.message
            );
            log_iteration(
                state.question(),
                iteration,
                Some(&sql),
                &format!("rejected ({})", verdict.category()),
                "regenerate",
            );
            sink.emit(AgentEvent::Error {
                iteration,
                message: format!("SQL rejected: {}", verdict.message),
            });
            state.record(ContextEntry {
                iteration,
                thought,
                step: Step::ExecuteSql(SqlStep {
                    sql,
                    verdict,
                    outcome: SqlOutcome::Rejected { feedback },
                }),
            });
            return Flow::Continue;
        }

        debug!(iteration, sql_len = sql.len(), "Executing SQL");
        let started = Instant::now();
        let executed = self
            .bounded("execution", self.database.execute_query(&sql))
            .await;

        let result = match executed {
            Ok(result) => result,
            Err(e) => {
                let raw = e.message().to_string();
                let diagnosis = classify_execution_error(&sql, &raw);
                let feedback = diagnosis.feedback(&sql, &raw);
                let execution = ExecutionRecord::failed(raw.clone(), started.elapsed());
                warn!(
                    iteration,
                    category = diagnosis.category.as_str(),
                    "Execution failed: {raw}"
                );
                log_iteration(
                    state.question(),
                    iteration,
                    Some(&sql),
                    &format!("execution failed ({})", diagnosis.category),
                    "regenerate with diagnosis",
                );
                sink.emit(AgentEvent::ExecutionResult {
                    iteration,
                    success: false,
                    row_count: 0,
                    execution_time: execution.execution_time,
                    error: Some(raw),
                });
                state.record(ContextEntry {
                    iteration,
                    thought,
                    step: Step::ExecuteSql(SqlStep {
                        sql,
                        verdict,
                        outcome: SqlOutcome::Failed {
                            execution,
                            diagnosis,
                            feedback,
                        },
                    }),
                });
                return Flow::Continue;
            }
        };

        let execution = ExecutionRecord::succeeded(&result);
        sink.emit(AgentEvent::ExecutionResult {
            iteration,
            success: true,
            row_count: result.row_count,
            execution_time: result.execution_time,
            error: None,
        });
        state.last_success = Some(LastSuccess {
            iteration,
            sql: sql.clone(),
            result: result.clone(),
        });

        sink.emit(AgentEvent::Judging { iteration });
        let judged = self
            .bounded(
                "judgment",
                self.judge.judge(&JudgmentRequest {
                    question: state.question(),
                    sql: &sql,
                    result: &result,
                    context: state.context(),
                }),
            )
            .await;

        let (judgment, finalize) = match judged {
            Ok(raw) => {
                let judgment = interpret(&raw);
                debug!(
                    iteration,
                    next_action = judgment.next_action.as_str(),
                    completeness = judgment.completeness,
                    "Judgment received"
                );
                let finalize = judgment.decision() == Decision::Finalize;
                (JudgmentOutcome::Judged(judgment), finalize)
            }
            Err(e) => {
                // Rows already fetched are worth answering from.
                let finalize = result.row_count > 0;
                warn!(
                    iteration,
                    row_count = result.row_count,
                    "Judgment failed ({e}), {}",
                    if finalize {
                        "answering from this result"
                    } else {
                        "treating as inconclusive"
                    }
                );
                (
                    JudgmentOutcome::Unavailable {
                        error: e.to_string(),
                    },
                    finalize,
                )
            }
        };

        if !finalize {
            log_iteration(
                state.question(),
                iteration,
                Some(&sql),
                &format!("{} rows, not yet sufficient", result.row_count),
                "continue",
            );
            state.record(ContextEntry {
                iteration,
                thought,
                step: Step::ExecuteSql(SqlStep {
                    sql,
                    verdict,
                    outcome: SqlOutcome::Succeeded {
                        execution,
                        judgment,
                        answer: None,
                        synthesis_error: None,
                    },
                }),
            });
            return Flow::Continue;
        }

        let synthesized = self
            .synthesize(state.question(), &sql, &result, state.context())
            .await;

        let (answer, synthesis_error) = match synthesized {
            Ok(answer) => (answer, None),
            Err(e) => {
                warn!(iteration, "Answer synthesis failed ({e}), formatting the rows directly");
                sink.emit(AgentEvent::Error {
                    iteration,
                    message: format!("Answer synthesis failed: {e}"),
                });
                (formatted_answer(&result), Some(e.to_string()))
            }
        };

        log_iteration(
            state.question(),
            iteration,
            Some(&sql),
            &format!("{} rows, sufficient", result.row_count),
            "finish",
        );
        state.record(ContextEntry {
            iteration,
            thought,
            step: Step::ExecuteSql(SqlStep {
                sql,
                verdict,
                outcome: SqlOutcome::Succeeded {
                    execution,
                    judgment,
                    answer: Some(answer.clone()),
                    synthesis_error,
                },
            }),
        });

        sink.emit(AgentEvent::Answer {
            iteration,
            answer: answer.clone(),
        });
        state.finish(answer);
        Flow::Stop
    }

    /// Best-effort answer after the budget ran out.
    async fn finalize_without_answer(&self, state: &mut QueryState, sink: &EventSink) {
        let max_iterations = self.settings.max_iterations;
        let Some(last) = state.last_success.clone() else {
            let message = format!(
                "Exceeded the iteration budget ({max_iterations}) without a successful query"
            );
            warn!("{message}");
            state.error = Some(message);
            return;
        };

        info!(
            from_iteration = last.iteration,
            row_count = last.result.row_count,
            "Iteration budget exhausted, answering from the last successful result"
        );

        let answer = match scalar_answer(&last.result) {
            Some(answer) => answer,
            None => match self
                .synthesize(state.question(), &last.sql, &last.result, state.context())
                .await
            {
                Ok(answer) => answer,
                Err(e) => {
                    warn!("Fallback synthesis failed ({e}), formatting the rows directly");
                    sink.emit(AgentEvent::Error {
                        iteration: state.iteration,
                        message: format!("Answer synthesis failed: {e}"),
                    });
                    formatted_answer(&last.result)
                }
            },
        };

        sink.emit(AgentEvent::Answer {
            iteration: state.iteration,
            answer: answer.clone(),
        });
        state.finish(answer);
    }

    async fn synthesize(
        &self,
        question: &str,
        sql: &str,
        result: &QueryResult,
        context: &[ContextEntry],
    ) -> Result<String> {
        let packaged = package_result(result);
        if packaged.truncated {
            debug!(
                total_rows = packaged.total_rows,
                forwarded = packaged.rows.len(),
                "Result packaged for synthesis"
            );
        }
        let answer = self
            .bounded(
                "synthesis",
                self.synthesizer.synthesize(&SynthesisRequest {
                    question,
                    sql,
                    packaged: &packaged,
                    context,
                }),
            )
            .await?;

        if answer.trim().is_empty() {
            return Err(AgentError::llm("Synthesized answer was empty"));
        }
        Ok(answer)
    }

    /// Bounds a collaborator call by the configured timeout.
    async fn bounded<T>(
        &self,
        what: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let limit: Duration = self.settings.collaborator_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AgentError::timeout(format!(
                "{what} call exceeded {:.1}s",
                limit.as_secs_f64()
            ))),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
