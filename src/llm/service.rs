//! Model-backed collaborators for the orchestration loop.
//!
//! `LlmService` turns each collaborator call into prompt messages, sends
//! them through an [`LlmClient`], and shapes the reply. Model output is
//! untrusted: generation replies are parsed leniently, judgment replies are
//! handed back as raw text for the loop to normalize.

use async_trait::async_trait;
use chrono::Local;
use std::sync::Arc;
use std::time::Instant;

use crate::agent::{
    AnswerSynthesizer, Generation, GenerationRequest, JudgmentRequest, RawJudgment, SqlGenerator,
    SufficiencyJudge, SynthesisRequest,
};
use crate::error::{AgentError, Result};
use crate::llm::parser::parse_generation;
use crate::llm::prompt::{generation_messages, judgment_messages, synthesis_messages};
use crate::llm::types::Message;
use crate::llm::LlmClient;

/// Implements generation, judgment and synthesis on top of one model client.
pub struct LlmService {
    client: Arc<dyn LlmClient>,
    /// Schema description injected into generation prompts.
    schema: Option<String>,
}

impl LlmService {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            schema: None,
        }
    }

    /// Sets the schema document shown to the generation call.
    pub fn with_schema(mut self, schema: Option<String>) -> Self {
        self.schema = schema;
        self
    }

    async fn complete(&self, call: &'static str, messages: &[Message]) -> Result<String> {
        let start = Instant::now();
        tracing::debug!(call, message_count = messages.len(), "Sending request to LLM");

        let response = self.client.complete(messages).await?;

        tracing::debug!(
            call,
            llm_duration_ms = start.elapsed().as_millis() as u64,
            response_len = response.len(),
            "Received LLM response"
        );
        Ok(response)
    }
}

#[async_trait]
impl SqlGenerator for LlmService {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<Generation> {
        let today = Local::now().date_naive();
        let messages = generation_messages(request, self.schema.as_deref(), today);
        let response = self.complete("generation", &messages).await?;

        let generation = parse_generation(&response);
        tracing::debug!(action = generation.action.name(), "Parsed generation");
        Ok(generation)
    }
}

#[async_trait]
impl SufficiencyJudge for LlmService {
    async fn judge(&self, request: &JudgmentRequest<'_>) -> Result<RawJudgment> {
        let messages = judgment_messages(request);
        let response = self.complete("judgment", &messages).await?;
        Ok(RawJudgment::Text(response))
    }
}

#[async_trait]
impl AnswerSynthesizer for LlmService {
    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<String> {
        let messages = synthesis_messages(request);
        let response = self.complete("synthesis", &messages).await?;

        let answer = response.trim();
        if answer.is_empty() {
            return Err(AgentError::llm("Model returned an empty answer"));
        }
        Ok(answer.to_string())
    }
}
