//! Mock LLM client for testing and offline runs.
//!
//! Answers come from, in order: the queue of scripted responses, the first
//! pattern that matches the request, or a canned reply for the task the
//! system prompt describes.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::{AgentError, Result};
use crate::llm::prompt::{GENERATION_ROLE, JUDGMENT_ROLE, SYNTHESIS_ROLE};
use crate::llm::types::{Message, Role};
use crate::llm::LlmClient;

/// Mock LLM client that returns canned responses.
#[derive(Debug, Clone, Default)]
pub struct MockLlmClient {
    /// Custom response mappings (pattern -> response).
    custom_responses: Vec<(String, String)>,
    /// Responses handed out once each, before anything else.
    queued: Arc<Mutex<VecDeque<std::result::Result<String, String>>>>,
    /// Every message list this client was asked to complete.
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a custom response mapping.
    ///
    /// When the last user message contains `pattern` (case-insensitive),
    /// the mock returns `response`.
    pub fn with_response(mut self, pattern: impl Into<String>, response: impl Into<String>) -> Self {
        self.custom_responses.push((pattern.into(), response.into()));
        self
    }

    /// Queues a response for the next unanswered call.
    pub fn with_queued(self, response: impl Into<String>) -> Self {
        self.push(Ok(response.into()));
        self
    }

    /// Queues a failure for the next unanswered call.
    pub fn with_queued_error(self, message: impl Into<String>) -> Self {
        self.push(Err(message.into()));
        self
    }

    fn push(&self, entry: std::result::Result<String, String>) {
        if let Ok(mut queue) = self.queued.lock() {
            queue.push_back(entry);
        }
    }

    /// Returns the message lists received so far.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Returns the number of completion calls made.
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    fn message_of(messages: &[Message], role: Role) -> &str {
        messages
            .iter()
            .rev()
            .find(|m| m.role == role)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    fn canned_response(system: &str, user: &str) -> String {
        if system.starts_with(JUDGMENT_ROLE) {
            return r#"{"completeness": 0.9, "is_sufficient": true, "key_findings": [], "anomalies": [], "suggestion": "", "next_action": "generate_answer"}"#
                .to_string();
        }

        if system.starts_with(SYNTHESIS_ROLE) {
            return "Here is what the payroll data shows (mock answer).".to_string();
        }

        if system.starts_with(GENERATION_ROLE) {
            let question = user.to_lowercase();
            if question.contains("hello") || question.contains("who are you") {
                return r#"{"thought": "No data needed.", "action": "answer", "answer": "Hello! Ask me anything about employees, salaries or attendance.", "is_final": true}"#
                    .to_string();
            }
            return r#"{"thought": "Count the employees.", "action": "execute_sql", "sql": "SELECT COUNT(*) AS employee_count FROM employees", "is_final": false}"#
                .to_string();
        }

        "I don't understand that request.".to_string()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }

        let queued = self.queued.lock().ok().and_then(|mut q| q.pop_front());
        if let Some(entry) = queued {
            return entry.map_err(AgentError::llm);
        }

        let user = Self::message_of(messages, Role::User);
        let user_lower = user.to_lowercase();
        for (pattern, response) in &self.custom_responses {
            if user_lower.contains(&pattern.to_lowercase()) {
                return Ok(response.clone());
            }
        }

        let system = Self::message_of(messages, Role::System);
        Ok(Self::canned_response(system, user))
    }
}
