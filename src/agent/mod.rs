//! Query orchestration engine.
//!
//! Drives a natural-language question through iterative SQL generation,
//! safety gating, execution and sufficiency judgment until an answer is
//! produced or the iteration budget runs out.

pub mod collaborators;
pub mod diagnosis;
pub mod events;
mod fallback;
mod orchestrator;
pub mod packager;
pub mod state;
pub mod sufficiency;

pub use collaborators::{
    AnswerSynthesizer, GeneratedAction, Generation, GenerationRequest, JudgmentRequest,
    RawJudgment, SqlGenerator, SufficiencyJudge, SynthesisRequest,
};
pub use diagnosis::{classify_execution_error, ErrorCategory, ErrorDiagnosis};
pub use events::{AgentEvent, EventSink};
pub use fallback::{formatted_answer, scalar_answer};
pub use orchestrator::Orchestrator;
pub use packager::{package, package_result, Packaged, PackagedResult};
pub use state::{AgentResult, ContextEntry, ExecutionRecord, JudgmentOutcome, SqlOutcome, SqlStep, Step};
pub use sufficiency::{Decision, NextAction, SufficiencyJudgment};

use std::time::Duration;

/// Read-only settings for the orchestrator, fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentSettings {
    /// Maximum loop iterations per question.
    pub max_iterations: u32,
    /// Upper bound on each generation, execution, judgment or synthesis call.
    pub collaborator_timeout: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            collaborator_timeout: Duration::from_secs(120),
        }
    }
}

impl AgentSettings {
    /// Returns these settings with a different iteration budget.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Returns these settings with a different per-call timeout.
    pub fn with_collaborator_timeout(mut self, timeout: Duration) -> Self {
        self.collaborator_timeout = timeout;
        self
    }
}
