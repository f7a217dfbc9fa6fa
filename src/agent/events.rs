//! Progress events emitted while a question is processed.
//!
//! Both consumption modes read from the same channel: streaming callers see
//! every event, the synchronous path keeps only [`AgentEvent::Final`].

use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::agent::state::AgentResult;
use crate::db::duration_secs;

/// A state change in the orchestration loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    IterationStarted {
        iteration: u32,
        max_iterations: u32,
    },
    Thought {
        iteration: u32,
        thought: String,
    },
    ActionChosen {
        iteration: u32,
        action: String,
    },
    SqlSubmitted {
        iteration: u32,
        sql: String,
    },
    ExecutionResult {
        iteration: u32,
        success: bool,
        row_count: usize,
        #[serde(with = "duration_secs")]
        execution_time: Duration,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Judging {
        iteration: u32,
    },
    Answer {
        iteration: u32,
        answer: String,
    },
    Error {
        iteration: u32,
        message: String,
    },
    Final {
        result: AgentResult,
    },
}

impl AgentEvent {
    /// Returns true for the terminal event.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final { .. })
    }
}

/// Producer half of the event channel.
///
/// Sending never fails from the loop's point of view; a dropped receiver
/// only means nobody is listening any more.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl EventSink {
    /// Creates a sink and the matching receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emits an event, ignoring a disconnected consumer.
    pub fn emit(&self, event: AgentEvent) {
        let _ = self.tx.send(event);
    }

    /// Returns true once the consumer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
