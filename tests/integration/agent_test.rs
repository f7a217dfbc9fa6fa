//! End-to-end orchestration tests.
//!
//! Drives the orchestrator through `LlmService` with a scripted model and
//! the in-memory database, so every prompt and every loop decision is real.

use futures::StreamExt;
use pretty_assertions::assert_eq;
use std::sync::Arc;

use erp_agent::agent::{AgentEvent, AgentSettings, Orchestrator, SqlOutcome};
use erp_agent::db::{ColumnInfo, MockDatabaseClient, QueryResult, Value};
use erp_agent::llm::{LlmService, MockLlmClient};

fn sql_reply(thought: &str, sql: &str) -> String {
    serde_json::json!({
        "thought": thought,
        "action": "execute_sql",
        "sql": sql,
        "is_final": false
    })
    .to_string()
}

const SUFFICIENT: &str = r#"```json
{"completeness": 1.0, "is_sufficient": true, "key_findings": ["42 active employees"], "anomalies": [], "suggestion": "", "next_action": "generate_answer"}
```"#;

const NEEDS_MORE: &str =
    r#"{"completeness": 0.3, "is_sufficient": false, "next_action": "continue_query", "suggestion": "break down by department"}"#;

fn headcount() -> QueryResult {
    QueryResult::with_data(
        vec![ColumnInfo::new("employee_count", "int8")],
        vec![vec![Value::Int(42)]],
    )
}

fn by_department() -> QueryResult {
    QueryResult::with_data(
        vec![
            ColumnInfo::new("department", "text"),
            ColumnInfo::new("headcount", "int8"),
        ],
        vec![
            vec![Value::from("Finance"), Value::Int(12)],
            vec![Value::from("Engineering"), Value::Int(30)],
        ],
    )
}

fn orchestrator(
    client: &MockLlmClient,
    db: &Arc<MockDatabaseClient>,
    max_iterations: u32,
) -> Orchestrator {
    let service = LlmService::new(Arc::new(client.clone()));
    Orchestrator::with_service(
        Arc::new(service),
        db.clone(),
        AgentSettings::default().with_max_iterations(max_iterations),
    )
}

#[tokio::test]
async fn test_single_pass_answer() {
    let client = MockLlmClient::new()
        .with_queued(sql_reply(
            "Count active employees.",
            "SELECT COUNT(*) AS employee_count FROM employees WHERE status = 'active'",
        ))
        .with_queued(SUFFICIENT)
        .with_queued("There are 42 active employees.");
    let db = Arc::new(MockDatabaseClient::new().with_result("from employees", headcount()));

    let result = orchestrator(&client, &db, 5)
        .query("How many active employees do we have?")
        .await;

    assert!(result.success);
    assert_eq!(result.iteration_count, 1);
    assert_eq!(result.answer.as_deref(), Some("There are 42 active employees."));
    assert_eq!(db.execution_count(), 1);
    assert_eq!(client.call_count(), 3);
}

#[tokio::test]
async fn test_synthesis_outage_still_answers_from_rows() {
    let client = MockLlmClient::new()
        .with_queued(sql_reply(
            "Headcount per department.",
            "SELECT d.name AS department, COUNT(*) AS headcount FROM employees e JOIN departments d USING (department_id) GROUP BY d.name",
        ))
        .with_queued(SUFFICIENT)
        .with_queued_error("503 Service Unavailable");
    let db = Arc::new(MockDatabaseClient::new().with_result("group by d.name", by_department()));

    let result = orchestrator(&client, &db, 5)
        .query("How many people work in each department?")
        .await;

    assert!(result.success);
    assert_eq!(result.iteration_count, 1);
    assert_eq!(db.execution_count(), 1);
    assert_eq!(
        result.answer.as_deref(),
        Some("The query returned 2 records:\n1. department: Finance, headcount: 12\n2. department: Engineering, headcount: 30")
    );
}

#[tokio::test]
async fn test_execution_error_feeds_next_prompt() {
    let client = MockLlmClient::new()
        .with_queued(sql_reply("Use the staff table.", "SELECT COUNT(*) FROM staff"))
        .with_queued(sql_reply(
            "The table is called employees.",
            "SELECT COUNT(*) AS employee_count FROM employees",
        ))
        .with_queued(SUFFICIENT)
        .with_queued("42 employees.");
    let db = Arc::new(
        MockDatabaseClient::new()
            .with_error("from staff", "ERROR: relation \"staff\" does not exist")
            .with_result("from employees", headcount()),
    );

    let result = orchestrator(&client, &db, 5).query("Headcount?").await;

    assert!(result.success);
    assert_eq!(result.iteration_count, 2);
    assert!(matches!(
        result.context_log[0].sql_step().unwrap().outcome,
        SqlOutcome::Failed { .. }
    ));

    let second_prompt = &client.requests()[1][1].content;
    assert!(second_prompt.contains("ERROR FEEDBACK"));
    assert!(second_prompt.contains("missing_relation"));
    assert!(second_prompt.contains("staff"));
}

#[tokio::test]
async fn test_unsafe_sql_never_reaches_database() {
    let client = MockLlmClient::new()
        .with_queued(sql_reply("Clean up.", "DELETE FROM employees WHERE status = 'terminated'"))
        .with_queued(r#"{"thought": "I can only read data.", "action": "answer", "answer": "I can only run read-only queries."}"#);
    let db = Arc::new(MockDatabaseClient::new());

    let result = orchestrator(&client, &db, 5)
        .query("Remove terminated employees")
        .await;

    assert_eq!(db.execution_count(), 0);
    assert!(result.success);
    assert_eq!(result.iteration_count, 2);
    let step = result.context_log[0].sql_step().unwrap();
    assert!(!step.verdict.accepted);
    assert!(client.requests()[1][1].content.contains("failed validation"));
}

#[tokio::test]
async fn test_continue_then_answer() {
    let client = MockLlmClient::new()
        .with_queued(sql_reply("Total first.", "SELECT COUNT(*) AS employee_count FROM employees"))
        .with_queued(NEEDS_MORE)
        .with_queued(sql_reply(
            "Now by department.",
            "SELECT department, COUNT(*) AS headcount FROM employees GROUP BY department",
        ))
        .with_queued(SUFFICIENT)
        .with_queued("Engineering has 30 people and Finance has 12.");
    let db = Arc::new(
        MockDatabaseClient::new()
            .with_result("group by department", by_department())
            .with_result("from employees", headcount()),
    );

    let result = orchestrator(&client, &db, 5)
        .query("Headcount by department?")
        .await;

    assert!(result.success);
    assert_eq!(result.iteration_count, 2);
    assert_eq!(db.execution_count(), 2);
    // The second generation prompt shows the first step.
    assert!(client.requests()[2][1].content.contains("PREVIOUS STEPS"));
}

#[tokio::test]
async fn test_plain_text_judgment_is_tolerated() {
    let client = MockLlmClient::new()
        .with_queued(sql_reply("Count.", "SELECT COUNT(*) AS employee_count FROM employees"))
        .with_queued("Yes, this result is complete and answers the question.")
        .with_queued("42.");
    let db = Arc::new(MockDatabaseClient::new().with_result("from employees", headcount()));

    let result = orchestrator(&client, &db, 5).query("Headcount?").await;

    assert!(result.success);
    assert_eq!(result.iteration_count, 1);
}

#[tokio::test]
async fn test_unparseable_first_generation_aborts() {
    let client = MockLlmClient::new().with_queued("Sorry, I cannot help with that.");
    let db = Arc::new(MockDatabaseClient::new());

    let result = orchestrator(&client, &db, 5).query("Headcount?").await;

    assert!(!result.success);
    assert_eq!(result.iteration_count, 1);
    assert!(result.error.unwrap().contains("Could not parse"));
    assert_eq!(db.execution_count(), 0);
}

#[tokio::test]
async fn test_budget_exhaustion_falls_back_to_scalar() {
    let client = MockLlmClient::new()
        .with_queued(sql_reply("Count.", "SELECT COUNT(*) AS employee_count FROM employees"))
        .with_queued(NEEDS_MORE)
        .with_queued(sql_reply("Count again.", "SELECT COUNT(*) AS employee_count FROM employees"))
        .with_queued(NEEDS_MORE);
    let db = Arc::new(MockDatabaseClient::new().with_result("from employees", headcount()));

    let result = orchestrator(&client, &db, 2).query("Headcount?").await;

    assert!(result.success);
    assert_eq!(result.iteration_count, 2);
    assert_eq!(result.answer.as_deref(), Some("There are 42 records."));
    // Two generations and two judgments; the scalar answer needs no synthesis.
    assert_eq!(client.call_count(), 4);
}

#[tokio::test]
async fn test_default_mock_pipeline_streams_to_final() {
    let client = MockLlmClient::new();
    let db = Arc::new(MockDatabaseClient::new().with_result("employee_count", headcount()));
    let orchestrator = Arc::new(orchestrator(&client, &db, 5));

    let events: Vec<AgentEvent> = orchestrator
        .clone()
        .query_stream("How many employees are there?")
        .collect()
        .await;

    assert!(matches!(events.first(), Some(AgentEvent::IterationStarted { iteration: 1, .. })));
    assert!(events.iter().any(|e| matches!(e, AgentEvent::SqlSubmitted { .. })));
    assert_eq!(events.iter().filter(|e| e.is_final()).count(), 1);

    let Some(AgentEvent::Final { result }) = events.last() else {
        panic!("stream did not end with a final event");
    };
    assert!(result.success);

    // The synchronous path gives the same shape of result.
    let sync = orchestrator.query("How many employees are there?").await;
    assert_eq!(sync.success, result.success);
    assert_eq!(sync.answer, result.answer);
    assert_eq!(sync.iteration_count, result.iteration_count);
}
