//! erp-agent - natural-language questions over payroll and HR data.

use anyhow::{Context, Result};
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use erp_agent::agent::{AgentEvent, AgentResult, Orchestrator};
use erp_agent::cli::Cli;
use erp_agent::config::{Config, ConnectionConfig};
use erp_agent::db::{self, ColumnInfo, DatabaseClient, MockDatabaseClient, QueryResult, Value};
use erp_agent::error::AgentError;
use erp_agent::llm::{self, LlmService, MockLlmClient};
use erp_agent::logging;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    match run().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}

/// Returns whether the last question was answered.
async fn run() -> Result<bool> {
    let cli = Cli::parse_args();

    let config_path = cli.config_path();
    let mut config = Config::load_from_file(&config_path)?;
    config.apply_env_defaults();
    if let Some(n) = cli.max_iterations {
        config.agent.max_iterations = n;
    }
    if let Some(path) = &cli.log_file {
        config.logging.file = Some(path.clone());
    }
    config.validate()?;

    match &config.logging.file {
        Some(path) => logging::init_file_logging(path, &config.logging.level),
        None => logging::init_stderr_logging(&config.logging.level),
    }
    info!("Loaded config from: {}", config_path.display());

    let orchestrator = Arc::new(build_orchestrator(&cli, &config).await?);

    let answered = match &cli.question {
        Some(question) => ask(&orchestrator, question, &cli).await,
        None => repl(&orchestrator, &cli).await?,
    };

    Ok(answered)
}

async fn build_orchestrator(cli: &Cli, config: &Config) -> Result<Orchestrator> {
    let settings = config.agent_settings();
    let schema = config.load_schema_document()?;

    if cli.mock {
        info!("Running with mock LLM and mock database");
        let service = LlmService::new(Arc::new(MockLlmClient::new())).with_schema(schema);
        let database = Arc::new(mock_database(config.database.max_rows));
        return Ok(Orchestrator::with_service(Arc::new(service), database, settings));
    }

    let connection = resolve_connection(cli, config)?.ok_or_else(|| {
        AgentError::config(
            "No database connection configured. Use --url, -H/-d/-U, -c <name> or DATABASE_URL.",
        )
    })?;
    info!("Connection: {}", connection.display_string());

    let database: Arc<dyn DatabaseClient> = db::connect(&connection, &config.database)
        .await
        .with_context(|| format!("Could not connect to {}", connection.display_string()))?;

    let client = llm::create_client(&config.llm)?;
    let service = LlmService::new(client).with_schema(schema);
    Ok(Orchestrator::with_service(Arc::new(service), database, settings))
}

/// Resolves the connection from CLI args, config file, and environment.
///
/// Precedence: CLI arguments, then the named or default connection from the
/// config file, then `DATABASE_URL`, with `PG*` variables filling gaps.
fn resolve_connection(cli: &Cli, config: &Config) -> Result<Option<ConnectionConfig>> {
    let mut connection = cli.to_connection_config()?;

    if connection.is_none() {
        if let Some(name) = cli.connection_name() {
            connection = config.get_connection(Some(name)).cloned();
            if connection.is_none() {
                return Err(AgentError::config(format!(
                    "Connection '{}' not found in config file",
                    name
                ))
                .into());
            }
        }
    }

    if connection.is_none() {
        connection = config.get_connection(None).cloned();
    }

    if connection.is_none() {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            connection = Some(ConnectionConfig::from_connection_string(&url)?);
        }
    }

    if let Some(ref mut conn) = connection {
        conn.apply_env_defaults();
    }

    Ok(connection)
}

/// An in-memory stand-in that answers the mock model's default query.
fn mock_database(max_rows: usize) -> MockDatabaseClient {
    MockDatabaseClient::new()
        .with_max_rows(max_rows)
        .with_result(
            "employee_count",
            QueryResult::with_data(
                vec![ColumnInfo::new("employee_count", "int8")],
                vec![vec![Value::Int(42)]],
            ),
        )
}

/// Reads questions from stdin until EOF or `exit`/`quit`.
async fn repl(orchestrator: &Arc<Orchestrator>, cli: &Cli) -> Result<bool> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last = true;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_lowercase().as_str(), "exit" | "quit") {
            break;
        }
        last = ask(orchestrator, question, cli).await;
    }

    Ok(last)
}

async fn ask(orchestrator: &Arc<Orchestrator>, question: &str, cli: &Cli) -> bool {
    let result = if cli.stream {
        let mut events = Arc::clone(orchestrator).query_stream(question);
        let mut last = None;
        while let Some(event) = events.next().await {
            print_event(&event, cli.json);
            if let AgentEvent::Final { result } = event {
                last = Some(result);
            }
        }
        match last {
            Some(result) => result,
            None => {
                warn!("Event stream ended without a final result");
                return false;
            }
        }
    } else {
        let result = orchestrator.query(question).await;
        if cli.json {
            print_json(&result);
        }
        result
    };

    if !cli.json {
        print_result(&result);
    }
    result.success
}

fn print_event(event: &AgentEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Could not serialize event: {e}"),
        }
        return;
    }

    match event {
        AgentEvent::IterationStarted {
            iteration,
            max_iterations,
        } => println!("[{iteration}/{max_iterations}] thinking..."),
        AgentEvent::Thought { thought, .. } => println!("  thought: {thought}"),
        AgentEvent::ActionChosen { action, .. } => println!("  action: {action}"),
        AgentEvent::SqlSubmitted { sql, .. } => println!("  sql: {sql}"),
        AgentEvent::ExecutionResult {
            success: true,
            row_count,
            execution_time,
            ..
        } => println!(
            "  executed: {row_count} rows in {:.3}s",
            execution_time.as_secs_f64()
        ),
        AgentEvent::ExecutionResult { error, .. } => {
            println!("  execution failed: {}", error.as_deref().unwrap_or("unknown error"))
        }
        AgentEvent::Judging { .. } => println!("  judging result..."),
        AgentEvent::Answer { .. } => {}
        AgentEvent::Error { message, .. } => println!("  error: {message}"),
        AgentEvent::Final { .. } => {}
    }
}

fn print_json(result: &AgentResult) {
    match serde_json::to_string_pretty(result) {
        Ok(text) => println!("{text}"),
        Err(e) => warn!("Could not serialize result: {e}"),
    }
}

fn print_result(result: &AgentResult) {
    match (&result.answer, &result.error) {
        (Some(answer), _) if result.success => println!("{answer}"),
        (_, Some(error)) => eprintln!("Failed after {} iterations: {error}", result.iteration_count),
        _ => eprintln!("Failed after {} iterations", result.iteration_count),
    }
}
