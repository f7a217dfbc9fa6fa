//! Configuration file integration tests.

use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use erp_agent::config::Config;
use tempfile::{NamedTempFile, TempDir};

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_missing_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let config = Config::load_from_file(&dir.path().join("absent.toml")).unwrap();

    assert_eq!(config, Config::default());
    let settings = config.agent_settings();
    assert_eq!(settings.max_iterations, 5);
    assert_eq!(settings.collaborator_timeout, Duration::from_secs(120));
}

#[test]
fn test_file_values_beat_environment() {
    let file = write_config(
        r#"
[llm]
model = "qwen-plus"

[agent]
max_iterations = 8

[database]
max_rows = 200
"#,
    );
    let mut config = Config::load_from_file(file.path()).unwrap();
    config.apply_env_from(env(&[
        ("OPENAI_MODEL", "gpt-4o"),
        ("MAX_ITERATIONS", "3"),
        ("MAX_RESULT_ROWS", "50"),
        ("SQL_TIMEOUT", "10"),
    ]));

    assert_eq!(config.llm.model, "qwen-plus");
    assert_eq!(config.agent.max_iterations, 8);
    assert_eq!(config.database.max_rows, 200);
    // Not in the file, so the environment applies.
    assert_eq!(config.database.statement_timeout_secs, 10);
    assert!(config.validate().is_ok());
}

#[test]
fn test_schema_document_is_read() {
    let dir = TempDir::new().unwrap();
    let schema_path = dir.path().join("schema.md");
    std::fs::write(&schema_path, "employees(employee_id, name, hire_date)").unwrap();

    let file = write_config(&format!(
        "[agent]\nschema_file = {:?}\n",
        schema_path.display().to_string()
    ));
    let config = Config::load_from_file(file.path()).unwrap();

    assert_eq!(
        config.load_schema_document().unwrap().as_deref(),
        Some("employees(employee_id, name, hire_date)")
    );
}

#[test]
fn test_missing_schema_document_is_config_error() {
    let file = write_config("[agent]\nschema_file = \"/nonexistent/schema.md\"\n");
    let config = Config::load_from_file(file.path()).unwrap();
    let err = config.load_schema_document().unwrap_err();
    assert!(err.to_string().contains("schema file"));
}

#[test]
fn test_invalid_values_fail_validation() {
    let file = write_config("[agent]\nmax_iterations = 0\n");
    let config = Config::load_from_file(file.path()).unwrap();
    assert!(config.validate().is_err());

    let file = write_config("[llm]\ntemperature = 1.5\n");
    let config = Config::load_from_file(file.path()).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_malformed_toml_names_the_file() {
    let file = write_config("[agent\nmax_iterations = 3");
    let err = Config::load_from_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("Configuration error"));
}

#[test]
fn test_named_connection_round_trip() {
    let file = write_config(
        r#"
[connections.reporting]
host = "replica.internal"
port = 6432
database = "erp"
user = "readonly"
sslmode = "require"
"#,
    );
    let config = Config::load_from_file(file.path()).unwrap();
    let conn = config.get_connection(Some("reporting")).unwrap();

    assert_eq!(
        conn.to_connection_string().unwrap(),
        "postgres://readonly@replica.internal:6432/erp?sslmode=require"
    );
    assert!(config.get_connection(None).is_none());
}
