//! Mock database client for testing.
//!
//! Provides an in-memory execution service whose results are scripted by
//! SQL substring, used by tests and by the binary's `--mock` mode.

use super::{ColumnInfo, DatabaseClient, QueryResult, Value};
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

enum Scripted {
    Rows(QueryResult),
    Error(String),
}

/// A mock database client that returns predefined results.
pub struct MockDatabaseClient {
    /// Pattern -> outcome, matched case-insensitively in insertion order.
    script: Vec<(String, Scripted)>,
    max_rows: usize,
    executed: Mutex<Vec<String>>,
}

impl MockDatabaseClient {
    /// Creates a new mock database client with no scripted outcomes.
    pub fn new() -> Self {
        Self {
            script: Vec::new(),
            max_rows: usize::MAX,
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Returns `result` for any SQL containing `pattern`.
    pub fn with_result(mut self, pattern: impl Into<String>, result: QueryResult) -> Self {
        self.script
            .push((pattern.into().to_lowercase(), Scripted::Rows(result)));
        self
    }

    /// Fails with `message` for any SQL containing `pattern`.
    pub fn with_error(mut self, pattern: impl Into<String>, message: impl Into<String>) -> Self {
        self.script
            .push((pattern.into().to_lowercase(), Scripted::Error(message.into())));
        self
    }

    /// Caps every scripted result at `max_rows`, like the real client does.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Returns every SQL string passed to `execute_query`, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Returns how many statements were executed.
    pub fn execution_count(&self) -> usize {
        self.executed.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    fn default_result(sql: &str) -> QueryResult {
        QueryResult::with_data(
            vec![ColumnInfo::new("result", "text")],
            vec![vec![Value::String(format!("Mock result for: {sql}"))]],
        )
    }
}

impl Default for MockDatabaseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(sql.to_string());
        }

        let lowered = sql.to_lowercase();
        let scripted = self
            .script
            .iter()
            .find(|(pattern, _)| lowered.contains(pattern.as_str()));

        let result = match scripted {
            Some((_, Scripted::Error(message))) => return Err(AgentError::query(message.clone())),
            Some((_, Scripted::Rows(result))) => result.clone(),
            None => Self::default_result(sql),
        };

        Ok(result
            .capped(self.max_rows)
            .with_execution_time(Duration::from_millis(1)))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_default_result() {
        let client = MockDatabaseClient::new();
        let result = client.execute_query("SELECT 1").await.unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(result.columns.len(), 1);
        assert_eq!(client.executed(), vec!["SELECT 1".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_scripted_by_substring() {
        let headcount = QueryResult::with_data(
            vec![ColumnInfo::new("count", "int8")],
            vec![vec![Value::Int(42)]],
        );
        let client = MockDatabaseClient::new()
            .with_error("FROM foo", "relation \"foo\" does not exist")
            .with_result("from employees", headcount);

        let err = client.execute_query("SELECT * from FOO").await.unwrap_err();
        assert_eq!(err.message(), "relation \"foo\" does not exist");

        let ok = client
            .execute_query("SELECT COUNT(*) FROM employees")
            .await
            .unwrap();
        assert_eq!(ok.rows[0][0], Value::Int(42));
        assert_eq!(client.execution_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_applies_row_cap() {
        let rows = (0..20).map(|i| vec![Value::Int(i)]).collect();
        let many = QueryResult::with_data(vec![ColumnInfo::new("n", "int4")], rows);
        let client = MockDatabaseClient::new()
            .with_result("numbers", many)
            .with_max_rows(5);

        let result = client.execute_query("SELECT n FROM numbers").await.unwrap();
        assert_eq!(result.row_count, 5);
        assert!(result.was_truncated);
    }
}
