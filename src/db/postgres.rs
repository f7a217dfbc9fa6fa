//! PostgreSQL database client implementation.
//!
//! Provides the `PostgresClient` struct that implements the `DatabaseClient` trait
//! for PostgreSQL databases using sqlx.

use crate::config::{ConnectionConfig, DatabaseConfig};
use crate::db::{ColumnInfo, DatabaseClient, QueryResult, Row, Value};
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column as SqlxColumn, Executor, Row as SqlxRow, TypeInfo};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// PostgreSQL database client.
#[derive(Debug)]
pub struct PostgresClient {
    pool: PgPool,
    max_rows: usize,
    statement_timeout: Duration,
}

impl PostgresClient {
    /// Creates a new PostgresClient from an existing connection pool.
    pub fn from_pool(pool: PgPool, limits: &DatabaseConfig) -> Self {
        Self {
            pool,
            max_rows: limits.max_rows,
            statement_timeout: limits.statement_timeout(),
        }
    }

    /// Connects to the database, retrying transient failures with backoff.
    pub async fn connect(config: &ConnectionConfig, limits: &DatabaseConfig) -> Result<Self> {
        let conn_str = config.to_connection_string()?;

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(10))
                .connect(&conn_str)
                .await;

            match result {
                Ok(pool) => {
                    debug!(target = %config.display_string(), "Connected to database");
                    return Ok(Self::from_pool(pool, limits));
                }
                Err(e) => {
                    let is_transient = is_transient_error(&e);
                    last_error = Some(e);

                    if !is_transient {
                        break;
                    }
                    if attempt < MAX_RETRY_ATTEMPTS {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        match last_error {
            Some(e) => Err(map_connection_error(e, config)),
            None => Err(AgentError::connection("No connection attempt was made")),
        }
    }

    /// Reads column metadata for a statement that returned no rows.
    async fn describe_columns(&self, sql: &str) -> Vec<ColumnInfo> {
        match (&self.pool).describe(sql).await {
            Ok(described) => described
                .columns()
                .iter()
                .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                .collect(),
            Err(e) => {
                debug!("Could not describe empty result: {e}");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl DatabaseClient for PostgresClient {
    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let start = Instant::now();
        let max_rows = self.max_rows;

        // Stream rows so that rows beyond the cap are counted but never kept.
        let fetch = async {
            let mut stream = sqlx::query(sql).fetch(&self.pool);
            let mut kept: Vec<PgRow> = Vec::new();
            let mut total = 0usize;
            while let Some(row) = stream.try_next().await? {
                total += 1;
                if kept.len() < max_rows {
                    kept.push(row);
                }
            }
            Ok::<_, sqlx::Error>((kept, total))
        };

        let (fetched, total_rows) = tokio::time::timeout(self.statement_timeout, fetch)
            .await
            .map_err(|_| {
                AgentError::query(format!(
                    "Query timed out after {} seconds",
                    self.statement_timeout.as_secs()
                ))
            })?
            .map_err(|e| AgentError::query(format_query_error(e)))?;

        let execution_time = start.elapsed();

        let columns: Vec<ColumnInfo> = match fetched.first() {
            Some(first_row) => first_row
                .columns()
                .iter()
                .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                .collect(),
            None => self.describe_columns(sql).await,
        };

        let was_truncated = total_rows > max_rows;
        if was_truncated {
            warn!(
                "Query returned {} rows, truncating to {} rows",
                total_rows, max_rows
            );
        }

        let rows: Vec<Row> = fetched.iter().map(convert_row).collect();
        let row_count = rows.len();

        debug!(
            row_count,
            duration_ms = execution_time.as_millis() as u64,
            "Query executed"
        );

        Ok(QueryResult {
            columns,
            rows,
            execution_time,
            row_count,
            total_rows: Some(total_rows),
            was_truncated,
        })
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Converts a sqlx PgRow to our Row type.
fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

/// Decodes a nullable column as `T` and maps it into a `Value`.
fn decode<'r, T>(row: &'r PgRow, index: usize, map: impl FnOnce(T) -> Value) -> Value
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<Option<T>, _>(index)
        .ok()
        .flatten()
        .map(map)
        .unwrap_or(Value::Null)
}

/// Converts a single column value from a PgRow to our Value type.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => decode::<bool>(row, index, Value::Bool),
        "INT2" | "SMALLINT" => decode::<i16>(row, index, |v| Value::Int(v as i64)),
        "INT4" | "INT" | "INTEGER" => decode::<i32>(row, index, |v| Value::Int(v as i64)),
        "INT8" | "BIGINT" => decode::<i64>(row, index, Value::Int),
        "FLOAT4" | "REAL" => decode::<f32>(row, index, |v| Value::Float(v as f64)),
        "FLOAT8" | "DOUBLE PRECISION" => decode::<f64>(row, index, Value::Float),
        "NUMERIC" | "DECIMAL" => decode::<rust_decimal::Decimal>(row, index, Value::from),
        "DATE" => decode::<chrono::NaiveDate>(row, index, |d| Value::String(d.to_string())),
        "TIMESTAMP" => decode::<chrono::NaiveDateTime>(row, index, |t| {
            Value::String(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }),
        "TIMESTAMPTZ" => decode::<chrono::DateTime<chrono::Utc>>(row, index, |t| {
            Value::String(t.to_rfc3339())
        }),
        "TIME" => decode::<chrono::NaiveTime>(row, index, |t| Value::String(t.to_string())),
        "BYTEA" => decode::<Vec<u8>>(row, index, Value::Bytes),
        _ => decode::<String>(row, index, Value::String),
    }
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
        || error_str.contains("does not exist")
    {
        return false;
    }

    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
}

/// Maps sqlx connection errors to user-friendly messages.
fn map_connection_error(error: sqlx::Error, config: &ConnectionConfig) -> AgentError {
    let host = config.host.as_deref().unwrap_or("localhost");
    let port = config.port;
    let user = config.user.as_deref().unwrap_or("unknown");
    let database = config.database.as_deref().unwrap_or("unknown");

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        AgentError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        AgentError::connection(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        AgentError::connection(format!("Database '{database}' does not exist."))
    } else if error_str.contains("ssl") || error_str.contains("tls") {
        AgentError::connection(
            "Server requires SSL. Add '?sslmode=require' to connection string.",
        )
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        AgentError::connection(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        AgentError::connection(error.to_string())
    }
}

/// Formats a query error, appending DETAIL and HINT lines when present.
///
/// The first line keeps PostgreSQL's own wording, which is what the
/// execution error classifier matches on.
fn format_query_error(error: sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = format!("ERROR: {}", db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }
        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests require a running PostgreSQL database and are skipped
    // unless DATABASE_URL is set.

    async fn get_test_client() -> Option<PostgresClient> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let config = ConnectionConfig::from_connection_string(&url).ok()?;
        PostgresClient::connect(&config, &DatabaseConfig::default())
            .await
            .ok()
    }

    #[tokio::test]
    async fn test_execute_select_query() {
        let Some(client) = get_test_client().await else {
            eprintln!("Skipping test: DATABASE_URL not set");
            return;
        };

        let result = client
            .execute_query("SELECT 1 AS num, 'hello' AS greeting, 12.50::numeric AS amount")
            .await
            .unwrap();

        assert_eq!(result.column_names(), vec!["num", "greeting", "amount"]);
        assert_eq!(result.row_count, 1);
        assert_eq!(result.rows[0][0], Value::Int(1));
        assert_eq!(result.rows[0][2], Value::Numeric("12.5".to_string()));

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_row_cap_counts_total() {
        let Some(client) = get_test_client().await else {
            eprintln!("Skipping test: DATABASE_URL not set");
            return;
        };

        let result = client
            .execute_query("SELECT g FROM generate_series(1, 1500) AS g")
            .await
            .unwrap();

        assert_eq!(result.row_count, 1000);
        assert_eq!(result.total_rows, Some(1500));
        assert!(result.was_truncated);

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_result_keeps_columns() {
        let Some(client) = get_test_client().await else {
            eprintln!("Skipping test: DATABASE_URL not set");
            return;
        };

        let result = client
            .execute_query("SELECT 1 AS one WHERE false")
            .await
            .unwrap();

        assert!(result.is_empty());
        assert_eq!(result.column_names(), vec!["one"]);

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_relation_error_text() {
        let Some(client) = get_test_client().await else {
            eprintln!("Skipping test: DATABASE_URL not set");
            return;
        };

        let error = client
            .execute_query("SELECT * FROM nonexistent_table_xyz")
            .await
            .unwrap_err();
        assert!(matches!(error, AgentError::Query(_)));
        assert!(error
            .message()
            .contains("relation \"nonexistent_table_xyz\" does not exist"));

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_error_messages() {
        let config = ConnectionConfig {
            host: Some("nonexistent.invalid.host".to_string()),
            port: 5432,
            database: Some("erp".to_string()),
            user: Some("reporter".to_string()),
            password: Some("secret".to_string()),
            sslmode: None,
        };

        let result = PostgresClient::connect(&config, &DatabaseConfig::default()).await;
        assert!(matches!(result, Err(AgentError::Connection(_))));
    }
}
