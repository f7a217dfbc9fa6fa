//! Query execution integration tests.
//!
//! Tests SQL execution, row capping and error text against PostgreSQL.

use erp_agent::agent::{classify_execution_error, ErrorCategory};
use erp_agent::config::{ConnectionConfig, DatabaseConfig};
use erp_agent::db::{DatabaseClient, PostgresClient, Value};

/// Helper to get test database URL from environment.
fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

/// Helper to create a test client with the given row cap.
async fn get_test_client(max_rows: usize) -> Option<PostgresClient> {
    let url = get_test_database_url()?;
    let config = ConnectionConfig::from_connection_string(&url).ok()?;
    let limits = DatabaseConfig {
        max_rows,
        ..DatabaseConfig::default()
    };
    PostgresClient::connect(&config, &limits).await.ok()
}

#[tokio::test]
async fn test_execute_simple_select() {
    let Some(client) = get_test_client(1000).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = client
        .execute_query("SELECT 1 as num, 'hello' as greeting")
        .await
        .unwrap();

    assert_eq!(result.columns.len(), 2);
    assert_eq!(result.columns[0].name, "num");
    assert_eq!(result.columns[1].name, "greeting");
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0][0], Value::Int(1));
    assert_eq!(result.rows[0][1], Value::String("hello".to_string()));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_numeric_and_date_values() {
    let Some(client) = get_test_client(1000).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = client
        .execute_query("SELECT 8421.50::numeric AS salary, DATE '2024-03-01' AS paid_on, NULL::text AS note")
        .await
        .unwrap();

    assert_eq!(result.rows[0][0], Value::Numeric("8421.5".to_string()));
    assert!(result.rows[0][0].is_numeric());
    assert_eq!(result.rows[0][1], Value::String("2024-03-01".to_string()));
    assert!(result.rows[0][2].is_null());

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_rows_beyond_cap_are_dropped() {
    let Some(client) = get_test_client(10).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = client
        .execute_query("SELECT g FROM generate_series(1, 25) AS g")
        .await
        .unwrap();

    assert_eq!(result.row_count, 10);
    assert_eq!(result.total_rows, Some(25));
    assert!(result.was_truncated);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_empty_result_keeps_columns() {
    let Some(client) = get_test_client(1000).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = client
        .execute_query("SELECT 1 AS id WHERE false")
        .await
        .unwrap();

    assert!(result.is_empty());
    assert_eq!(result.column_names(), vec!["id".to_string()]);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_missing_relation_error_is_classified() {
    let Some(client) = get_test_client(1000).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let sql = "SELECT * FROM no_such_table_for_tests";
    let err = client.execute_query(sql).await.unwrap_err();
    let diagnosis = classify_execution_error(sql, err.message());

    assert_eq!(diagnosis.category, ErrorCategory::MissingRelation);
    assert_eq!(
        diagnosis.object_name.as_deref(),
        Some("no_such_table_for_tests")
    );

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_set_returning_in_where_is_classified() {
    let Some(client) = get_test_client(1000).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let sql = "SELECT 1 WHERE generate_series(1, 3) > 1";
    let err = client.execute_query(sql).await.unwrap_err();
    let diagnosis = classify_execution_error(sql, err.message());

    assert_eq!(diagnosis.category, ErrorCategory::SetReturningInFilter);

    client.close().await.unwrap();
}
