//! Execution service for the ERP agent.
//!
//! Provides a trait-based interface for running gate-accepted SQL, so that
//! the orchestrator can be driven by PostgreSQL or by an in-memory mock.

mod mock;
mod postgres;
mod types;

pub use mock::MockDatabaseClient;
pub use postgres::PostgresClient;
pub use types::{ColumnInfo, QueryResult, Row, Value};
pub(crate) use types::duration_secs;

use crate::config::{ConnectionConfig, DatabaseConfig};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Creates a PostgreSQL client for the given connection and limits.
pub async fn connect(
    config: &ConnectionConfig,
    limits: &DatabaseConfig,
) -> Result<Arc<dyn DatabaseClient>> {
    let client = PostgresClient::connect(config, limits).await?;
    Ok(Arc::new(client))
}

/// Trait defining the interface for database clients.
///
/// Implementations cap the number of returned rows themselves; callers
/// never see more than the configured maximum.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Executes a SQL query and returns the results.
    async fn execute_query(&self, sql: &str) -> Result<QueryResult>;

    /// Closes the database connection.
    async fn close(&self) -> Result<()>;
}
