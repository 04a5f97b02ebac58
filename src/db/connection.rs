//! The capability every engine-specific pooled connection provides.

use crate::error::DbResult;
use crate::models::{CellValue, EndpointInfo, EngineKind};
use async_trait::async_trait;
use serde::Serialize;

/// Trivial statement used to check that a physical connection is alive.
pub const PROBE_SQL: &str = "SELECT 1";

/// A live, forward-only handle over a query result.
///
/// A cursor holds the physical connection it was opened on. [`Cursor::close`]
/// releases the cursor, then its statement, then the connection. Dropping a
/// cursor without closing it releases the same resources.
#[async_trait]
pub trait Cursor: Send {
    /// Column names in result order. Duplicates are kept.
    fn columns(&self) -> &[String];

    /// Next row, one value per column, or `None` once the result is exhausted.
    async fn next_row(&mut self) -> DbResult<Option<Vec<CellValue>>>;

    async fn close(self: Box<Self>) -> DbResult<()>;
}

/// Snapshot of a pool's statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMetrics {
    pub database: EngineKind,
    pub connection_string: String,
    pub pool_name: &'static str,
    pub maximum_pool_size: u32,
    pub active_connections: u32,
    pub idle_connections: u32,
    pub total_connections: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads_awaiting_connection: Option<u32>,
}

/// A pool of physical connections to one database endpoint.
///
/// Implementations are shared behind `Arc` and must tolerate concurrent calls up
/// to the pool's size; callers beyond that wait for the engine's connect timeout.
#[async_trait]
pub trait PooledConnection: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> EngineKind;

    /// Credential-free URL of the endpoint.
    fn connection_string(&self) -> &str;

    fn endpoint(&self) -> &EndpointInfo;

    /// Run `sql` unchanged and return an open cursor over its result.
    async fn execute_query(&self, sql: &str) -> DbResult<Box<dyn Cursor>>;

    /// Run a mutating statement and return the number of affected rows.
    ///
    /// The physical connection is back in the pool when this returns.
    async fn execute_update(&self, sql: &str) -> DbResult<u64>;

    /// Like [`execute_query`](Self::execute_query) with the engine's explain prefix.
    async fn explain(&self, sql: &str) -> DbResult<Box<dyn Cursor>> {
        self.execute_query(&self.kind().explain_sql(sql)).await
    }

    /// Run [`PROBE_SQL`] and report whether a row came back.
    async fn test_connection(&self) -> DbResult<bool>;

    fn metrics(&self) -> PoolMetrics;

    /// Shut down the pool. Closing an already closed connection is a no-op.
    async fn close(&self) -> DbResult<()>;

    fn is_closed(&self) -> bool;
}

/// Hint shown alongside a failed connection attempt.
pub(crate) fn connection_suggestion(kind: EngineKind, error: &str) -> String {
    let error = error.to_lowercase();

    if error.contains("connection refused") || error.contains("timed out") {
        return format!(
            "Check that the {} server is running and accessible",
            kind
        );
    }

    if error.contains("authentication") || error.contains("password") {
        return "Verify the username and password".to_string();
    }

    if error.contains("does not exist") || error.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error.contains("tls") || error.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    format!(
        "Verify host and port (default {} port is {})",
        kind,
        kind.default_port()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_suggestion() {
        let hint = connection_suggestion(EngineKind::PostgreSQL, "Connection refused (os error 111)");
        assert!(hint.contains("PostgreSQL server is running"));

        let hint = connection_suggestion(EngineKind::ClickHouse, "password authentication failed");
        assert_eq!(hint, "Verify the username and password");

        let hint = connection_suggestion(EngineKind::ClickHouse, "something odd");
        assert!(hint.contains("8123"));
    }
}
