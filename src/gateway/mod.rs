//! Execution gateway.
//!
//! The single entry point the HTTP layer calls into. Resolves the target
//! connection, runs the statement, projects any result and releases the
//! cursor, and times the whole request.

pub mod projector;

use crate::db::{ConnectionFactory, ConnectionRegistry, Cursor, PoolMetrics, PooledConnection};
use crate::error::{DbError, DbResult, ExecutionFailure};
use crate::models::{
    ConnectRequest, ConnectionInfo, ConnectionList, Endpoint, EngineKind, ExplainOutput,
    QueryOutput, TabularResult, UpdateOutput,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub use projector::project;

pub struct ExecutionGateway {
    registry: Arc<ConnectionRegistry>,
    factory: Arc<dyn ConnectionFactory>,
}

impl ExecutionGateway {
    pub fn new(registry: Arc<ConnectionRegistry>, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self { registry, factory }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Open, probe and register a connection. It becomes the current one.
    ///
    /// Unknown engine names fail before any network activity.
    pub async fn connect(&self, request: &ConnectRequest) -> DbResult<ConnectionInfo> {
        let endpoint = &request.endpoint;
        info!(
            db_type = %request.database_type,
            host = %endpoint.host,
            port = endpoint.port,
            database = %endpoint.database,
            "Connecting to database"
        );

        let connection = self
            .factory
            .create_from_text(&request.database_type, endpoint)
            .await?;
        self.register(connection).await
    }

    pub async fn connect_with(
        &self,
        kind: EngineKind,
        endpoint: &Endpoint,
    ) -> DbResult<ConnectionInfo> {
        info!(
            db_type = %kind,
            host = %endpoint.host,
            port = endpoint.port,
            database = %endpoint.database,
            "Connecting to database"
        );

        let connection = self.factory.create(kind, endpoint).await?;
        self.register(connection).await
    }

    /// A failed or negative probe closes the new pool and nothing is registered.
    async fn register(&self, connection: Arc<dyn PooledConnection>) -> DbResult<ConnectionInfo> {
        let kind = connection.kind();
        let rejection = match connection.test_connection().await {
            Ok(true) => None,
            Ok(false) => Some("Connection test returned no rows".to_string()),
            Err(e) => Some(format!("Connection test failed: {}", e)),
        };

        if let Some(reason) = rejection {
            warn!(db_type = %kind, reason = %reason, "Rejecting connection");
            if let Err(e) = connection.close().await {
                warn!(error = %e, "Failed to close rejected connection");
            }
            return Err(DbError::connection(
                reason,
                "Verify the endpoint accepts queries with these credentials",
            ));
        }

        let connection_string = connection.connection_string().to_string();
        let connection_id = self.registry.add(connection).await;

        info!(connection_id = %connection_id, db_type = %kind, "Connected successfully");
        Ok(ConnectionInfo {
            connection_id,
            database_type: kind,
            connection_string,
        })
    }

    pub async fn list_connections(&self) -> ConnectionList {
        let connections = self.registry.list().await;
        let current_connection_id = connections
            .iter()
            .find(|summary| summary.is_current)
            .map(|summary| summary.connection_id.clone());
        ConnectionList {
            connection_count: connections.len(),
            current_connection_id,
            connections,
        }
    }

    pub async fn select_connection(&self, connection_id: &str) -> DbResult<EngineKind> {
        self.registry.set_current(connection_id).await?;
        let connection = self.resolve_target(Some(connection_id)).await?;
        Ok(connection.kind())
    }

    pub async fn disconnect(&self, connection_id: &str) -> DbResult<()> {
        self.registry.remove(connection_id).await
    }

    pub async fn disconnect_all(&self) -> DbResult<()> {
        self.registry.remove_all().await
    }

    pub async fn metrics(&self, connection_id: Option<&str>) -> DbResult<PoolMetrics> {
        let connection = self.resolve_target(connection_id).await?;
        Ok(connection.metrics())
    }

    /// An explicit identifier must exist; otherwise the current connection is used.
    /// Empty identifiers count as absent.
    pub async fn resolve_target(
        &self,
        connection_id: Option<&str>,
    ) -> DbResult<Arc<dyn PooledConnection>> {
        match connection_id.filter(|id| !id.is_empty()) {
            Some(id) => self
                .registry
                .get(id)
                .await
                .ok_or_else(|| DbError::connection_not_found(id)),
            None => self.registry.current().await,
        }
    }

    // =========================================================================
    // Execution
    // =========================================================================

    pub async fn run_query(
        &self,
        sql: &str,
        connection_id: Option<&str>,
    ) -> Result<QueryOutput, ExecutionFailure> {
        let start = Instant::now();
        let fail = |error: DbError| failure("query", error, start);

        validate_sql(sql).map_err(fail)?;
        let connection = self.resolve_target(connection_id).await.map_err(fail)?;
        let cursor = connection.execute_query(sql).await.map_err(fail)?;
        let data = drain(cursor).await.map_err(fail)?;

        let execution_time_ms = start.elapsed().as_millis() as u64;
        debug!(rows = data.row_count, execution_time_ms, "Query completed");
        Ok(QueryOutput {
            data,
            execution_time_ms,
            database_type: connection.kind(),
        })
    }

    pub async fn run_update(
        &self,
        sql: &str,
        connection_id: Option<&str>,
    ) -> Result<UpdateOutput, ExecutionFailure> {
        let start = Instant::now();
        let fail = |error: DbError| failure("update", error, start);

        validate_sql(sql).map_err(fail)?;
        let connection = self.resolve_target(connection_id).await.map_err(fail)?;
        let rows_affected = connection.execute_update(sql).await.map_err(fail)?;

        let execution_time_ms = start.elapsed().as_millis() as u64;
        debug!(rows_affected, execution_time_ms, "Update completed");
        Ok(UpdateOutput {
            rows_affected,
            execution_time_ms,
            database_type: connection.kind(),
        })
    }

    pub async fn run_explain(
        &self,
        sql: &str,
        connection_id: Option<&str>,
    ) -> Result<ExplainOutput, ExecutionFailure> {
        let start = Instant::now();
        let fail = |error: DbError| failure("explain", error, start);

        validate_sql(sql).map_err(fail)?;
        let connection = self.resolve_target(connection_id).await.map_err(fail)?;
        let cursor = connection.explain(sql).await.map_err(fail)?;
        let data = drain(cursor).await.map_err(fail)?;

        let kind = connection.kind();
        let execution_time_ms = start.elapsed().as_millis() as u64;
        debug!(rows = data.row_count, execution_time_ms, "Explain completed");
        Ok(ExplainOutput {
            data,
            execution_time_ms,
            database_type: kind,
            query_type: kind.explain_label(),
        })
    }
}

fn validate_sql(sql: &str) -> DbResult<()> {
    if sql.trim().is_empty() {
        return Err(DbError::invalid_input("SQL statement is required"));
    }
    Ok(())
}

fn failure(operation: &'static str, error: DbError, start: Instant) -> ExecutionFailure {
    let failure = ExecutionFailure::new(error, start.elapsed());
    error!(
        operation,
        execution_time_ms = failure.execution_time_ms,
        error = %failure.error,
        "Execution failed"
    );
    failure
}

/// Project the cursor, then release it whatever the outcome.
async fn drain(mut cursor: Box<dyn Cursor>) -> DbResult<TabularResult> {
    let projected = project(cursor.as_mut()).await;
    let released = cursor.close().await;

    match (projected, released) {
        (Ok(data), Ok(())) => Ok(data),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), released) => {
            if let Err(close_err) = released {
                warn!(error = %close_err, "Failed to release cursor after error");
            }
            Err(e)
        }
    }
}
