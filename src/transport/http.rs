//! HTTP transport for the query gateway.
//!
//! Maps JSON requests onto [`ExecutionGateway`] calls. Holds no state of its
//! own beyond the shared gateway.

use crate::error::{DbError, DbResult, ExecutionFailure};
use crate::gateway::ExecutionGateway;
use crate::models::{ConnectRequest, QueryRequest};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

/// Error body returned for every failed request.
#[derive(Debug)]
pub struct ApiError {
    error: DbError,
    execution_time_ms: Option<u64>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        if self.error.is_caller_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<DbError> for ApiError {
    fn from(error: DbError) -> Self {
        Self {
            error,
            execution_time_ms: None,
        }
    }
}

impl From<ExecutionFailure> for ApiError {
    fn from(failure: ExecutionFailure) -> Self {
        Self {
            error: failure.error,
            execution_time_ms: Some(failure.execution_time_ms),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    success: bool,
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    execution_time_ms: Option<u64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.error.kind(),
            message: self.error.to_string(),
            suggestion: self.error.suggestion(),
            execution_time_ms: self.execution_time_ms,
        };
        (self.status(), Json(body)).into_response()
    }
}

type ApiResult = Result<Json<JsonValue>, ApiError>;

/// Merge `success: true` into a serialized payload.
fn success(payload: impl Serialize) -> ApiResult {
    let mut value = serde_json::to_value(payload)
        .map_err(|e| DbError::internal(format!("Failed to serialize response: {}", e)))?;
    if let JsonValue::Object(map) = &mut value {
        map.insert("success".to_string(), JsonValue::Bool(true));
    }
    Ok(Json(value))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricsParams {
    connection_id: Option<String>,
}

type GatewayState = State<Arc<ExecutionGateway>>;

async fn connect(State(gateway): GatewayState, Json(request): Json<ConnectRequest>) -> ApiResult {
    let info = gateway.connect(&request).await?;
    success(json!({
        "connectionId": info.connection_id,
        "databaseType": info.database_type,
        "connectionString": info.connection_string,
        "message": format!("Connected to {} successfully", info.database_type),
    }))
}

async fn list_connections(State(gateway): GatewayState) -> ApiResult {
    success(gateway.list_connections().await)
}

async fn select_connection(
    State(gateway): GatewayState,
    Path(connection_id): Path<String>,
) -> ApiResult {
    let kind = gateway.select_connection(&connection_id).await?;
    success(json!({
        "connectionId": connection_id,
        "databaseType": kind,
        "message": "Connection selected",
    }))
}

async fn disconnect(State(gateway): GatewayState, Path(connection_id): Path<String>) -> ApiResult {
    gateway.disconnect(&connection_id).await?;
    success(json!({ "message": "Disconnected successfully" }))
}

async fn disconnect_all(State(gateway): GatewayState) -> ApiResult {
    gateway.disconnect_all().await?;
    success(json!({ "message": "All connections closed" }))
}

async fn metrics(State(gateway): GatewayState, Query(params): Query<MetricsParams>) -> ApiResult {
    let metrics = gateway.metrics(params.connection_id.as_deref()).await?;
    success(json!({ "metrics": metrics }))
}

async fn execute_query(State(gateway): GatewayState, Json(request): Json<QueryRequest>) -> ApiResult {
    let output = gateway
        .run_query(&request.sql, request.connection_id.as_deref())
        .await?;
    success(output)
}

async fn execute_update(
    State(gateway): GatewayState,
    Json(request): Json<QueryRequest>,
) -> ApiResult {
    let output = gateway
        .run_update(&request.sql, request.connection_id.as_deref())
        .await?;
    success(output)
}

async fn explain_query(
    State(gateway): GatewayState,
    Json(request): Json<QueryRequest>,
) -> ApiResult {
    let output = gateway
        .run_explain(&request.sql, request.connection_id.as_deref())
        .await?;
    success(output)
}

async fn health() -> Json<JsonValue> {
    Json(json!({ "status": "ok" }))
}

/// Routes for the gateway, rooted at `/api/v1`.
pub fn router(gateway: Arc<ExecutionGateway>) -> Router {
    let database = Router::new()
        .route("/connect", post(connect))
        .route("/connections", get(list_connections))
        .route("/select/{connection_id}", post(select_connection))
        .route("/disconnect/{connection_id}", post(disconnect))
        .route("/disconnect-all", post(disconnect_all))
        .route("/metrics", get(metrics));

    let query = Router::new()
        .route("/execute", post(execute_query))
        .route("/update", post(execute_update))
        .route("/explain", post(explain_query));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1/database", database)
        .nest("/api/v1/query", query)
        .with_state(gateway)
}

/// HTTP transport serving the gateway routes.
pub struct HttpTransport {
    gateway: Arc<ExecutionGateway>,
    host: String,
    port: u16,
}

impl HttpTransport {
    pub fn new(gateway: Arc<ExecutionGateway>, host: impl Into<String>, port: u16) -> Self {
        Self {
            gateway,
            host: host.into(),
            port,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Serve until SIGINT/SIGTERM, then close every registered connection.
    pub async fn run(&self) -> DbResult<()> {
        let bind_addr = self.bind_addr();
        let app = router(self.gateway.clone());

        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            DbError::connection(
                format!("Failed to bind to {}: {}", bind_addr, e),
                "Check that the port is available",
            )
        })?;

        info!(addr = %bind_addr, "HTTP server listening");

        // In-flight queries may hold the server open; force exit after this.
        const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_notify_clone = shutdown_notify.clone();

        let shutdown_signal = async move {
            wait_for_signal().await;
            shutdown_notify_clone.notify_one();
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        tokio::select! {
            result = server => {
                match result {
                    Ok(()) => info!("HTTP server stopped"),
                    Err(e) => {
                        error!(error = %e, "HTTP server error");
                        return Err(DbError::internal(format!("HTTP server error: {}", e)));
                    }
                }
            }
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for requests to finish (send signal again to force exit)..."
                );

                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => {}
        }

        info!("Closing database connections");
        if let Err(e) = self.gateway.disconnect_all().await {
            warn!(error = %e, "Some connections failed to close");
        }

        Ok(())
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ConnectionRegistry, DriverConnectionFactory};

    fn gateway() -> Arc<ExecutionGateway> {
        Arc::new(ExecutionGateway::new(
            Arc::new(ConnectionRegistry::new()),
            Arc::new(DriverConnectionFactory),
        ))
    }

    #[test]
    fn test_http_transport_bind_addr() {
        let transport = HttpTransport::new(gateway(), "0.0.0.0", 3000);
        assert_eq!(transport.bind_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_caller_errors_map_to_bad_request() {
        let err = ApiError::from(DbError::NoCurrentConnection);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = ApiError::from(DbError::config("Unknown database type: x"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_server_errors_map_to_internal() {
        let err = ApiError::from(DbError::connection("refused", "check server"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let err = ApiError::from(DbError::close("pool stuck"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_execution_failure_keeps_timing() {
        let failure = ExecutionFailure {
            error: DbError::execution("syntax error at or near \"SELEC\"", None),
            execution_time_ms: 12,
        };
        let err = ApiError::from(failure);
        assert_eq!(err.execution_time_ms, Some(12));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_success_adds_flag() {
        let Json(value) = success(json!({ "rowsAffected": 3 })).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["rowsAffected"], 3);
    }

    #[tokio::test]
    async fn test_router_builds() {
        let _router = router(gateway());
    }
}
