//! Error types for the query gateway.
//!
//! Every layer below the gateway returns a [`DbError`]. The gateway never interprets
//! or retries these; it wraps execution failures in [`ExecutionFailure`] so callers
//! can tell slow failures from fast ones.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    /// `message` is the driver's own text, unmodified.
    #[error("Query execution failed: {message}")]
    Execution {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("No active connection. Please establish a connection first.")]
    NoCurrentConnection,

    #[error("Connection not found: {connection_id}")]
    ConnectionNotFound { connection_id: String },

    #[error("Failed to close connection: {message}")]
    Close { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an execution error carrying the driver message verbatim.
    pub fn execution(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Execution {
            message: message.into(),
            sql_state,
        }
    }

    pub fn connection_not_found(connection_id: impl Into<String>) -> Self {
        Self::ConnectionNotFound {
            connection_id: connection_id.into(),
        }
    }

    pub fn close(message: impl Into<String>) -> Self {
        Self::Close {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::NoCurrentConnection => {
                Some("Connect to a database or pass an explicit connectionId")
            }
            Self::ConnectionNotFound { .. } => {
                Some("List the open connections to find a valid connectionId")
            }
            _ => None,
        }
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Connection { .. } => "CONNECTION_ERROR",
            Self::Execution { .. } => "EXECUTION_ERROR",
            Self::NoCurrentConnection => "NO_CURRENT_CONNECTION",
            Self::ConnectionNotFound { .. } => "CONNECTION_NOT_FOUND",
            Self::Close { .. } => "CLOSE_ERROR",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller can fix this by changing the request.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::Execution { .. }
                | Self::NoCurrentConnection
                | Self::ConnectionNotFound { .. }
                | Self::InvalidInput { .. }
        )
    }
}

/// Convert sqlx errors raised while running statements.
///
/// Pool construction maps its own errors to [`DbError::Connection`] with a suggestion,
/// so everything arriving here is an execution failure.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::execution(db_err.message(), code)
            }
            sqlx::Error::PoolTimedOut => {
                DbError::execution("Timed out waiting for a pooled connection", None)
            }
            sqlx::Error::PoolClosed => DbError::execution("Connection pool is closed", None),
            other => DbError::execution(other.to_string(), None),
        }
    }
}

impl From<clickhouse::error::Error> for DbError {
    fn from(err: clickhouse::error::Error) -> Self {
        DbError::execution(err.to_string(), None)
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// A gateway operation that failed after timing had started.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct ExecutionFailure {
    #[source]
    pub error: DbError,
    pub execution_time_ms: u64,
}

impl ExecutionFailure {
    pub fn new(error: DbError, elapsed: Duration) -> Self {
        Self {
            error,
            execution_time_ms: elapsed.as_millis() as u64,
        }
    }
}
