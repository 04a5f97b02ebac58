//! Row engine connection backed by a sqlx PostgreSQL pool.
//!
//! Statements are sent as raw SQL so PostgreSQL uses the simple query
//! protocol: nothing is prepared or bound, and values come back as text.

use crate::db::connection::{
    Cursor, PROBE_SQL, PoolMetrics, PooledConnection, connection_suggestion,
};
use crate::db::types;
use crate::error::{DbError, DbResult};
use crate::models::{CellValue, Endpoint, EndpointInfo, EngineKind};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Column, Either, Executor, PgPool, Postgres};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const KIND: EngineKind = EngineKind::PostgreSQL;

/// Rows buffered between the streaming task and its cursor.
const ROW_BUFFER: usize = 256;

#[derive(Debug)]
pub struct PostgresConnection {
    pool: PgPool,
    endpoint: EndpointInfo,
    connection_string: String,
}

impl PostgresConnection {
    /// Build the pool and open its first physical connection.
    pub async fn connect(endpoint: &Endpoint) -> DbResult<Self> {
        let tuning = KIND.pool_tuning();
        let connection_string =
            KIND.connection_string(&endpoint.host, endpoint.port, &endpoint.database);

        info!(
            connection_string = %connection_string,
            pool = KIND.pool_name(),
            max_size = tuning.max_size,
            "Creating connection pool"
        );

        let options = PgConnectOptions::new()
            .host(&endpoint.host)
            .port(endpoint.port)
            .database(&endpoint.database)
            .username(&endpoint.username)
            .password(&endpoint.password)
            .application_name(env!("CARGO_PKG_NAME"));

        let pool = PgPoolOptions::new()
            .max_connections(tuning.max_size)
            .min_connections(tuning.min_idle)
            .acquire_timeout(tuning.connect_timeout)
            .idle_timeout(tuning.idle_timeout)
            .max_lifetime(tuning.max_lifetime)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    conn.execute(PROBE_SQL).await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await
            .map_err(|e| {
                let message = e.to_string();
                DbError::connection(
                    format!("Failed to connect: {}", message),
                    connection_suggestion(KIND, &message),
                )
            })?;

        Ok(Self {
            pool,
            endpoint: endpoint.info(),
            connection_string,
        })
    }
}

#[async_trait]
impl PooledConnection for PostgresConnection {
    fn kind(&self) -> EngineKind {
        KIND
    }

    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn endpoint(&self) -> &EndpointInfo {
        &self.endpoint
    }

    async fn execute_query(&self, sql: &str) -> DbResult<Box<dyn Cursor>> {
        debug!(sql = %sql, "Executing query");
        let conn = self.pool.acquire().await?;
        let cursor = PgCursor::open(conn, sql.to_string()).await?;
        Ok(Box::new(cursor))
    }

    async fn execute_update(&self, sql: &str) -> DbResult<u64> {
        debug!(sql = %sql, "Executing update");
        let result = self.pool.execute(sql).await?;
        Ok(result.rows_affected())
    }

    async fn test_connection(&self) -> DbResult<bool> {
        let row = self.pool.fetch_optional(PROBE_SQL).await?;
        Ok(row.is_some())
    }

    fn metrics(&self) -> PoolMetrics {
        let total = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        PoolMetrics {
            database: KIND,
            connection_string: self.connection_string.clone(),
            pool_name: KIND.pool_name(),
            maximum_pool_size: KIND.pool_tuning().max_size,
            active_connections: total.saturating_sub(idle),
            idle_connections: idle,
            total_connections: total,
            threads_awaiting_connection: None,
        }
    }

    async fn close(&self) -> DbResult<()> {
        if self.pool.is_closed() {
            return Ok(());
        }
        self.pool.close().await;
        info!(connection_string = %self.connection_string, "Connection pool closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

// =============================================================================
// Cursor
// =============================================================================

enum CursorEvent {
    Columns(Vec<String>),
    Row(Vec<CellValue>),
    Done,
    Failed(DbError),
}

/// Cursor fed by a task that owns the physical connection.
///
/// Dropping the receiver stops the task, which drops the row stream and then
/// returns the connection to the pool.
struct PgCursor {
    columns: Vec<String>,
    events: mpsc::Receiver<CursorEvent>,
    task: JoinHandle<()>,
}

impl PgCursor {
    /// Start streaming and wait for the column header, so statement errors
    /// surface here rather than on the first row.
    async fn open(conn: PoolConnection<Postgres>, sql: String) -> DbResult<Self> {
        let (tx, mut events) = mpsc::channel(ROW_BUFFER);
        let task = tokio::spawn(stream_rows(conn, sql, tx));

        match events.recv().await {
            Some(CursorEvent::Columns(columns)) => Ok(Self {
                columns,
                events,
                task,
            }),
            Some(CursorEvent::Failed(e)) => {
                drop(events);
                let _ = task.await;
                Err(e)
            }
            _ => {
                drop(events);
                let _ = task.await;
                Err(DbError::internal("Row stream ended before the column header"))
            }
        }
    }
}

#[async_trait]
impl Cursor for PgCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_row(&mut self) -> DbResult<Option<Vec<CellValue>>> {
        match self.events.recv().await {
            Some(CursorEvent::Row(values)) => Ok(Some(values)),
            Some(CursorEvent::Done) => Ok(None),
            Some(CursorEvent::Failed(e)) => Err(e),
            Some(CursorEvent::Columns(_)) => {
                Err(DbError::internal("Unexpected column header in row stream"))
            }
            None => Err(DbError::internal("Row stream ended unexpectedly")),
        }
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        let PgCursor { events, task, .. } = *self;
        drop(events);
        task.await
            .map_err(|e| DbError::close(format!("Row stream task failed: {}", e)))
    }
}

/// Forward the first result set of `sql`.
///
/// Raw SQL may hold several statements; their results arrive on one stream,
/// separated by query results. Only rows up to the first query result that
/// follows a row are forwarded.
async fn stream_rows(
    mut conn: PoolConnection<Postgres>,
    sql: String,
    tx: mpsc::Sender<CursorEvent>,
) {
    let header_sent = match forward_first_result(&mut conn, &sql, &tx).await {
        Some(header_sent) => header_sent,
        None => return,
    };

    if !header_sent {
        let columns = describe_columns(&mut conn, &sql).await;
        if tx.send(CursorEvent::Columns(columns)).await.is_err() {
            return;
        }
    }
    let _ = tx.send(CursorEvent::Done).await;
}

/// Returns whether a header was sent, or `None` once the cursor is gone or
/// the statement failed.
async fn forward_first_result(
    conn: &mut PoolConnection<Postgres>,
    sql: &str,
    tx: &mpsc::Sender<CursorEvent>,
) -> Option<bool> {
    let mut results = (&mut **conn).fetch_many(sql);
    let mut header_sent = false;

    loop {
        let row = match results.try_next().await {
            Ok(Some(Either::Right(row))) => row,
            Ok(Some(Either::Left(_))) if header_sent => break,
            Ok(Some(Either::Left(_))) => continue,
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(CursorEvent::Failed(e.into())).await;
                return None;
            }
        };

        if !header_sent {
            let columns = types::pg_column_names(&row);
            if tx.send(CursorEvent::Columns(columns)).await.is_err() {
                return None;
            }
            header_sent = true;
        }

        if tx
            .send(CursorEvent::Row(types::stringify_pg_row(&row)))
            .await
            .is_err()
        {
            debug!("Cursor closed before the result was drained");
            return None;
        }
    }

    Some(header_sent)
}

/// Column names from the statement description, for results without rows.
///
/// Statements with no row description, or that cannot be described (several
/// statements in one string), have no columns.
async fn describe_columns(conn: &mut PoolConnection<Postgres>, sql: &str) -> Vec<String> {
    match (&mut **conn).describe(sql).await {
        Ok(description) => description
            .columns()
            .iter()
            .map(|column| column.name().to_string())
            .collect(),
        Err(e) => {
            debug!(error = %e, "Statement has no row description");
            Vec::new()
        }
    }
}
