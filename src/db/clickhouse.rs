//! Column engine connection over ClickHouse's HTTP interface.
//!
//! The `clickhouse` client is stateless, so pooling is done with `deadpool`:
//! every pooled object is a client bound to its own server session, which
//! bounds concurrency the same way a pool of sockets would.

use crate::db::connection::{
    Cursor, PROBE_SQL, PoolMetrics, PooledConnection, connection_suggestion,
};
use crate::db::types;
use crate::error::{DbError, DbResult};
use crate::models::{CellValue, Endpoint, EndpointInfo, EngineKind, PoolTuning};
use async_trait::async_trait;
use clickhouse::Client;
use clickhouse::query::BytesCursor;
use deadpool::Runtime;
use deadpool::managed::{Manager, Metrics, Object, Pool, PoolError, RecycleError, RecycleResult};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

const KIND: EngineKind = EngineKind::ClickHouse;

/// First line holds column names, second line column types, then one JSON
/// array per row. Keeps column order and duplicate names intact.
const RESULT_FORMAT: &str = "JSONCompactEachRowWithNamesAndTypes";

const REAPER_INTERVAL: Duration = Duration::from_secs(30);

// =============================================================================
// Pool manager
// =============================================================================

/// Creates one ClickHouse session per pooled object.
pub struct SessionManager {
    url: String,
    user: String,
    password: String,
    database: String,
    tuning: PoolTuning,
}

impl SessionManager {
    fn new(endpoint: &Endpoint, tuning: PoolTuning) -> Self {
        Self {
            url: format!("http://{}:{}", endpoint.host, endpoint.port),
            user: endpoint.username.clone(),
            password: endpoint.password.clone(),
            database: endpoint.database.clone(),
            tuning,
        }
    }
}

impl Manager for SessionManager {
    type Type = Client;
    type Error = DbError;

    async fn create(&self) -> Result<Client, DbError> {
        let client = Client::default()
            .with_url(&self.url)
            .with_user(&self.user)
            .with_password(&self.password)
            .with_database(&self.database)
            .with_option("session_id", Uuid::new_v4().to_string());

        client.query(PROBE_SQL).execute().await?;
        Ok(client)
    }

    async fn recycle(&self, _client: &mut Client, metrics: &Metrics) -> RecycleResult<DbError> {
        if metrics.age() >= self.tuning.max_lifetime {
            return Err(RecycleError::Backend(DbError::internal(
                "Session exceeded its maximum lifetime",
            )));
        }
        if metrics.last_used() >= self.tuning.idle_timeout {
            return Err(RecycleError::Backend(DbError::internal(
                "Session exceeded its idle timeout",
            )));
        }
        Ok(())
    }
}

fn pool_error(err: PoolError<DbError>) -> DbError {
    match err {
        PoolError::Backend(e) => e,
        PoolError::Timeout(_) => {
            DbError::execution("Timed out waiting for a pooled connection", None)
        }
        PoolError::Closed => DbError::execution("Connection pool is closed", None),
        other => DbError::execution(other.to_string(), None),
    }
}

// =============================================================================
// Connection
// =============================================================================

pub struct ClickHouseConnection {
    pool: Pool<SessionManager>,
    endpoint: EndpointInfo,
    connection_string: String,
    reaper: JoinHandle<()>,
    closed: AtomicBool,
}

impl ClickHouseConnection {
    /// Build the pool and open `min_idle` sessions up front.
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

        let pool = Pool::builder(SessionManager::new(endpoint, tuning))
            .max_size(tuning.max_size as usize)
            .wait_timeout(Some(tuning.connect_timeout))
            .create_timeout(Some(tuning.connect_timeout))
            .recycle_timeout(Some(tuning.connect_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| {
                DbError::connection(
                    format!("Failed to build connection pool: {}", e),
                    "Check the pool configuration",
                )
            })?;

        let warm_up = (0..tuning.min_idle).map(|_| pool.get());
        match futures_util::future::try_join_all(warm_up).await {
            Ok(sessions) => drop(sessions),
            Err(e) => {
                pool.close();
                let message = e.to_string();
                return Err(DbError::connection(
                    format!("Failed to connect: {}", message),
                    connection_suggestion(KIND, &message),
                ));
            }
        }

        let reaper = spawn_reaper(pool.clone(), tuning);

        Ok(Self {
            pool,
            endpoint: endpoint.info(),
            connection_string,
            reaper,
            closed: AtomicBool::new(false),
        })
    }
}

impl std::fmt::Debug for ClickHouseConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseConnection")
            .field("connection_string", &self.connection_string)
            .field("status", &self.pool.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for ClickHouseConnection {
    fn drop(&mut self) {
        self.reaper.abort();
    }
}

#[async_trait]
impl PooledConnection for ClickHouseConnection {
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
        let session = self.pool.get().await.map_err(pool_error)?;
        let cursor = ChCursor::open(session, sql).await?;
        Ok(Box::new(cursor))
    }

    /// The HTTP interface does not report affected rows, so this returns 0.
    async fn execute_update(&self, sql: &str) -> DbResult<u64> {
        debug!(sql = %sql, "Executing update");
        let session = self.pool.get().await.map_err(pool_error)?;
        session.query(&escape_placeholders(sql)).execute().await?;
        Ok(0)
    }

    async fn test_connection(&self) -> DbResult<bool> {
        let mut cursor = self.execute_query(PROBE_SQL).await?;
        let mut found = false;
        while cursor.next_row().await?.is_some() {
            found = true;
        }
        cursor.close().await?;
        Ok(found)
    }

    fn metrics(&self) -> PoolMetrics {
        let status = self.pool.status();
        let total = status.size as u32;
        let idle = status.available as u32;
        PoolMetrics {
            database: KIND,
            connection_string: self.connection_string.clone(),
            pool_name: KIND.pool_name(),
            maximum_pool_size: status.max_size as u32,
            active_connections: total.saturating_sub(idle),
            idle_connections: idle,
            total_connections: total,
            threads_awaiting_connection: Some(status.waiting as u32),
        }
    }

    async fn close(&self) -> DbResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.reaper.abort();
        self.pool.close();
        info!(connection_string = %self.connection_string, "Connection pool closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.pool.is_closed()
    }
}

/// Evict sessions idle past the timeout, keeping at least `min_idle`.
fn spawn_reaper(pool: Pool<SessionManager>, tuning: PoolTuning) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REAPER_INTERVAL);
        loop {
            ticker.tick().await;
            if pool.is_closed() {
                break;
            }
            reap_idle(&pool, tuning);
        }
    })
}

fn reap_idle(pool: &Pool<SessionManager>, tuning: PoolTuning) {
    let mut removable = pool.status().size.saturating_sub(tuning.min_idle as usize);
    let result = pool.retain(|_, metrics| {
        if removable > 0 && metrics.last_used() >= tuning.idle_timeout {
            removable -= 1;
            return false;
        }
        true
    });
    if !result.removed.is_empty() {
        debug!(removed = result.removed.len(), "Evicted idle sessions");
    }
}

// =============================================================================
// Statement preparation
// =============================================================================

/// The client treats `?` as a bind placeholder; `??` is a literal `?`.
fn escape_placeholders(sql: &str) -> String {
    sql.replace('?', "??")
}

/// The client appends a `FORMAT` clause to queries, which cannot follow a
/// statement terminator.
fn prepare_query(sql: &str) -> String {
    let statement = sql.trim_end().trim_end_matches(';').trim_end();
    escape_placeholders(statement)
}

// =============================================================================
// Cursor
// =============================================================================

/// Non-blank lines of a response body.
struct JsonLines<R = BytesCursor> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> JsonLines<R> {
    fn new(body: R) -> Self {
        Self {
            lines: body.lines(),
        }
    }

    async fn next_line(&mut self) -> DbResult<Option<String>> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| DbError::from(clickhouse::error::Error::from(e)))?;
            match line {
                Some(text) if text.trim().is_empty() => continue,
                other => return Ok(other),
            }
        }
    }
}

/// Server errors raised mid-stream arrive as plain text, not JSON.
fn parse_json_array(line: &str) -> DbResult<Vec<JsonValue>> {
    match serde_json::from_str::<JsonValue>(line) {
        Ok(JsonValue::Array(values)) => Ok(values),
        _ => Err(DbError::execution(line.trim(), None)),
    }
}

/// Holds its pooled session until dropped.
///
/// A session whose response was not read to the end may still be busy on the
/// server, so it is detached from the pool instead of being reused.
struct ChCursor {
    columns: Vec<String>,
    lines: Option<JsonLines>,
    session: Option<Object<SessionManager>>,
    exhausted: bool,
}

impl ChCursor {
    async fn open(session: Object<SessionManager>, sql: &str) -> DbResult<Self> {
        let bytes = session.query(&prepare_query(sql)).fetch_bytes(RESULT_FORMAT)?;
        let mut cursor = Self {
            columns: Vec::new(),
            lines: Some(JsonLines::new(bytes)),
            session: Some(session),
            exhausted: false,
        };

        // Statements without a result set return an empty body.
        match cursor.read_line().await? {
            Some(header) => {
                cursor.columns = parse_json_array(&header)?
                    .into_iter()
                    .map(|name| match name {
                        JsonValue::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect();
                // column types
                cursor.read_line().await?;
            }
            None => cursor.exhausted = true,
        }

        Ok(cursor)
    }

    async fn read_line(&mut self) -> DbResult<Option<String>> {
        let Some(lines) = self.lines.as_mut() else {
            return Ok(None);
        };
        let line = lines.next_line().await?;
        if line.is_none() {
            self.exhausted = true;
        }
        Ok(line)
    }
}

impl Drop for ChCursor {
    fn drop(&mut self) {
        self.lines = None;
        if let Some(session) = self.session.take() {
            if !self.exhausted {
                debug!("Discarding session with an unfinished response");
                drop(Object::take(session));
            }
        }
    }
}

#[async_trait]
impl Cursor for ChCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_row(&mut self) -> DbResult<Option<Vec<CellValue>>> {
        match self.read_line().await? {
            Some(line) => {
                let values = parse_json_array(&line)?;
                Ok(Some(values.into_iter().map(types::json_to_cell).collect()))
            }
            None => Ok(None),
        }
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        drop(self);
        Ok(())
    }
}
