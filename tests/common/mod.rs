//! Spy connections, cursors and factories shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use query_gateway::db::{
    ConnectionFactory, Cursor, PoolMetrics, PooledConnection, resolve_engine_kind,
};
use query_gateway::error::{DbError, DbResult};
use query_gateway::models::{CellValue, Endpoint, EndpointInfo, EngineKind};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Everything a spy connection saw.
#[derive(Debug, Default)]
pub struct SpyLog {
    pub queries: Mutex<Vec<String>>,
    pub updates: Mutex<Vec<String>>,
    pub probes: AtomicUsize,
    pub close_calls: AtomicUsize,
    pub cursors_opened: AtomicUsize,
    pub cursors_closed: AtomicUsize,
}

impl SpyLog {
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<String> {
        self.updates.lock().unwrap().clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn cursors_open(&self) -> usize {
        self.cursors_opened.load(Ordering::SeqCst) - self.cursors_closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Healthy,
    NoRows,
    Fails,
}

#[derive(Debug)]
pub struct SpyConnection {
    kind: EngineKind,
    endpoint: EndpointInfo,
    connection_string: String,
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
    probe: Probe,
    fail_close: bool,
    query_error: Option<String>,
    /// Fail the cursor after this many rows.
    fail_after_rows: Option<usize>,
    rows_affected: u64,
    closed: AtomicBool,
    pub log: Arc<SpyLog>,
}

impl SpyConnection {
    pub fn new(kind: EngineKind) -> Self {
        let endpoint = Endpoint::new("spy.local", kind.default_port(), "spy", "spy_user", "secret");
        Self::for_endpoint(kind, &endpoint)
    }

    pub fn for_endpoint(kind: EngineKind, endpoint: &Endpoint) -> Self {
        Self {
            kind,
            endpoint: endpoint.info(),
            connection_string: kind.connection_string(
                &endpoint.host,
                endpoint.port,
                &endpoint.database,
            ),
            columns: vec!["id".to_string(), "name".to_string()],
            rows: vec![
                vec![Some("1".to_string()), Some("a".to_string())],
                vec![Some("2".to_string()), None],
            ],
            probe: Probe::Healthy,
            fail_close: false,
            query_error: None,
            fail_after_rows: None,
            rows_affected: 3,
            closed: AtomicBool::new(false),
            log: Arc::new(SpyLog::default()),
        }
    }

    pub fn with_result(mut self, columns: &[&str], rows: Vec<Vec<CellValue>>) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self.rows = rows;
        self
    }

    pub fn with_probe(mut self, probe: Probe) -> Self {
        self.probe = probe;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn failing_query(mut self, message: &str) -> Self {
        self.query_error = Some(message.to_string());
        self
    }

    pub fn failing_after_rows(mut self, rows: usize) -> Self {
        self.fail_after_rows = Some(rows);
        self
    }

    pub fn into_arc(self) -> (Arc<dyn PooledConnection>, Arc<SpyLog>) {
        let log = self.log.clone();
        let connection: Arc<dyn PooledConnection> = Arc::new(self);
        (connection, log)
    }
}

#[async_trait]
impl PooledConnection for SpyConnection {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn endpoint(&self) -> &EndpointInfo {
        &self.endpoint
    }

    async fn execute_query(&self, sql: &str) -> DbResult<Box<dyn Cursor>> {
        self.log.queries.lock().unwrap().push(sql.to_string());
        if let Some(message) = &self.query_error {
            return Err(DbError::execution(message.clone(), None));
        }
        self.log.cursors_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(VecCursor {
            columns: self.columns.clone(),
            rows: self.rows.clone().into(),
            fail_after_rows: self.fail_after_rows,
            yielded: 0,
            log: self.log.clone(),
        }))
    }

    async fn execute_update(&self, sql: &str) -> DbResult<u64> {
        self.log.updates.lock().unwrap().push(sql.to_string());
        if let Some(message) = &self.query_error {
            return Err(DbError::execution(message.clone(), None));
        }
        Ok(self.rows_affected)
    }

    async fn test_connection(&self) -> DbResult<bool> {
        self.log.probes.fetch_add(1, Ordering::SeqCst);
        match self.probe {
            Probe::Healthy => Ok(true),
            Probe::NoRows => Ok(false),
            Probe::Fails => Err(DbError::execution("probe failed", None)),
        }
    }

    fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            database: self.kind,
            connection_string: self.connection_string.clone(),
            pool_name: self.kind.pool_name(),
            maximum_pool_size: self.kind.pool_tuning().max_size,
            active_connections: self.log.cursors_open() as u32,
            idle_connections: 1,
            total_connections: 1 + self.log.cursors_open() as u32,
            threads_awaiting_connection: None,
        }
    }

    async fn close(&self) -> DbResult<()> {
        self.log.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.fail_close {
            return Err(DbError::close("spy refused to close"));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// In-memory cursor that records when it is closed.
pub struct VecCursor {
    pub columns: Vec<String>,
    pub rows: VecDeque<Vec<CellValue>>,
    pub fail_after_rows: Option<usize>,
    pub yielded: usize,
    pub log: Arc<SpyLog>,
}

impl VecCursor {
    pub fn new(columns: &[&str], rows: Vec<Vec<CellValue>>) -> Self {
        let log = Arc::new(SpyLog::default());
        log.cursors_opened.fetch_add(1, Ordering::SeqCst);
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows.into(),
            fail_after_rows: None,
            yielded: 0,
            log,
        }
    }
}

#[async_trait]
impl Cursor for VecCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_row(&mut self) -> DbResult<Option<Vec<CellValue>>> {
        if self.fail_after_rows == Some(self.yielded) {
            return Err(DbError::execution("connection reset mid-stream", None));
        }
        let row = self.rows.pop_front();
        if row.is_some() {
            self.yielded += 1;
        }
        Ok(row)
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        self.log.cursors_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out spy connections and remembering them.
#[derive(Debug)]
pub struct SpyFactory {
    probe: Probe,
    pub created: Mutex<Vec<Arc<SpyConnection>>>,
    /// Engine names handed to `create_from_text`, verbatim.
    pub requested: Mutex<Vec<String>>,
}

impl SpyFactory {
    pub fn new(probe: Probe) -> Self {
        Self {
            probe,
            created: Mutex::new(Vec::new()),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> Vec<Arc<SpyConnection>> {
        self.created.lock().unwrap().clone()
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectionFactory for SpyFactory {
    async fn create(
        &self,
        kind: EngineKind,
        endpoint: &Endpoint,
    ) -> DbResult<Arc<dyn PooledConnection>> {
        let connection = Arc::new(SpyConnection::for_endpoint(kind, endpoint).with_probe(self.probe));
        self.created.lock().unwrap().push(connection.clone());
        let connection: Arc<dyn PooledConnection> = connection;
        Ok(connection)
    }

    async fn create_from_text(
        &self,
        kind: &str,
        endpoint: &Endpoint,
    ) -> DbResult<Arc<dyn PooledConnection>> {
        self.requested.lock().unwrap().push(kind.to_string());
        let kind = resolve_engine_kind(kind)?;
        self.create(kind, endpoint).await
    }
}

pub fn cell(value: &str) -> CellValue {
    Some(value.to_string())
}
