//! Registry of open pooled connections.
//!
//! Tracks every connection opened through the gateway under a generated
//! identifier, plus which one is current. Connections are closed after their
//! entry has left the table, outside the lock.

use crate::db::connection::PooledConnection;
use crate::error::{DbError, DbResult};
use crate::models::ConnectionSummary;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug)]
struct RegistryEntry {
    connection: Arc<dyn PooledConnection>,
    /// Insertion order, for stable listings.
    seq: u64,
    connected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<String, RegistryEntry>,
    /// Always names a key of `entries` when set.
    current: Option<String>,
    next_seq: u64,
}

impl RegistryState {
    fn take(&mut self, connection_id: &str) -> Option<RegistryEntry> {
        let entry = self.entries.remove(connection_id)?;
        if self.current.as_deref() == Some(connection_id) {
            self.current = None;
        }
        Some(entry)
    }
}

/// Owned by the binary and shared through `Arc`; one per process.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection` under a fresh identifier and make it current.
    pub async fn add(&self, connection: Arc<dyn PooledConnection>) -> String {
        let connection_id = Uuid::new_v4().to_string();
        let kind = connection.kind();

        let mut state = self.state.write().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            connection_id.clone(),
            RegistryEntry {
                connection,
                seq,
                connected_at: Utc::now(),
            },
        );
        state.current = Some(connection_id.clone());
        drop(state);

        info!(connection_id = %connection_id, db_type = %kind, "Connection registered");
        connection_id
    }

    pub async fn get(&self, connection_id: &str) -> Option<Arc<dyn PooledConnection>> {
        let state = self.state.read().await;
        state
            .entries
            .get(connection_id)
            .map(|entry| entry.connection.clone())
    }

    pub async fn current(&self) -> DbResult<Arc<dyn PooledConnection>> {
        let state = self.state.read().await;
        let current = state
            .current
            .as_deref()
            .ok_or(DbError::NoCurrentConnection)?;
        state
            .entries
            .get(current)
            .map(|entry| entry.connection.clone())
            .ok_or(DbError::NoCurrentConnection)
    }

    pub async fn current_id(&self) -> Option<String> {
        self.state.read().await.current.clone()
    }

    /// Mark `connection_id` as current. Unknown identifiers leave state untouched.
    pub async fn set_current(&self, connection_id: &str) -> DbResult<()> {
        let mut state = self.state.write().await;
        if !state.entries.contains_key(connection_id) {
            return Err(DbError::connection_not_found(connection_id));
        }
        state.current = Some(connection_id.to_string());
        drop(state);

        info!(connection_id = %connection_id, "Current connection changed");
        Ok(())
    }

    /// Remove and close one connection. Unknown identifiers are a no-op.
    ///
    /// The entry is gone even when closing fails.
    pub async fn remove(&self, connection_id: &str) -> DbResult<()> {
        let Some(entry) = self.state.write().await.take(connection_id) else {
            return Ok(());
        };

        info!(connection_id = %connection_id, "Closing connection");
        entry.connection.close().await.inspect_err(|e| {
            warn!(connection_id = %connection_id, error = %e, "Failed to close connection");
        })
    }

    /// Remove and close every connection.
    ///
    /// Every close is attempted; the last failure is returned.
    pub async fn remove_all(&self) -> DbResult<()> {
        let mut entries: Vec<(String, RegistryEntry)> = {
            let mut state = self.state.write().await;
            state.current = None;
            state.entries.drain().collect()
        };
        entries.sort_by_key(|(_, entry)| entry.seq);

        let total = entries.len();
        let mut last_error = None;
        for (connection_id, entry) in entries {
            info!(connection_id = %connection_id, "Closing connection");
            if let Err(e) = entry.connection.close().await {
                warn!(connection_id = %connection_id, error = %e, "Failed to close connection");
                last_error = Some(e);
            }
        }

        info!(count = total, "All connections closed");
        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Snapshot of open connections in the order they were added.
    pub async fn list(&self) -> Vec<ConnectionSummary> {
        let state = self.state.read().await;
        let mut entries: Vec<(&String, &RegistryEntry)> = state.entries.iter().collect();
        entries.sort_by_key(|(_, entry)| entry.seq);

        entries
            .into_iter()
            .map(|(connection_id, entry)| ConnectionSummary {
                connection_id: connection_id.clone(),
                database: entry.connection.kind(),
                connection_string: entry.connection.connection_string().to_string(),
                username: entry.connection.endpoint().username.clone(),
                is_current: state.current.as_deref() == Some(connection_id.as_str()),
                connected_at: entry.connected_at,
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
