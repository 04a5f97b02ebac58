//! Engine name resolution and dispatch to the matching pooled connection.

use crate::db::clickhouse::ClickHouseConnection;
use crate::db::connection::PooledConnection;
use crate::db::postgres::PostgresConnection;
use crate::error::DbResult;
use crate::models::{Endpoint, EngineKind};
use async_trait::async_trait;
use std::sync::Arc;

/// Normalize an engine name (display name or short identifier, any case,
/// surrounding whitespace ignored).
pub fn resolve_engine_kind(text: &str) -> DbResult<EngineKind> {
    text.parse()
}

/// Builds pooled connections. The gateway depends on this rather than on the
/// concrete engines so alternative implementations can be injected.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create(
        &self,
        kind: EngineKind,
        endpoint: &Endpoint,
    ) -> DbResult<Arc<dyn PooledConnection>>;

    /// Resolve `kind` first, so unknown names fail before any network activity.
    async fn create_from_text(
        &self,
        kind: &str,
        endpoint: &Endpoint,
    ) -> DbResult<Arc<dyn PooledConnection>> {
        let kind = resolve_engine_kind(kind)?;
        self.create(kind, endpoint).await
    }
}

/// Factory for the linked database drivers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverConnectionFactory;

#[async_trait]
impl ConnectionFactory for DriverConnectionFactory {
    async fn create(
        &self,
        kind: EngineKind,
        endpoint: &Endpoint,
    ) -> DbResult<Arc<dyn PooledConnection>> {
        let connection: Arc<dyn PooledConnection> = match kind {
            EngineKind::PostgreSQL => Arc::new(PostgresConnection::connect(endpoint).await?),
            EngineKind::ClickHouse => Arc::new(ClickHouseConnection::connect(endpoint).await?),
        };
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;

    #[tokio::test]
    async fn test_unknown_kind_fails_before_connecting() {
        // Port 9 is discard; reaching the network would yield a connection error instead.
        let endpoint = Endpoint::new("127.0.0.1", 9, "db", "user", "pass");
        let err = DriverConnectionFactory
            .create_from_text("oracle", &endpoint)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Config { .. }));
    }

    #[test]
    fn test_resolve_engine_kind() {
        assert_eq!(
            resolve_engine_kind(" PostgreSQL ").unwrap(),
            EngineKind::PostgreSQL
        );
        assert_eq!(
            resolve_engine_kind("clickhouse").unwrap(),
            EngineKind::ClickHouse
        );
        assert!(resolve_engine_kind("").is_err());
    }
}
