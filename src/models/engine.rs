//! Supported database engines and their fixed constants.

use crate::error::DbError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Pool sizing and timeouts for one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolTuning {
    pub max_size: u32,
    pub min_idle: u32,
    /// Upper bound on acquiring a pooled connection.
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

/// The database backends a connection can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum EngineKind {
    /// Row-oriented engine.
    #[serde(rename = "PostgreSQL")]
    PostgreSQL,
    /// Columnar analytical engine, reached over its HTTP interface.
    #[serde(rename = "ClickHouse")]
    ClickHouse,
}

impl EngineKind {
    pub const ALL: [EngineKind; 2] = [EngineKind::PostgreSQL, EngineKind::ClickHouse];

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::ClickHouse => "ClickHouse",
        }
    }

    /// Short identifier, also used as the URL scheme for `--connect`.
    pub fn identifier(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgres",
            Self::ClickHouse => "clickhouse",
        }
    }

    /// Keyword(s) prepended to a statement to obtain its plan.
    pub fn explain_prefix(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "EXPLAIN ANALYZE ",
            Self::ClickHouse => "EXPLAIN ",
        }
    }

    pub fn explain_label(&self) -> &'static str {
        self.explain_prefix().trim_end()
    }

    pub fn explain_sql(&self, sql: &str) -> String {
        format!("{}{}", self.explain_prefix(), sql)
    }

    pub fn pool_tuning(&self) -> PoolTuning {
        match self {
            Self::PostgreSQL => PoolTuning {
                max_size: 10,
                min_idle: 2,
                connect_timeout: Duration::from_secs(20),
                idle_timeout: Duration::from_secs(5 * 60),
                max_lifetime: Duration::from_secs(30 * 60),
            },
            Self::ClickHouse => PoolTuning {
                max_size: 15,
                min_idle: 3,
                connect_timeout: Duration::from_secs(30),
                idle_timeout: Duration::from_secs(10 * 60),
                max_lifetime: Duration::from_secs(30 * 60),
            },
        }
    }

    pub fn pool_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL-Pool",
            Self::ClickHouse => "ClickHouse-Pool",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::PostgreSQL => 5432,
            Self::ClickHouse => 8123,
        }
    }

    pub fn default_user(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgres",
            Self::ClickHouse => "default",
        }
    }

    pub fn default_database(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgres",
            Self::ClickHouse => "default",
        }
    }

    /// Credential-free URL identifying an endpoint of this engine.
    pub fn connection_string(&self, host: &str, port: u16, database: &str) -> String {
        let scheme = match self {
            Self::PostgreSQL => "postgresql",
            Self::ClickHouse => "clickhouse",
        };
        format!("{}://{}:{}/{}", scheme, host, port, database)
    }

    fn supported_list() -> String {
        Self::ALL
            .iter()
            .map(|kind| format!("{}/{}", kind.display_name(), kind.identifier()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Accepts the display name or the short identifier, ignoring case and
/// surrounding whitespace.
impl FromStr for EngineKind {
    type Err = DbError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let normalized = text.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(DbError::config(
                "Database type cannot be empty. Supported types: ".to_string()
                    + &Self::supported_list(),
            ));
        }

        Self::ALL
            .into_iter()
            .find(|kind| {
                normalized == kind.display_name().to_lowercase() || normalized == kind.identifier()
            })
            .ok_or_else(|| {
                DbError::config(format!(
                    "Unknown database type: {}. Supported types: {}",
                    text.trim(),
                    Self::supported_list()
                ))
            })
    }
}

impl TryFrom<String> for EngineKind {
    type Error = DbError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_spellings() {
        for text in ["PostgreSQL", "postgres", "POSTGRES", "  postgresql  ", "PostgreSql\t"] {
            assert_eq!(text.parse::<EngineKind>().unwrap(), EngineKind::PostgreSQL);
        }
        for text in ["ClickHouse", "clickhouse", "CLICKHOUSE", " ClickHouse "] {
            assert_eq!(text.parse::<EngineKind>().unwrap(), EngineKind::ClickHouse);
        }
    }

    #[test]
    fn test_resolve_rejects_unknown() {
        let err = "mysql".parse::<EngineKind>().unwrap_err();
        assert!(matches!(err, DbError::Config { .. }));
        assert!(err.to_string().contains(
            "Unknown database type: mysql. Supported types: PostgreSQL/postgres, ClickHouse/clickhouse"
        ));
    }

    #[test]
    fn test_resolve_rejects_blank() {
        assert!(matches!(
            "   ".parse::<EngineKind>(),
            Err(DbError::Config { .. })
        ));
        assert!("pg".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_explain_phrasing() {
        assert_eq!(
            EngineKind::PostgreSQL.explain_sql("SELECT 1"),
            "EXPLAIN ANALYZE SELECT 1"
        );
        assert_eq!(EngineKind::ClickHouse.explain_sql("SELECT 1"), "EXPLAIN SELECT 1");
        assert_eq!(EngineKind::PostgreSQL.explain_label(), "EXPLAIN ANALYZE");
        assert_eq!(EngineKind::ClickHouse.explain_label(), "EXPLAIN");
    }

    #[test]
    fn test_pool_tuning() {
        let pg = EngineKind::PostgreSQL.pool_tuning();
        assert_eq!((pg.max_size, pg.min_idle), (10, 2));
        assert_eq!(pg.connect_timeout, Duration::from_secs(20));
        assert_eq!(pg.idle_timeout, Duration::from_secs(300));

        let ch = EngineKind::ClickHouse.pool_tuning();
        assert_eq!((ch.max_size, ch.min_idle), (15, 3));
        assert_eq!(ch.connect_timeout, Duration::from_secs(30));
        assert_eq!(ch.max_lifetime, Duration::from_secs(1800));
    }

    #[test]
    fn test_connection_string_has_no_credentials() {
        assert_eq!(
            EngineKind::PostgreSQL.connection_string("db.local", 5432, "sales"),
            "postgresql://db.local:5432/sales"
        );
        assert_eq!(
            EngineKind::ClickHouse.connection_string("ch", 8123, "default"),
            "clickhouse://ch:8123/default"
        );
    }

    #[test]
    fn test_serde_uses_display_name() {
        assert_eq!(
            serde_json::to_string(&EngineKind::ClickHouse).unwrap(),
            "\"ClickHouse\""
        );
        let parsed: EngineKind = serde_json::from_str("\"postgres\"").unwrap();
        assert_eq!(parsed, EngineKind::PostgreSQL);
    }
}
