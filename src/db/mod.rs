//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - The pooled connection capability and its cursor
//! - One pooled connection per engine (PostgreSQL, ClickHouse)
//! - A factory resolving engine names to connections
//! - The registry of open connections
//! - Cell stringification

pub mod clickhouse;
pub mod connection;
pub mod factory;
pub mod postgres;
pub mod registry;
pub mod types;

pub use self::clickhouse::ClickHouseConnection;
pub use connection::{Cursor, PROBE_SQL, PoolMetrics, PooledConnection};
pub use factory::{ConnectionFactory, DriverConnectionFactory, resolve_engine_kind};
pub use self::postgres::PostgresConnection;
pub use registry::ConnectionRegistry;
