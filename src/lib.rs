//! Query Gateway Library
//!
//! Runs ad-hoc SQL against pooled PostgreSQL and ClickHouse connections and
//! returns uniform tabular results with execution timing.

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod transport;

pub use config::Config;
pub use error::{DbError, DbResult, ExecutionFailure};
pub use gateway::ExecutionGateway;
