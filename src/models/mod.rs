//! Data models for the query gateway.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod engine;
pub mod query;

pub use connection::{
    ConnectRequest, ConnectionInfo, ConnectionList, ConnectionSummary, Endpoint, EndpointInfo,
};
pub use engine::{EngineKind, PoolTuning};
pub use query::{
    CellValue, ExplainOutput, QueryOutput, QueryRequest, ResultRow, TabularResult, UpdateOutput,
};
