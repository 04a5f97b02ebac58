//! Query-related data models.
//!
//! This module defines the request shape shared by query, update and explain,
//! and the fully materialized results they produce.

use crate::models::EngineKind;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// A cell after stringification. `None` is SQL NULL.
pub type CellValue = Option<String>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub sql: String,
    /// Target connection. Falls back to the current connection when absent or empty.
    #[serde(default)]
    pub connection_id: Option<String>,
}

/// One row, as an ordered column name to value mapping.
///
/// Duplicate column names are kept side by side in cursor order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultRow {
    cells: Vec<(String, CellValue)>,
}

impl ResultRow {
    pub fn new(cells: Vec<(String, CellValue)>) -> Self {
        Self { cells }
    }

    /// Value of the first column with this name. The outer `Option` is `None`
    /// when no such column exists.
    pub fn get(&self, column: &str) -> Option<Option<&str>> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_deref())
    }

    pub fn value_at(&self, index: usize) -> Option<Option<&str>> {
        self.cells.get(index).map(|(_, value)| value.as_deref())
    }

    pub fn cells(&self) -> &[(String, CellValue)] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Serialize for ResultRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, value) in &self.cells {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Connection-independent projection of a cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
    pub row_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutput {
    #[serde(flatten)]
    pub data: TabularResult,
    pub execution_time_ms: u64,
    pub database_type: EngineKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutput {
    pub rows_affected: u64,
    pub execution_time_ms: u64,
    pub database_type: EngineKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainOutput {
    #[serde(flatten)]
    pub data: TabularResult,
    pub execution_time_ms: u64,
    pub database_type: EngineKind,
    /// `EXPLAIN ANALYZE` or `EXPLAIN`, depending on the engine.
    pub query_type: &'static str,
}
