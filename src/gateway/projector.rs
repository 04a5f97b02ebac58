//! Converts a live cursor into a [`TabularResult`].

use crate::db::Cursor;
use crate::error::{DbError, DbResult};
use crate::models::{ResultRow, TabularResult};

/// Drain `cursor` to completion.
///
/// The cursor is left open; the caller releases it once this returns.
pub async fn project(cursor: &mut dyn Cursor) -> DbResult<TabularResult> {
    let columns = cursor.columns().to_vec();
    let mut rows = Vec::new();

    while let Some(values) = cursor.next_row().await? {
        if values.len() != columns.len() {
            return Err(DbError::internal(format!(
                "Row {} has {} values for {} columns",
                rows.len() + 1,
                values.len(),
                columns.len()
            )));
        }
        rows.push(ResultRow::new(columns.iter().cloned().zip(values).collect()));
    }

    Ok(TabularResult {
        columns,
        row_count: rows.len(),
        rows,
    })
}
