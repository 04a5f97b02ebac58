//! Cell stringification for each engine.
//!
//! Every value leaving a cursor is either a string or NULL. PostgreSQL rows
//! fetched with raw SQL arrive in the text wire format, which is already the
//! canonical string form. ClickHouse rows arrive as JSON arrays.

use crate::models::CellValue;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgRow, PgValueFormat, PgValueRef};
use sqlx::{Column, Decode, Postgres, Row, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Timestamp,
    Date,
    Unknown,
}

/// Classify a column type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower.starts_with("timestamp") {
        return TypeCategory::Timestamp;
    }

    if lower == "date" {
        return TypeCategory::Date;
    }

    if lower == "bytea" || lower.contains("binary") {
        return TypeCategory::Binary;
    }

    TypeCategory::Unknown
}

// =============================================================================
// PostgreSQL
// =============================================================================

pub fn pg_column_names(row: &PgRow) -> Vec<String> {
    row.columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect()
}

pub fn stringify_pg_row(row: &PgRow) -> Vec<CellValue> {
    (0..row.len()).map(|idx| stringify_pg_cell(row, idx)).collect()
}

fn stringify_pg_cell(row: &PgRow, idx: usize) -> CellValue {
    let category = categorize_type(row.column(idx).type_info().name());
    let value = match row.try_get_raw(idx) {
        Ok(value) => value,
        Err(e) => {
            tracing::error!(column = idx, error = %e, "Failed to read column");
            return None;
        }
    };

    if value.is_null() {
        return None;
    }

    match value.format() {
        PgValueFormat::Text => decode_text(value, category),
        PgValueFormat::Binary => decode_binary(row, idx, category),
    }
}

fn decode_text(value: PgValueRef<'_>, category: TypeCategory) -> CellValue {
    match <&str as Decode<Postgres>>::decode(value) {
        Ok(text) if category == TypeCategory::Boolean => Some(normalize_pg_bool(text)),
        Ok(text) => Some(text.to_string()),
        Err(e) => {
            tracing::error!(error = %e, "Failed to decode text value");
            None
        }
    }
}

/// PostgreSQL spells booleans `t`/`f` in text format.
fn normalize_pg_bool(text: &str) -> String {
    match text {
        "t" => "true".to_string(),
        "f" => "false".to_string(),
        other => other.to_string(),
    }
}

fn decode_binary(row: &PgRow, idx: usize, category: TypeCategory) -> CellValue {
    let decoded = match category {
        TypeCategory::Integer => row
            .try_get::<i64, _>(idx)
            .or_else(|_| row.try_get::<i32, _>(idx).map(i64::from))
            .or_else(|_| row.try_get::<i16, _>(idx).map(i64::from))
            .map(|v| v.to_string()),
        TypeCategory::Float => row
            .try_get::<f64, _>(idx)
            .or_else(|_| row.try_get::<f32, _>(idx).map(f64::from))
            .map(|v| v.to_string()),
        TypeCategory::Boolean => row.try_get::<bool, _>(idx).map(|v| v.to_string()),
        TypeCategory::Timestamp => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
            .map(|v| v.to_rfc3339())
            .or_else(|_| {
                row.try_get::<chrono::NaiveDateTime, _>(idx)
                    .map(|v| v.to_string())
            }),
        TypeCategory::Date => row
            .try_get::<chrono::NaiveDate, _>(idx)
            .map(|v| v.to_string()),
        TypeCategory::Binary => row.try_get::<Vec<u8>, _>(idx).map(|v| hex_literal(&v)),
        TypeCategory::Decimal | TypeCategory::Unknown => row.try_get::<String, _>(idx),
    };

    match decoded {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!(column = idx, ?category, error = %e, "Unsupported binary value");
            None
        }
    }
}

/// `bytea` in PostgreSQL's hex output format.
fn hex_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

// =============================================================================
// ClickHouse
// =============================================================================

/// Convert one JSON cell from a `JSONCompact*` row.
pub fn json_to_cell(value: JsonValue) -> CellValue {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        nested @ (JsonValue::Array(_) | JsonValue::Object(_)) => Some(nested.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_categorize_type() {
        assert_eq!(categorize_type("INT4"), TypeCategory::Integer);
        assert_eq!(categorize_type("NUMERIC"), TypeCategory::Decimal);
        assert_eq!(categorize_type("BOOL"), TypeCategory::Boolean);
        assert_eq!(categorize_type("FLOAT8"), TypeCategory::Float);
        assert_eq!(categorize_type("TIMESTAMPTZ"), TypeCategory::Timestamp);
        assert_eq!(categorize_type("DATE"), TypeCategory::Date);
        assert_eq!(categorize_type("BYTEA"), TypeCategory::Binary);
        assert_eq!(categorize_type("TEXT"), TypeCategory::Unknown);
    }

    #[test]
    fn test_normalize_pg_bool() {
        assert_eq!(normalize_pg_bool("t"), "true");
        assert_eq!(normalize_pg_bool("f"), "false");
    }

    #[test]
    fn test_hex_literal() {
        assert_eq!(hex_literal(&[0xde, 0xad, 0x01]), "\\xdead01");
        assert_eq!(hex_literal(&[]), "\\x");
    }

    #[test]
    fn test_json_to_cell() {
        assert_eq!(json_to_cell(json!(null)), None);
        assert_eq!(json_to_cell(json!("abc")), Some("abc".to_string()));
        assert_eq!(json_to_cell(json!(42)), Some("42".to_string()));
        assert_eq!(json_to_cell(json!(1.5)), Some("1.5".to_string()));
        assert_eq!(json_to_cell(json!(true)), Some("true".to_string()));
        assert_eq!(json_to_cell(json!([1, "a"])), Some("[1,\"a\"]".to_string()));
        assert_eq!(json_to_cell(json!("null")), Some("null".to_string()));
    }
}
