//! Decoding of MySQL rows into dictionary rows.
//!
//! Decoding uses a two-phase approach:
//! 1. `TypeCategory` classifies the column type name
//! 2. a per-category decoder extracts the value as JSON
//!
//! Values that fail to decode become `null` and are logged.

use crate::models::Row;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::{Column, Decode, Row as _, Type, TypeInfo};

/// Logical category for MySQL column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    DateTime,
    Timestamp,
    Date,
    Time,
}

/// Classify a MySQL type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }
    if lower == "boolean" || lower == "bool" {
        return TypeCategory::Boolean;
    }
    if lower.contains("int") || lower == "year" {
        return TypeCategory::Integer;
    }
    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }
    if lower == "json" {
        return TypeCategory::Json;
    }
    if lower.contains("blob") || lower.contains("binary") {
        return TypeCategory::Binary;
    }
    match lower.as_str() {
        "datetime" => TypeCategory::DateTime,
        "timestamp" => TypeCategory::Timestamp,
        "date" => TypeCategory::Date,
        "time" => TypeCategory::Time,
        _ => TypeCategory::Text,
    }
}

/// Wrapper type for raw DECIMAL values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Encode binary column data: UTF-8 text when valid, base64 otherwise.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    match std::str::from_utf8(bytes) {
        Ok(s) => JsonValue::String(s.to_string()),
        Err(_) => JsonValue::String(STANDARD.encode(bytes)),
    }
}

/// Conversion of a driver row into a dictionary row.
pub trait ToDictRow {
    fn to_dict_row(&self) -> Row;
}

impl ToDictRow for MySqlRow {
    fn to_dict_row(&self) -> Row {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name());
                (col.name().to_string(), decode_column(self, idx, category))
            })
            .collect()
    }
}

fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
    match category {
        TypeCategory::Decimal => decode_decimal(row, idx),
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Boolean => {
            decode_as::<bool>(row, idx, "BOOLEAN").map_or(JsonValue::Null, JsonValue::Bool)
        }
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Binary => decode_as::<Vec<u8>>(row, idx, "BINARY")
            .map_or(JsonValue::Null, |v| decode_binary_value(&v)),
        TypeCategory::Json => decode_as::<JsonValue>(row, idx, "JSON").unwrap_or(JsonValue::Null),
        TypeCategory::DateTime => decode_as::<chrono::NaiveDateTime>(row, idx, "DATETIME")
            .map_or(JsonValue::Null, |v| JsonValue::String(v.to_string())),
        TypeCategory::Timestamp => {
            decode_as::<chrono::DateTime<chrono::Utc>>(row, idx, "TIMESTAMP")
                .map_or(JsonValue::Null, |v| JsonValue::String(v.to_rfc3339()))
        }
        TypeCategory::Date => decode_as::<chrono::NaiveDate>(row, idx, "DATE")
            .map_or(JsonValue::Null, |v| JsonValue::String(v.to_string())),
        TypeCategory::Time => decode_as::<chrono::NaiveTime>(row, idx, "TIME")
            .map_or(JsonValue::Null, |v| JsonValue::String(v.to_string())),
        TypeCategory::Text => decode_text(row, idx),
    }
}

/// Decode a nullable column, logging decode failures.
fn decode_as<'r, T>(row: &'r MySqlRow, idx: usize, type_label: &str) -> Option<T>
where
    T: Decode<'r, sqlx::MySql> + Type<sqlx::MySql>,
{
    match row.try_get::<Option<T>, _>(idx) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(column = idx, "Failed to decode {}: {:?}", type_label, e);
            None
        }
    }
}

fn decode_decimal(row: &MySqlRow, idx: usize) -> JsonValue {
    decode_as::<RawDecimal>(row, idx, "DECIMAL").map_or(JsonValue::Null, |v| JsonValue::String(v.0))
}

fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
    // Signed first; BIGINT UNSIGNED only fits u64.
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map_or(JsonValue::Null, |v| JsonValue::Number(v.into()));
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        return v.map_or(JsonValue::Null, |v| JsonValue::Number(v.into()));
    }
    // YEAR has no checked integer mapping
    if let Ok(v) = row.try_get_unchecked::<Option<i64>, _>(idx) {
        return v.map_or(JsonValue::Null, |v| JsonValue::Number(v.into()));
    }
    decode_text(row, idx)
}

fn decode_float(row: &MySqlRow, idx: usize) -> JsonValue {
    let value = match row.try_get::<Option<f64>, _>(idx) {
        Ok(v) => v,
        Err(_) => decode_as::<f32>(row, idx, "FLOAT").map(f64::from),
    };
    value.map_or(JsonValue::Null, |v| {
        serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string()))
    })
}

/// Text columns, falling back to the raw bytes for types without a
/// `String` mapping (SET, BIT, GEOMETRY).
fn decode_text(row: &MySqlRow, idx: usize) -> JsonValue {
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map_or(JsonValue::Null, JsonValue::String);
    }
    match row.try_get_unchecked::<Option<Vec<u8>>, _>(idx) {
        Ok(v) => v.map_or(JsonValue::Null, |v| decode_binary_value(&v)),
        Err(e) => {
            tracing::error!(column = idx, "Failed to decode TEXT: {:?}", e);
            JsonValue::Null
        }
    }
}
