//! Row decoding into JSON.
//!
//! Column types are first classified into a [`TypeCategory`]; a per-backend
//! decoder then tries the Rust types that category can hold, in order, and
//! converts the first one that decodes.

use crate::models::DatabaseType;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Map, Value as JsonValue};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Temporal,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.starts_with("timestamp")
        || lower == "datetime"
        || lower == "date"
        || lower == "time"
        || lower == "timetz"
    {
        return TypeCategory::Temporal;
    }

    TypeCategory::Text
}

/// DECIMAL/NUMERIC kept as its exact textual representation.
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

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

fn float_json(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn bytes_json(v: Vec<u8>) -> JsonValue {
    JsonValue::String(STANDARD.encode(v))
}

fn text_json(v: String) -> JsonValue {
    JsonValue::String(v)
}

/// Return the first listed type that decodes, converted to JSON.
macro_rules! decode_first {
    ($row:expr, $idx:expr; $($ty:ty => $conv:expr),+ $(,)?) => {{
        $(
            if let Ok(v) = $row.try_get::<$ty, _>($idx) {
                return $conv(v);
            }
        )+
        JsonValue::Null
    }};
}

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> Map<String, JsonValue>;
}

impl RowToJson for MySqlRow {
    fn to_json_map(&self) -> Map<String, JsonValue> {
        self.columns()
            .iter()
            .map(|col| {
                let category = categorize_type(col.type_info().name(), DatabaseType::MySQL);
                (col.name().to_string(), decode_mysql(self, col.ordinal(), category))
            })
            .collect()
    }
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> Map<String, JsonValue> {
        self.columns()
            .iter()
            .map(|col| {
                let category = categorize_type(col.type_info().name(), DatabaseType::PostgreSQL);
                (col.name().to_string(), decode_postgres(self, col.ordinal(), category))
            })
            .collect()
    }
}

impl RowToJson for SqliteRow {
    fn to_json_map(&self) -> Map<String, JsonValue> {
        self.columns()
            .iter()
            .map(|col| {
                let category = categorize_type(col.type_info().name(), DatabaseType::SQLite);
                (col.name().to_string(), decode_sqlite(self, col.ordinal(), category))
            })
            .collect()
    }
}

fn is_null<R: Row>(row: &R, idx: usize) -> bool
where
    usize: sqlx::ColumnIndex<R>,
{
    row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true)
}

fn decode_mysql(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
    if is_null(row, idx) {
        return JsonValue::Null;
    }
    match category {
        TypeCategory::Decimal => decode_first!(row, idx; RawDecimal => |v: RawDecimal| JsonValue::String(v.0)),
        TypeCategory::Integer => decode_first!(row, idx;
            i64 => JsonValue::from,
            u64 => JsonValue::from,
            i32 => JsonValue::from,
            u32 => JsonValue::from,
            i16 => JsonValue::from,
            u16 => JsonValue::from,
            i8 => JsonValue::from,
            u8 => JsonValue::from,
        ),
        TypeCategory::Boolean => decode_first!(row, idx; bool => JsonValue::Bool, i8 => |v: i8| JsonValue::Bool(v != 0)),
        TypeCategory::Float => decode_first!(row, idx; f64 => float_json, f32 => |v: f32| float_json(v as f64)),
        TypeCategory::Binary => decode_first!(row, idx; Vec<u8> => bytes_json),
        TypeCategory::Json => decode_first!(row, idx; JsonValue => |v: JsonValue| v),
        TypeCategory::Temporal => decode_first!(row, idx;
            DateTime<Utc> => |v: DateTime<Utc>| JsonValue::String(v.to_rfc3339()),
            NaiveDateTime => |v: NaiveDateTime| JsonValue::String(v.to_string()),
            NaiveDate => |v: NaiveDate| JsonValue::String(v.to_string()),
            NaiveTime => |v: NaiveTime| JsonValue::String(v.to_string()),
            String => text_json,
        ),
        TypeCategory::Text => decode_first!(row, idx; String => text_json, Vec<u8> => bytes_json),
    }
}

fn decode_postgres(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
    if is_null(row, idx) {
        return JsonValue::Null;
    }
    match category {
        TypeCategory::Decimal => decode_first!(row, idx; RawDecimal => |v: RawDecimal| JsonValue::String(v.0)),
        TypeCategory::Integer => decode_first!(row, idx;
            i64 => JsonValue::from,
            i32 => JsonValue::from,
            i16 => JsonValue::from,
        ),
        TypeCategory::Boolean => decode_first!(row, idx; bool => JsonValue::Bool),
        TypeCategory::Float => decode_first!(row, idx; f64 => float_json, f32 => |v: f32| float_json(v as f64)),
        TypeCategory::Binary => decode_first!(row, idx; Vec<u8> => bytes_json),
        TypeCategory::Json => decode_first!(row, idx; JsonValue => |v: JsonValue| v),
        TypeCategory::Temporal => decode_first!(row, idx;
            DateTime<Utc> => |v: DateTime<Utc>| JsonValue::String(v.to_rfc3339()),
            NaiveDateTime => |v: NaiveDateTime| JsonValue::String(v.to_string()),
            NaiveDate => |v: NaiveDate| JsonValue::String(v.to_string()),
            NaiveTime => |v: NaiveTime| JsonValue::String(v.to_string()),
        ),
        TypeCategory::Text => decode_first!(row, idx; String => text_json),
    }
}

fn decode_sqlite(row: &SqliteRow, idx: usize, category: TypeCategory) -> JsonValue {
    if is_null(row, idx) {
        return JsonValue::Null;
    }
    // SQLite columns are dynamically typed; fall back through the storage classes
    match category {
        TypeCategory::Integer => decode_first!(row, idx; i64 => JsonValue::from, f64 => float_json, String => text_json),
        TypeCategory::Boolean => decode_first!(row, idx; bool => JsonValue::Bool, i64 => JsonValue::from),
        TypeCategory::Float | TypeCategory::Decimal => {
            decode_first!(row, idx; f64 => float_json, i64 => JsonValue::from, String => text_json)
        }
        TypeCategory::Binary => decode_first!(row, idx; Vec<u8> => bytes_json, String => text_json),
        TypeCategory::Json => decode_first!(row, idx;
            String => |v: String| serde_json::from_str(&v).unwrap_or(JsonValue::String(v)),
        ),
        TypeCategory::Text | TypeCategory::Temporal => {
            decode_first!(row, idx; String => text_json, i64 => JsonValue::from, f64 => float_json, Vec<u8> => bytes_json)
        }
    }
}
