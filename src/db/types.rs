//! Row decoding into [`Value`]s.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction
//!
//! Decoding never fails a whole row: a column that cannot be read in its
//! category falls back to text, and finally to NULL with an error logged.

use crate::entity::Entity;
use crate::error::{DbError, DbResult};
use crate::expr::Value;
use crate::sql::Dialect;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo};

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
    Text,
    Binary,
    DateTime,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, dialect: Dialect) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if dialect == Dialect::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // MySQL reports TINYINT(1) as BOOLEAN
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower.contains("timestamp") || lower.starts_with("datetime") {
        // SQLite keeps timestamps as text, leave conversion to the entity
        if dialect == Dialect::SQLite {
            return TypeCategory::Text;
        }
        return TypeCategory::DateTime;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" {
        return TypeCategory::Text;
    }

    // Everything else (date, time, uuid, json, ...) is read as text
    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
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

/// Decimals become floats when they round-trip exactly, text otherwise.
fn decimal_value(raw: RawDecimal) -> Value {
    let canonical = if raw.0.contains('.') {
        raw.0.trim_end_matches('0').trim_end_matches('.')
    } else {
        raw.0.as_str()
    };
    match raw.0.parse::<f64>() {
        Ok(v) if v.to_string() == canonical => Value::Float(v),
        _ => Value::Text(raw.0),
    }
}

// =============================================================================
// Records
// =============================================================================

/// One result row: column labels and decoded values in select order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Record {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value by column label, case-insensitively.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .map(|idx| &self.values[idx])
    }

    /// First column, the shape of scalar queries.
    pub fn into_first(self) -> Option<Value> {
        self.values.into_iter().next()
    }

    /// Assign every column to the entity property of the same name.
    pub fn into_entity<T: Entity>(self) -> DbResult<T> {
        let mut item = T::default();
        for (column, value) in self.columns.into_iter().zip(self.values) {
            item.set(&column, value)
                .map_err(|e| DbError::property_assignment(T::ENTITY.name, column, e))?;
        }
        Ok(item)
    }
}

/// Trait for converting database rows to records.
pub trait RowToRecord {
    fn to_record(&self) -> Record;
}

fn column_names<R: Row>(row: &R) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

impl RowToRecord for MySqlRow {
    fn to_record(&self) -> Record {
        let values = self
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), Dialect::MySql);
                mysql::decode_column(self, idx, category)
            })
            .collect();
        Record::new(column_names(self), values)
    }
}

impl RowToRecord for PgRow {
    fn to_record(&self) -> Record {
        let values = self
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), Dialect::PostgreSql);
                postgres::decode_column(self, idx, category)
            })
            .collect();
        Record::new(column_names(self), values)
    }
}

impl RowToRecord for SqliteRow {
    fn to_record(&self) -> Record {
        let values = self
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), Dialect::SQLite);
                sqlite::decode_column(self, idx, category)
            })
            .collect();
        Record::new(column_names(self), values)
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> Value {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::DateTime => decode_datetime(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> Value {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => decimal_value(v),
            Ok(None) => Value::Null,
            Err(e) => {
                tracing::error!("Failed to decode DECIMAL: {:?}", e);
                Value::Null
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Value {
        // Check NULL first
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return Value::Null;
        }
        if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return Value::Int(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<u8>, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u16>, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u32>, _>(idx) {
            return Value::Int(v.into());
        }
        // LAST_INSERT_ID() is BIGINT UNSIGNED
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
            return match i64::try_from(v) {
                Ok(v) => Value::Int(v),
                Err(_) => Value::Text(v.to_string()),
            };
        }
        Value::Null
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> Value {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> Value {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return Value::Float(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return Value::Float(v.into());
        }
        Value::Null
    }

    fn decode_binary(row: &MySqlRow, idx: usize) -> Value {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null)
    }

    fn decode_datetime(row: &MySqlRow, idx: usize) -> Value {
        match row.try_get::<Option<NaiveDateTime>, _>(idx) {
            Ok(Some(v)) => Value::DateTime(v.and_utc()),
            Ok(None) => Value::Null,
            // TIMESTAMP columns decode as DateTime<Utc>
            Err(_) => row
                .try_get::<Option<DateTime<Utc>>, _>(idx)
                .ok()
                .flatten()
                .map(Value::DateTime)
                .unwrap_or(Value::Null),
        }
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> Value {
        match row.try_get::<Option<String>, _>(idx) {
            Ok(Some(v)) => Value::Text(v),
            Ok(None) => Value::Null,
            // information_schema and friends report text as VARBINARY
            Err(_) => decode_binary(row, idx),
        }
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> Value {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::DateTime => decode_datetime(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> Value {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => decimal_value(v),
            Ok(None) => Value::Null,
            Err(e) => {
                tracing::error!("Failed to decode NUMERIC: {:?}", e);
                Value::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Value {
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return Value::Null;
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return Value::Int(v);
        }
        Value::Null
    }

    fn decode_boolean(row: &PgRow, idx: usize) -> Value {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null)
    }

    fn decode_float(row: &PgRow, idx: usize) -> Value {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return Value::Float(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return Value::Float(v.into());
        }
        Value::Null
    }

    fn decode_binary(row: &PgRow, idx: usize) -> Value {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null)
    }

    fn decode_datetime(row: &PgRow, idx: usize) -> Value {
        match row.try_get::<Option<DateTime<Utc>>, _>(idx) {
            Ok(Some(v)) => Value::DateTime(v),
            Ok(None) => Value::Null,
            // TIMESTAMP WITHOUT TIME ZONE
            Err(_) => row
                .try_get::<Option<NaiveDateTime>, _>(idx)
                .ok()
                .flatten()
                .map(|v| Value::DateTime(v.and_utc()))
                .unwrap_or(Value::Null),
        }
    }

    fn decode_text(row: &PgRow, idx: usize) -> Value {
        row.try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Text)
            .unwrap_or(Value::Null)
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> Value {
        match category {
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float | TypeCategory::Decimal => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_integer(row: &SqliteRow, idx: usize) -> Value {
        match row.try_get::<Option<i64>, _>(idx) {
            Ok(Some(v)) => Value::Int(v),
            Ok(None) => Value::Null,
            // Dynamic typing: an INTEGER column may hold anything
            Err(_) => decode_text(row, idx),
        }
    }

    fn decode_boolean(row: &SqliteRow, idx: usize) -> Value {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null)
    }

    fn decode_float(row: &SqliteRow, idx: usize) -> Value {
        match row.try_get::<Option<f64>, _>(idx) {
            Ok(Some(v)) => Value::Float(v),
            Ok(None) => Value::Null,
            Err(_) => decode_text(row, idx),
        }
    }

    fn decode_binary(row: &SqliteRow, idx: usize) -> Value {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null)
    }

    fn decode_text(row: &SqliteRow, idx: usize) -> Value {
        match row.try_get::<Option<String>, _>(idx) {
            Ok(Some(v)) => Value::Text(v),
            Ok(None) => Value::Null,
            Err(_) => {
                if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
                    return Value::Int(v);
                }
                if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
                    return Value::Float(v);
                }
                decode_binary(row, idx)
            }
        }
    }
}
