//! Transport-safe SQL values and rows.
//!
//! Everything that crosses the worker bridge must have a defined, lossless
//! encoding: booleans map to integers, datetimes to RFC 3339 text (UTC,
//! millisecond precision, so lexicographic order equals chronological
//! order). A payload that cannot be encoded is a programming error, not a
//! runtime error.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Encode a datetime the way every timestamp column in the schema
    /// stores it.
    pub fn from_datetime(ts: DateTime<Utc>) -> Self {
        SqlValue::Text(ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn from_opt_datetime(ts: Option<DateTime<Utc>>) -> Self {
        match ts {
            Some(ts) => Self::from_datetime(ts),
            None => SqlValue::Null,
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::from_datetime(v)
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}

impl From<SqlValue> for rusqlite::types::Value {
    fn from(v: SqlValue) -> Self {
        use rusqlite::types::Value;
        match v {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::Integer(i),
            SqlValue::Real(r) => Value::Real(r),
            SqlValue::Text(t) => Value::Text(t),
            SqlValue::Blob(b) => Value::Blob(b),
        }
    }
}

impl From<rusqlite::types::Value> for SqlValue {
    fn from(v: rusqlite::types::Value) -> Self {
        use rusqlite::types::Value;
        match v {
            Value::Null => SqlValue::Null,
            Value::Integer(i) => SqlValue::Integer(i),
            Value::Real(r) => SqlValue::Real(r),
            Value::Text(t) => SqlValue::Text(t),
            Value::Blob(b) => SqlValue::Blob(b),
        }
    }
}

/// One result row, columns in statement order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn from_columns(columns: Vec<(String, SqlValue)>) -> Self {
        Self { columns }
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(col, _)| col == name)
            .map(|(_, v)| v)
    }

    fn require(&self, name: &str) -> Result<&SqlValue, StoreError> {
        self.get(name)
            .ok_or_else(|| StoreError::Validation(format!("missing column: {name}")))
    }

    pub fn integer(&self, name: &str) -> Result<i64, StoreError> {
        match self.require(name)? {
            SqlValue::Integer(i) => Ok(*i),
            other => Err(type_mismatch(name, "integer", other)),
        }
    }

    pub fn boolean(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.integer(name)? != 0)
    }

    pub fn text(&self, name: &str) -> Result<&str, StoreError> {
        match self.require(name)? {
            SqlValue::Text(t) => Ok(t),
            other => Err(type_mismatch(name, "text", other)),
        }
    }

    pub fn opt_text(&self, name: &str) -> Result<Option<&str>, StoreError> {
        match self.require(name)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(t) => Ok(Some(t)),
            other => Err(type_mismatch(name, "text or null", other)),
        }
    }

    pub fn datetime(&self, name: &str) -> Result<DateTime<Utc>, StoreError> {
        parse_datetime(name, self.text(name)?)
    }

    pub fn opt_datetime(&self, name: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        match self.require(name)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(t) => parse_datetime(name, t).map(Some),
            other => Err(type_mismatch(name, "text or null", other)),
        }
    }
}

fn parse_datetime(name: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Validation(format!("column {name} is not a datetime: {e}")))
}

fn type_mismatch(name: &str, expected: &str, got: &SqlValue) -> StoreError {
    StoreError::Validation(format!("column {name}: expected {expected}, got {got:?}"))
}
